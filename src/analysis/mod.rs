//! Numeric collaborators of the stages: clustering, transition statistics,
//! motif hierarchy and low-dimensional projection.
pub mod hierarchy;
pub mod hmm;
pub mod kmeans;
pub mod projection;
pub mod transition;
