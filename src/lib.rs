#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::missing_panics_doc)]

pub mod analysis;
pub mod config;
pub mod contract;
pub mod error;
pub mod figure;
pub mod layout;
pub mod media;
pub mod model;
pub mod observability;
pub mod pipeline;
pub mod project;
pub mod store;

pub use config::{ConfigError, ConfigStore, Parametrization, ProjectConfig};
pub use contract::StageReport;
pub use error::{PipelineError, Result};
pub use layout::{Artifact, CohortArtifact, ProjectLayout, Stage};
pub use pipeline::{Pipeline, PipelineBuilder};
