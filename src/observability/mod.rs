pub mod stage_log;
pub mod tracing;
