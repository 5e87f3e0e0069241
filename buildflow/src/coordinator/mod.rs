//! Pipeline coordination: configuration, the stage loop and run results.

mod config;
mod pipeline;
mod result;

pub use config::PipelineConfig;
pub use pipeline::PipelineCoordinator;
pub use result::{PipelineResult, RunMetrics};
