//! Stage-executor contracts and artifacts.
//!
//! Each stage executor is an external collaborator with a uniform
//! contract: given a typed input artifact, produce a typed output
//! artifact plus quality metadata, or fail. Implementations must be
//! idempotent under identical input so the coordinator can safely
//! re-invoke them on retry.

mod artifacts;
mod builtin;
pub mod mocks;
mod tasks;

pub use artifacts::{DiscoveryArtifact, ExecutionArtifact, PlanningArtifact, QualityMetadata};
pub use builtin::{KeywordDiscoveryExecutor, ScaffoldTaskRunner, TemplatePlanningExecutor};
pub use tasks::{SubTask, SubTaskKind, SubTaskResult, TaskOutcome};

use crate::errors::BuildflowError;
use async_trait::async_trait;

/// Discovery: turns a requirement description into a structured plan seed.
#[async_trait]
pub trait DiscoveryExecutor: Send + Sync {
    /// Analyzes the requirement. Must be idempotent under identical input.
    async fn execute(
        &self,
        requirement: &str,
    ) -> Result<(DiscoveryArtifact, QualityMetadata), BuildflowError>;
}

/// Planning: turns a plan seed into an ordered task graph.
#[async_trait]
pub trait PlanningExecutor: Send + Sync {
    /// Builds the task graph. Must be idempotent under identical input.
    async fn execute(
        &self,
        discovery: &DiscoveryArtifact,
    ) -> Result<(PlanningArtifact, QualityMetadata), BuildflowError>;
}

/// The per-sub-task collaborator used by the execution stage.
///
/// Runners must not partially mutate shared external state without the
/// checkpoint manager being informed; when sub-tasks run in parallel each
/// must write into a private, non-overlapping output namespace.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Runs one sub-task. Must be idempotent under identical input.
    async fn run(&self, task: &SubTask) -> Result<TaskOutcome, BuildflowError>;
}
