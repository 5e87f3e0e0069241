//! # Buildflow
//!
//! An autonomous multi-stage build pipeline coordinator.
//!
//! Buildflow drives a project-build session through a fixed sequence of
//! stages with support for:
//!
//! - **Staged execution**: Discovery, Planning and Execution with typed
//!   artifacts handed between stages
//! - **Bounded recovery**: rule-based error classification and per-session
//!   retry budgets, with skip and rollback strategies
//! - **Checkpointing**: restorable points inside the execution stage
//! - **Weighted progress**: deterministic overall-percentage reporting
//!   with an append-only event history
//! - **Pause and resume**: sessions persist at the stage boundary and
//!   resume without re-running completed stages
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use buildflow::prelude::*;
//!
//! let coordinator = PipelineCoordinator::new(PipelineConfig::new("out"));
//! let result = coordinator.run("Build a SaaS app with auth").await?;
//! assert!(result.success);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod checkpoint;
pub mod coordinator;
pub mod errors;
pub mod executors;
pub mod progress;
pub mod recovery;
pub mod session;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::checkpoint::{
        Checkpoint, CheckpointManager, DirManifestStore, FileManifest, ManifestStore,
    };
    pub use crate::coordinator::{
        PipelineConfig, PipelineCoordinator, PipelineResult, RunMetrics,
    };
    pub use crate::errors::{BuildflowError, ErrorCategory, WorkflowError};
    pub use crate::executors::{
        DiscoveryArtifact, DiscoveryExecutor, ExecutionArtifact, PlanningArtifact,
        PlanningExecutor, QualityMetadata, SubTask, SubTaskKind, SubTaskResult, TaskOutcome,
        TaskRunner,
    };
    pub use crate::progress::{
        ProgressEvent, ProgressObserver, ProgressStatus, ProgressTracker,
    };
    pub use crate::recovery::{
        RecoveryAction, RecoveryDecision, RecoveryPolicyEngine, RecoveryStrategy, StrategyTable,
    };
    pub use crate::session::{PipelineSession, PipelineStage, SessionStatus, SessionStore};
    pub use crate::utils::{generate_uuid, iso_timestamp, Timestamp};
}
