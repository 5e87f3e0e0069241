//! Pipeline session state: stages, statuses and the session record.

use crate::checkpoint::Checkpoint;
use crate::errors::WorkflowError;
use crate::executors::{DiscoveryArtifact, ExecutionArtifact, PlanningArtifact};
use crate::progress::ProgressEvent;
use crate::utils::{generate_uuid, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The coarse phase of a pipeline session.
///
/// Transitions are strictly ordered Discovery -> Planning -> Execution ->
/// Complete, except for Failed which is absorbing from any stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Requirement analysis producing the plan seed.
    Discovery,
    /// Task-graph construction from the discovery artifact.
    Planning,
    /// Sub-task execution producing the built project.
    Execution,
    /// Terminal success state.
    Complete,
    /// Terminal failure state, reachable from any stage.
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Discovery => "discovery",
            Self::Planning => "planning",
            Self::Execution => "execution",
            Self::Complete => "complete",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl PipelineStage {
    /// The stage that follows this one in the happy path.
    #[must_use]
    pub fn next(&self) -> Option<Self> {
        match self {
            Self::Discovery => Some(Self::Planning),
            Self::Planning => Some(Self::Execution),
            Self::Execution => Some(Self::Complete),
            Self::Complete | Self::Failed => None,
        }
    }

    /// Returns true for the two terminal stages.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

/// The overall status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session created but no stage started yet.
    Initializing,
    /// A stage executor is in flight.
    Running,
    /// Deliberately suspended awaiting external advance. Not an error.
    Paused,
    /// All stages finished successfully.
    Completed,
    /// The run terminated with an unrecovered failure.
    Failed,
    /// The run was cancelled cooperatively.
    Cancelled,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl SessionStatus {
    /// Returns true if the status is one of the four terminal outcomes.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Paused | Self::Cancelled
        )
    }
}

/// The unit of work for one end-to-end pipeline run.
///
/// Mutated only by the coordinator. Persisted on pause, deleted on
/// successful completion, retained on failure for postmortem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSession {
    /// Unique session id, generated at start.
    pub id: Uuid,
    /// Human-readable project name, populated once Discovery completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
    /// The original requirement text.
    pub requirement: String,
    /// Current stage.
    pub stage: PipelineStage,
    /// Overall status.
    pub status: SessionStatus,
    /// When the run started.
    pub started_at: Timestamp,
    /// Last mutation time.
    pub updated_at: Timestamp,
    /// Discovery output, once available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryArtifact>,
    /// Planning output, once available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub planning: Option<PlanningArtifact>,
    /// Execution output, once available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionArtifact>,
    /// Errors recorded in occurrence order.
    #[serde(default)]
    pub errors: Vec<WorkflowError>,
    /// Progress events in occurrence order.
    #[serde(default)]
    pub progress: Vec<ProgressEvent>,
    /// Checkpoints created during Execution.
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
}

impl PipelineSession {
    /// Creates a new session for the given requirement.
    #[must_use]
    pub fn new(requirement: impl Into<String>) -> Self {
        let now = now_utc();
        Self {
            id: generate_uuid(),
            project_name: None,
            requirement: requirement.into(),
            stage: PipelineStage::Discovery,
            status: SessionStatus::Initializing,
            started_at: now,
            updated_at: now,
            discovery: None,
            planning: None,
            execution: None,
            errors: Vec::new(),
            progress: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    /// Moves to the next stage in the fixed order.
    ///
    /// Only valid on non-terminal stages; the stage-N artifact must have
    /// been stored first, which the coordinator guarantees.
    pub fn advance_stage(&mut self) {
        if let Some(next) = self.stage.next() {
            self.stage = next;
            self.touch();
        }
    }

    /// Enters the absorbing Failed state.
    pub fn mark_failed(&mut self) {
        self.stage = PipelineStage::Failed;
        self.status = SessionStatus::Failed;
        self.touch();
    }

    /// Records a failure observation.
    pub fn record_error(&mut self, error: WorkflowError) {
        self.errors.push(error);
        self.touch();
    }

    /// Updates the last-activity timestamp.
    pub fn touch(&mut self) {
        self.updated_at = now_utc();
    }

    /// Returns true if the given stage's output artifact exists.
    #[must_use]
    pub fn stage_complete(&self, stage: PipelineStage) -> bool {
        match stage {
            PipelineStage::Discovery => self.discovery.is_some(),
            PipelineStage::Planning => self.planning.is_some(),
            PipelineStage::Execution => self.execution.is_some(),
            PipelineStage::Complete => self.status == SessionStatus::Completed,
            PipelineStage::Failed => false,
        }
    }

    /// The first stage whose artifact is absent; where a resume picks up.
    #[must_use]
    pub fn first_incomplete_stage(&self) -> PipelineStage {
        if self.discovery.is_none() {
            PipelineStage::Discovery
        } else if self.planning.is_none() {
            PipelineStage::Planning
        } else if self.execution.is_none() {
            PipelineStage::Execution
        } else {
            PipelineStage::Complete
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_stage_order() {
        assert_eq!(PipelineStage::Discovery.next(), Some(PipelineStage::Planning));
        assert_eq!(PipelineStage::Planning.next(), Some(PipelineStage::Execution));
        assert_eq!(PipelineStage::Execution.next(), Some(PipelineStage::Complete));
        assert_eq!(PipelineStage::Complete.next(), None);
        assert_eq!(PipelineStage::Failed.next(), None);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(PipelineStage::Discovery.to_string(), "discovery");
        assert_eq!(PipelineStage::Execution.to_string(), "execution");
    }

    #[test]
    fn test_status_terminal() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Paused.is_terminal());
        assert!(SessionStatus::Cancelled.is_terminal());
        assert!(!SessionStatus::Running.is_terminal());
        assert!(!SessionStatus::Initializing.is_terminal());
    }

    #[test]
    fn test_session_new() {
        let session = PipelineSession::new("build a blog");
        assert_eq!(session.stage, PipelineStage::Discovery);
        assert_eq!(session.status, SessionStatus::Initializing);
        assert!(session.project_name.is_none());
        assert!(session.errors.is_empty());
    }

    #[test]
    fn test_advance_stops_at_terminal() {
        let mut session = PipelineSession::new("req");
        session.advance_stage();
        assert_eq!(session.stage, PipelineStage::Planning);
        session.advance_stage();
        session.advance_stage();
        assert_eq!(session.stage, PipelineStage::Complete);
        session.advance_stage();
        assert_eq!(session.stage, PipelineStage::Complete);
    }

    #[test]
    fn test_mark_failed_absorbing() {
        let mut session = PipelineSession::new("req");
        session.advance_stage();
        session.mark_failed();
        assert_eq!(session.stage, PipelineStage::Failed);
        assert_eq!(session.status, SessionStatus::Failed);
        session.advance_stage();
        assert_eq!(session.stage, PipelineStage::Failed);
    }

    #[test]
    fn test_first_incomplete_stage() {
        let session = PipelineSession::new("req");
        assert_eq!(session.first_incomplete_stage(), PipelineStage::Discovery);
    }

    #[test]
    fn test_stage_serde_snake_case() {
        let json = serde_json::to_string(&PipelineStage::Execution).unwrap();
        assert_eq!(json, r#""execution""#);
    }
}
