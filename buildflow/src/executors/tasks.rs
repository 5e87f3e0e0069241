//! Sub-tasks: the units of work inside the execution stage.

use crate::utils::{iso_timestamp, now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// The declared kind of a sub-task. Dispatch is opaque to the
/// coordinator; the kind only routes to the task runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskKind {
    /// Create files from templates.
    Scaffold,
    /// Compile or assemble.
    Build,
    /// Run lint/type/quality checks.
    Validate,
    /// Run tests.
    Test,
}

impl fmt::Display for SubTaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Scaffold => "scaffold",
            Self::Build => "build",
            Self::Validate => "validate",
            Self::Test => "test",
        };
        write!(f, "{s}")
    }
}

/// One planned unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    /// Unique id within the plan.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Declared kind.
    pub kind: SubTaskKind,
    /// Ids of tasks that must complete first. Only points backwards in
    /// plan order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// True when the planner declared this task safe to run concurrently
    /// with other independent tasks.
    #[serde(default)]
    pub independent: bool,
    /// Whether a checkpoint should follow this task.
    #[serde(default)]
    pub checkpoint_after: bool,
    /// Time estimate in minutes.
    #[serde(default)]
    pub estimated_minutes: u64,
}

impl SubTask {
    /// Creates a sub-task with just id, name and kind.
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: SubTaskKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            depends_on: Vec::new(),
            independent: false,
            checkpoint_after: false,
            estimated_minutes: 0,
        }
    }

    /// Marks the task independent (parallel-eligible).
    #[must_use]
    pub fn independent(mut self) -> Self {
        self.independent = true;
        self
    }

    /// Requests a checkpoint after this task.
    #[must_use]
    pub fn with_checkpoint(mut self) -> Self {
        self.checkpoint_after = true;
        self
    }

    /// Adds a dependency.
    #[must_use]
    pub fn depends_on(mut self, task_id: impl Into<String>) -> Self {
        self.depends_on.push(task_id.into());
        self
    }
}

/// What a task runner reports back on success.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// Files the task created.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_created: Vec<PathBuf>,
    /// Files the task modified.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_modified: Vec<PathBuf>,
    /// Quality signal, when the task produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
}

/// The recorded result of one sub-task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTaskResult {
    /// The sub-task id.
    pub task_id: String,
    /// The sub-task name.
    pub name: String,
    /// The declared kind, kept for aggregate timing.
    pub kind: SubTaskKind,
    /// Whether the task succeeded.
    pub success: bool,
    /// Start time (ISO 8601).
    pub started_at: String,
    /// End time (ISO 8601).
    pub finished_at: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,
    /// Files created.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_created: Vec<PathBuf>,
    /// Files modified.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files_modified: Vec<PathBuf>,
    /// Quality signal, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    /// Checkpoint created after this task, when checkpointing is enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<u64>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    start_instant: Option<Timestamp>,
}

impl SubTaskResult {
    /// Starts timing a sub-task.
    #[must_use]
    pub fn started(id: impl Into<String>, name: impl Into<String>, kind: SubTaskKind) -> Self {
        Self {
            task_id: id.into(),
            name: name.into(),
            kind,
            success: false,
            started_at: iso_timestamp(),
            finished_at: String::new(),
            duration_ms: 0,
            files_created: Vec::new(),
            files_modified: Vec::new(),
            quality_score: None,
            checkpoint_id: None,
            error: None,
            start_instant: Some(now_utc()),
        }
    }

    fn finish(mut self) -> Self {
        let now = now_utc();
        self.finished_at = iso_timestamp();
        self.duration_ms = self
            .start_instant
            .map(|start| (now - start).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        self
    }

    /// Completes the result successfully.
    #[must_use]
    pub fn succeeded(mut self, outcome: TaskOutcome, checkpoint_id: Option<u64>) -> Self {
        self.success = true;
        self.files_created = outcome.files_created;
        self.files_modified = outcome.files_modified;
        self.quality_score = outcome.quality_score;
        self.checkpoint_id = checkpoint_id;
        self.finish()
    }

    /// Completes the result as failed.
    #[must_use]
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_subtask_builder() {
        let task = SubTask::new("t1", "scaffold homepage", SubTaskKind::Scaffold)
            .independent()
            .with_checkpoint()
            .depends_on("t0");
        assert!(task.independent);
        assert!(task.checkpoint_after);
        assert_eq!(task.depends_on, vec!["t0".to_string()]);
    }

    #[test]
    fn test_result_success_records_outcome() {
        let outcome = TaskOutcome {
            files_created: vec![PathBuf::from("src/home.rs")],
            files_modified: Vec::new(),
            quality_score: Some(0.85),
        };
        let result =
            SubTaskResult::started("t1", "build", SubTaskKind::Build).succeeded(outcome, Some(2));
        assert!(result.success);
        assert_eq!(result.checkpoint_id, Some(2));
        assert_eq!(result.quality_score, Some(0.85));
        assert!(!result.finished_at.is_empty());
    }

    #[test]
    fn test_result_failure_records_error() {
        let result =
            SubTaskResult::started("t1", "validate", SubTaskKind::Validate).failed("lint failed");
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("lint failed"));
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(SubTaskKind::Scaffold.to_string(), "scaffold");
        assert_eq!(SubTaskKind::Validate.to_string(), "validate");
    }
}
