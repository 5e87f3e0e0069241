//! Typed artifacts passed between stages.

use super::tasks::{SubTask, SubTaskResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Quality metadata attached to every stage-executor output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QualityMetadata {
    /// A 0.0-1.0 quality signal, when the collaborator produces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Free-text notes from the collaborator.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl QualityMetadata {
    /// Creates metadata with a score only.
    #[must_use]
    pub fn with_score(score: f64) -> Self {
        Self {
            score: Some(score),
            notes: Vec::new(),
        }
    }
}

/// Discovery output: the structured requirement and plan seed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryArtifact {
    /// Human-readable project name derived from the requirement.
    pub project_name: String,
    /// Detected project kind (e.g. "web_app", "cli_tool").
    pub project_kind: String,
    /// Normalized requirement summary.
    pub summary: String,
    /// Features the planner should turn into tasks.
    pub features: Vec<String>,
    /// Rough end-to-end time estimate in minutes.
    pub estimated_minutes: u64,
}

/// Planning output: the ordered task graph with checkpoint markers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanningArtifact {
    /// Tasks in execution order. Dependencies only point backwards.
    pub tasks: Vec<SubTask>,
    /// Rough execution time estimate in minutes.
    pub estimated_minutes: u64,
}

impl PlanningArtifact {
    /// Returns the number of planned tasks.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Execution output: the built-project handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionArtifact {
    /// Root directory of the built project.
    pub project_dir: PathBuf,
    /// Per-sub-task results in completion order.
    pub task_results: Vec<SubTaskResult>,
    /// All files created across sub-tasks.
    pub files_created: Vec<PathBuf>,
    /// Mean of the observed quality scores, if any were reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_quality: Option<f64>,
}

impl ExecutionArtifact {
    /// Counts sub-tasks that completed successfully.
    #[must_use]
    pub fn completed_tasks(&self) -> usize {
        self.task_results.iter().filter(|r| r.success).count()
    }

    /// Counts sub-tasks that failed.
    #[must_use]
    pub fn failed_tasks(&self) -> usize {
        self.task_results.iter().filter(|r| !r.success).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::{SubTaskKind, TaskOutcome};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_execution_artifact_counts() {
        let artifact = ExecutionArtifact {
            project_dir: PathBuf::from("/tmp/p"),
            task_results: vec![
                SubTaskResult::started("a", "task a", SubTaskKind::Scaffold).succeeded(
                    TaskOutcome::default(),
                    None,
                ),
                SubTaskResult::started("b", "task b", SubTaskKind::Build)
                    .failed("compile failed"),
            ],
            files_created: Vec::new(),
            average_quality: None,
        };
        assert_eq!(artifact.completed_tasks(), 1);
        assert_eq!(artifact.failed_tasks(), 1);
    }

    #[test]
    fn test_discovery_artifact_roundtrip() {
        let artifact = DiscoveryArtifact {
            project_name: "task-tracker".to_string(),
            project_kind: "web_app".to_string(),
            summary: "A task tracker".to_string(),
            features: vec!["auth".to_string(), "dashboard".to_string()],
            estimated_minutes: 45,
        };
        let json = serde_json::to_string(&artifact).unwrap();
        let back: DiscoveryArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back.features.len(), 2);
    }
}
