//! Run results and aggregate metrics.

use crate::errors::BuildflowError;
use crate::executors::SubTaskKind;
use crate::session::{PipelineSession, SessionStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Timing and outcome aggregates for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetrics {
    /// Wall-clock duration of the whole run in milliseconds.
    pub total_ms: u64,
    /// Discovery stage duration in milliseconds.
    pub discovery_ms: u64,
    /// Planning stage duration in milliseconds.
    pub planning_ms: u64,
    /// Execution stage duration in milliseconds.
    pub execution_ms: u64,
    /// Summed duration of validate sub-tasks in milliseconds.
    pub validation_ms: u64,
    /// Summed duration of test sub-tasks in milliseconds.
    pub test_ms: u64,
    /// Number of planned sub-tasks.
    pub tasks_total: usize,
    /// Sub-tasks that completed successfully.
    pub tasks_completed: usize,
    /// Sub-tasks that failed (skipped failures included).
    pub tasks_failed: usize,
    /// Files created across all sub-tasks.
    pub files_created: usize,
    /// Mean of the observed sub-task quality scores.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_quality: Option<f64>,
    /// All failures observed, including recovered ones.
    pub errors_total: usize,
    /// Failures the recovery engine got the run past.
    pub errors_recovered: usize,
    /// Failure counts by error category.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors_by_category: BTreeMap<String, usize>,
}

impl RunMetrics {
    /// Folds the session's error history into the aggregate counters.
    pub(crate) fn absorb_errors(&mut self, session: &PipelineSession, fatal: usize) {
        self.errors_total = session.errors.len();
        self.errors_recovered = session.errors.len().saturating_sub(fatal);
        for error in &session.errors {
            *self
                .errors_by_category
                .entry(error.category.to_string())
                .or_insert(0) += 1;
        }
    }

    /// Folds the execution artifact's sub-task results in.
    pub(crate) fn absorb_execution(&mut self, session: &PipelineSession) {
        let Some(execution) = &session.execution else {
            return;
        };
        self.tasks_total = execution.task_results.len();
        self.tasks_completed = execution.completed_tasks();
        self.tasks_failed = execution.failed_tasks();
        self.files_created = execution.files_created.len();
        self.average_quality = execution.average_quality;
        for result in &execution.task_results {
            match result.kind {
                SubTaskKind::Validate => self.validation_ms += result.duration_ms,
                SubTaskKind::Test => self.test_ms += result.duration_ms,
                SubTaskKind::Scaffold | SubTaskKind::Build => {}
            }
        }
    }
}

/// The terminal outcome of a run or resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    /// True only when the session reached Completed.
    pub success: bool,
    /// The final session status.
    pub status: SessionStatus,
    /// The full session record, including errors and progress history.
    pub session: PipelineSession,
    /// Aggregate metrics.
    pub metrics: RunMetrics,
}

impl PipelineResult {
    /// Writes the result document next to the session files.
    pub fn write_to(&self, dir: &Path) -> Result<std::path::PathBuf, BuildflowError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("result-{}.json", self.session.id.simple()));
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, raw)?;
        Ok(path)
    }
}
