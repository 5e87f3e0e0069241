//! Coordinator configuration.

use std::path::PathBuf;

/// Tunables for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// When false, the run pauses after Planning and must be resumed to
    /// enter Execution.
    pub auto_advance: bool,
    /// When false, no checkpoints are created during Execution.
    pub checkpoints_enabled: bool,
    /// When true, an unrecoverable sub-task failure records the failure
    /// and lets the remaining sub-tasks run; the stage still fails once
    /// the loop finishes.
    pub continue_on_failure: bool,
    /// Upper bound on concurrently running independent sub-tasks.
    pub max_parallel: usize,
    /// Directory for session files, results and checkpoint snapshots.
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_advance: true,
            checkpoints_enabled: true,
            continue_on_failure: false,
            max_parallel: 1,
            output_dir: PathBuf::from("buildflow-output"),
        }
    }
}

impl PipelineConfig {
    /// Creates the default configuration rooted at `output_dir`.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Sets whether the run advances past Planning without pausing.
    #[must_use]
    pub fn auto_advance(mut self, enabled: bool) -> Self {
        self.auto_advance = enabled;
        self
    }

    /// Enables or disables checkpoint creation.
    #[must_use]
    pub fn checkpoints(mut self, enabled: bool) -> Self {
        self.checkpoints_enabled = enabled;
        self
    }

    /// Keeps executing remaining sub-tasks after an unrecoverable one.
    #[must_use]
    pub fn continue_on_failure(mut self, enabled: bool) -> Self {
        self.continue_on_failure = enabled;
        self
    }

    /// Sets the parallel sub-task bound. Clamped to at least 1.
    #[must_use]
    pub fn max_parallel(mut self, limit: usize) -> Self {
        self.max_parallel = limit.max(1);
        self
    }
}
