//! Recovery strategy rules keyed by (stage, error category).

use crate::errors::ErrorCategory;
use crate::session::PipelineStage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// The action a strategy prescribes for a matching failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Re-invoke the failing stage or sub-task with the same input.
    Retry,
    /// Record the failure as a warning and continue. Only meaningful
    /// inside the execution sub-task loop.
    Skip,
    /// Restore the most recent checkpoint, then retry the sub-task.
    Rollback,
    /// Terminate the session.
    Abort,
}

/// A policy rule: what to do for a given (stage, category) pair.
///
/// A fixed built-in set is installed at startup; additional strategies may
/// be registered before a run begins. Strategies are read-only during a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    /// The stage this rule applies to.
    pub stage: PipelineStage,
    /// The error category this rule applies to.
    pub category: ErrorCategory,
    /// The prescribed action.
    pub action: RecoveryAction,
    /// Maximum retry attempts for Retry/Rollback actions.
    pub max_retries: u32,
    /// Delay between retries in milliseconds.
    pub retry_delay_ms: u64,
}

impl RecoveryStrategy {
    /// Creates a retry strategy.
    #[must_use]
    pub fn retry(
        stage: PipelineStage,
        category: ErrorCategory,
        max_retries: u32,
        delay: Duration,
    ) -> Self {
        Self {
            stage,
            category,
            action: RecoveryAction::Retry,
            max_retries,
            retry_delay_ms: delay.as_millis() as u64,
        }
    }

    /// Creates a skip strategy.
    #[must_use]
    pub fn skip(stage: PipelineStage, category: ErrorCategory) -> Self {
        Self {
            stage,
            category,
            action: RecoveryAction::Skip,
            max_retries: 1,
            retry_delay_ms: 0,
        }
    }

    /// Creates a rollback strategy.
    #[must_use]
    pub fn rollback(
        stage: PipelineStage,
        category: ErrorCategory,
        max_retries: u32,
        delay: Duration,
    ) -> Self {
        Self {
            stage,
            category,
            action: RecoveryAction::Rollback,
            max_retries,
            retry_delay_ms: delay.as_millis() as u64,
        }
    }

    /// Creates an abort strategy.
    #[must_use]
    pub fn abort(stage: PipelineStage, category: ErrorCategory) -> Self {
        Self {
            stage,
            category,
            action: RecoveryAction::Abort,
            max_retries: 0,
            retry_delay_ms: 0,
        }
    }

    /// The configured retry delay.
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Registered strategies, shared read-only across concurrent sessions.
#[derive(Debug, Clone, Default)]
pub struct StrategyTable {
    strategies: HashMap<(PipelineStage, ErrorCategory), RecoveryStrategy>,
}

impl StrategyTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table pre-populated with the built-in defaults.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        for strategy in [
            RecoveryStrategy::retry(
                PipelineStage::Discovery,
                ErrorCategory::Network,
                3,
                Duration::from_secs(2),
            ),
            RecoveryStrategy::retry(
                PipelineStage::Discovery,
                ErrorCategory::Timeout,
                2,
                Duration::from_secs(5),
            ),
            RecoveryStrategy::abort(PipelineStage::Planning, ErrorCategory::FileNotFound),
            RecoveryStrategy::retry(
                PipelineStage::Execution,
                ErrorCategory::Validation,
                2,
                Duration::from_secs(1),
            ),
            RecoveryStrategy::retry(
                PipelineStage::Execution,
                ErrorCategory::Build,
                2,
                Duration::from_secs(1),
            ),
            RecoveryStrategy::skip(PipelineStage::Execution, ErrorCategory::Test),
        ] {
            table.register(strategy);
        }
        table
    }

    /// Registers a strategy, replacing any existing rule for its key.
    /// Must only be called before a run begins.
    pub fn register(&mut self, strategy: RecoveryStrategy) {
        self.strategies
            .insert((strategy.stage, strategy.category), strategy);
    }

    /// Looks up the strategy for a (stage, category) pair.
    #[must_use]
    pub fn get(&self, stage: PipelineStage, category: ErrorCategory) -> Option<&RecoveryStrategy> {
        self.strategies.get(&(stage, category))
    }

    /// Returns the number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Returns true if no strategies are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
