//! The recovery policy engine: maps a classified failure to a bounded
//! recovery decision.
//!
//! Retry counters are session-scoped, keyed `stage:category`, and reset
//! only when a new session (and therefore a new engine) starts. Counters
//! are incremented only on Retry decisions; Abort, Skip and Rollback do
//! not mutate them.

use super::{RecoveryAction, StrategyTable};
use crate::errors::WorkflowError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Fallback when no strategy matches: retry once a second later.
const DEFAULT_MAX_RETRIES: u32 = 1;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// The engine's verdict on a single failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryDecision {
    /// The resolved action after budget checks.
    pub action: RecoveryAction,
    /// Whether the caller should re-invoke the failed work.
    pub should_retry: bool,
    /// Whether the caller should terminate the session.
    pub should_abort: bool,
    /// Delay to wait before a retry.
    pub delay: Duration,
    /// How many retries of this (stage, category) have been issued,
    /// including this decision.
    pub attempts_used: u32,
    /// The retry budget for Retry/Rollback actions.
    pub max_retries: u32,
    /// Human-readable suggested action.
    pub suggested_action: String,
}

/// Session-scoped recovery policy engine.
///
/// The strategy table is shared (read-only during runs) across sessions;
/// the counters belong to exactly one session.
pub struct RecoveryPolicyEngine {
    table: Arc<StrategyTable>,
    counters: Mutex<HashMap<String, u32>>,
}

impl RecoveryPolicyEngine {
    /// Creates an engine over a shared strategy table.
    #[must_use]
    pub fn new(table: Arc<StrategyTable>) -> Self {
        Self {
            table,
            counters: Mutex::new(HashMap::new()),
        }
    }

    /// Creates an engine with the built-in default strategies.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(Arc::new(StrategyTable::with_defaults()))
    }

    /// Decides how to recover from a classified failure.
    ///
    /// Non-recoverable errors abort regardless of any registered strategy.
    /// A Retry decision consults and increments the session-scoped counter
    /// for the error's `stage:category` key; once the counter reaches the
    /// strategy's budget the engine stops retrying and aborts instead.
    pub fn decide(&self, error: &WorkflowError) -> RecoveryDecision {
        let suggested = error.suggested_action.clone();

        // Hard override, not a default.
        if !error.recoverable {
            return RecoveryDecision {
                action: RecoveryAction::Abort,
                should_retry: false,
                should_abort: true,
                delay: Duration::ZERO,
                attempts_used: self.attempts(&error.counter_key()),
                max_retries: 0,
                suggested_action: suggested,
            };
        }

        let (action, max_retries, delay) = self
            .table
            .get(error.stage, error.category)
            .map_or(
                (RecoveryAction::Retry, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY),
                |s| (s.action, s.max_retries, s.retry_delay()),
            );

        match action {
            RecoveryAction::Retry | RecoveryAction::Rollback => {
                let key = error.counter_key();
                let mut counters = self.counters.lock();
                let used = counters.get(&key).copied().unwrap_or(0);

                if used >= max_retries {
                    debug!(key = %key, used, max_retries, "Retry budget exhausted");
                    return RecoveryDecision {
                        action: RecoveryAction::Abort,
                        should_retry: false,
                        should_abort: true,
                        delay: Duration::ZERO,
                        attempts_used: used,
                        max_retries,
                        suggested_action: suggested,
                    };
                }

                counters.insert(key.clone(), used + 1);
                debug!(key = %key, attempt = used + 1, max_retries, "Issuing retry decision");

                RecoveryDecision {
                    action,
                    should_retry: true,
                    should_abort: false,
                    delay,
                    attempts_used: used + 1,
                    max_retries,
                    suggested_action: suggested,
                }
            }
            RecoveryAction::Skip => RecoveryDecision {
                action: RecoveryAction::Skip,
                should_retry: false,
                should_abort: false,
                delay: Duration::ZERO,
                attempts_used: self.attempts(&error.counter_key()),
                max_retries,
                suggested_action: suggested,
            },
            RecoveryAction::Abort => RecoveryDecision {
                action: RecoveryAction::Abort,
                should_retry: false,
                should_abort: true,
                delay: Duration::ZERO,
                attempts_used: self.attempts(&error.counter_key()),
                max_retries,
                suggested_action: suggested,
            },
        }
    }

    /// Returns the retries issued so far for a counter key.
    #[must_use]
    pub fn attempts(&self, key: &str) -> u32 {
        self.counters.lock().get(key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::WorkflowError;
    use crate::recovery::RecoveryStrategy;
    use crate::session::PipelineStage;
    use pretty_assertions::assert_eq;

    fn validation_error() -> WorkflowError {
        WorkflowError::classify(PipelineStage::Execution, "validation threshold not met")
    }

    #[test]
    fn test_retry_until_budget_then_abort() {
        // Execution/validation default: Retry, max 2, 1s delay.
        let engine = RecoveryPolicyEngine::with_defaults();
        let err = validation_error();

        let first = engine.decide(&err);
        assert!(first.should_retry);
        assert_eq!(first.delay, Duration::from_secs(1));
        assert_eq!(first.attempts_used, 1);

        let second = engine.decide(&err);
        assert!(second.should_retry);
        assert_eq!(second.attempts_used, 2);

        let third = engine.decide(&err);
        assert!(!third.should_retry);
        assert!(third.should_abort);
        assert_eq!(third.action, RecoveryAction::Abort);
    }

    #[test]
    fn test_budget_check_is_idempotent_after_exhaustion() {
        let engine = RecoveryPolicyEngine::with_defaults();
        let err = validation_error();

        engine.decide(&err);
        engine.decide(&err);
        engine.decide(&err);
        let again = engine.decide(&err);

        // Exhaustion does not keep incrementing.
        assert_eq!(engine.attempts("execution:validation"), 2);
        assert!(again.should_abort);
    }

    #[test]
    fn test_non_recoverable_aborts_despite_strategy() {
        let mut table = StrategyTable::with_defaults();
        table.register(RecoveryStrategy::retry(
            PipelineStage::Execution,
            crate::errors::ErrorCategory::Permission,
            5,
            Duration::from_secs(1),
        ));
        let engine = RecoveryPolicyEngine::new(Arc::new(table));

        let err = WorkflowError::classify(PipelineStage::Execution, "access denied");
        let decision = engine.decide(&err);

        assert!(decision.should_abort);
        assert!(!decision.should_retry);
        assert_eq!(engine.attempts("execution:permission"), 0);
    }

    #[test]
    fn test_unmatched_category_uses_default_retry() {
        let engine = RecoveryPolicyEngine::with_defaults();
        let err = WorkflowError::classify(PipelineStage::Planning, "something odd");

        let first = engine.decide(&err);
        assert!(first.should_retry);
        assert_eq!(first.delay, Duration::from_secs(1));
        assert_eq!(first.max_retries, 1);

        let second = engine.decide(&err);
        assert!(second.should_abort);
    }

    #[test]
    fn test_skip_does_not_touch_counters() {
        let engine = RecoveryPolicyEngine::with_defaults();
        let err = WorkflowError::classify(PipelineStage::Execution, "test suite failed");

        let decision = engine.decide(&err);
        assert_eq!(decision.action, RecoveryAction::Skip);
        assert!(!decision.should_retry);
        assert!(!decision.should_abort);
        assert_eq!(engine.attempts("execution:test"), 0);
    }

    #[test]
    fn test_abort_strategy_short_circuits() {
        let engine = RecoveryPolicyEngine::with_defaults();
        let err = WorkflowError::classify(PipelineStage::Planning, "plan template not found");

        let decision = engine.decide(&err);
        assert!(decision.should_abort);
        assert_eq!(decision.action, RecoveryAction::Abort);
    }

    #[test]
    fn test_counters_are_per_engine() {
        let table = Arc::new(StrategyTable::with_defaults());
        let one = RecoveryPolicyEngine::new(table.clone());
        let two = RecoveryPolicyEngine::new(table);
        let err = validation_error();

        one.decide(&err);
        one.decide(&err);

        // Session two's budget is untouched.
        let decision = two.decide(&err);
        assert!(decision.should_retry);
        assert_eq!(decision.attempts_used, 1);
    }
}
