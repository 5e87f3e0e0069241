//! Error recovery: strategy rules and the bounded-retry policy engine.

mod engine;
mod strategy;

pub use engine::{RecoveryDecision, RecoveryPolicyEngine};
pub use strategy::{RecoveryAction, RecoveryStrategy, StrategyTable};
