//! Error types and the failure-classification rules.
//!
//! Every stage-executor failure is classified into an [`ErrorCategory`]
//! before the recovery policy engine sees it. Classification is rule-based
//! over the failure message, checked in priority order; permission,
//! syntax/parse and malformed-input failures are never recoverable.

use crate::session::PipelineStage;
use crate::utils::iso_timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The main error type for buildflow operations.
#[derive(Debug, Error)]
pub enum BuildflowError {
    /// A stage executor reported a failure.
    #[error("Stage '{stage}' failed: {message}")]
    StageExecution {
        /// The stage that failed.
        stage: PipelineStage,
        /// The failure message.
        message: String,
    },

    /// A sub-task inside the execution stage failed.
    #[error("Sub-task '{task_id}' failed: {message}")]
    SubTask {
        /// The failing sub-task id.
        task_id: String,
        /// The failure message.
        message: String,
    },

    /// A checkpoint lookup failed.
    #[error("Checkpoint {id} not found")]
    CheckpointNotFound {
        /// The requested checkpoint id.
        id: u64,
    },

    /// A checkpoint exists but cannot be restored.
    #[error("Checkpoint {id} is not restorable")]
    CheckpointNotRestorable {
        /// The requested checkpoint id.
        id: u64,
    },

    /// A stage was entered without its input artifact being present.
    #[error("Missing artifact for stage {stage}")]
    MissingArtifact {
        /// The stage whose output artifact is absent.
        stage: PipelineStage,
    },

    /// Session persistence failed.
    #[error("Session persistence error: {0}")]
    Persistence(String),

    /// The run was cancelled cooperatively.
    #[error("Pipeline cancelled: {0}")]
    Cancelled(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BuildflowError {
    /// Creates a stage-execution error.
    #[must_use]
    pub fn stage_execution(stage: PipelineStage, message: impl Into<String>) -> Self {
        Self::StageExecution {
            stage,
            message: message.into(),
        }
    }

    /// Creates a sub-task error.
    #[must_use]
    pub fn sub_task(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SubTask {
            task_id: task_id.into(),
            message: message.into(),
        }
    }
}

/// The category assigned to a classified failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Network/connectivity failure.
    Network,
    /// An operation timed out.
    Timeout,
    /// A required file or entity is missing.
    FileNotFound,
    /// A quality or policy check failed.
    Validation,
    /// A compile/build step failed.
    Build,
    /// A test run failed.
    Test,
    /// An authorization failure.
    Permission,
    /// Anything that matched no rule.
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::FileNotFound => "file_not_found",
            Self::Validation => "validation",
            Self::Build => "build",
            Self::Test => "test",
            Self::Permission => "permission",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl ErrorCategory {
    /// Classifies a raw failure message. Rules are checked in priority
    /// order: network, timeout, missing resource, validation, build,
    /// test, permission, otherwise unknown.
    #[must_use]
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("connect")
            || lower.contains("dns")
            || lower.contains("unreachable")
        {
            Self::Network
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout
        } else if lower.contains("not found")
            || lower.contains("no such file")
            || lower.contains("missing file")
            || lower.contains("enoent")
        {
            Self::FileNotFound
        } else if lower.contains("validation") || lower.contains("quality") || lower.contains("policy") {
            Self::Validation
        } else if lower.contains("build") || lower.contains("compile") || lower.contains("compilation") {
            Self::Build
        } else if lower.contains("test") || lower.contains("assertion") {
            Self::Test
        } else if lower.contains("permission")
            || lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("access denied")
        {
            Self::Permission
        } else {
            Self::Unknown
        }
    }

    /// Remediation text surfaced alongside a failed run.
    #[must_use]
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Network => "Check network connectivity and retry the stage.",
            Self::Timeout => "Increase the collaborator timeout or retry the stage.",
            Self::FileNotFound => "Verify the referenced file or entity exists before re-running.",
            Self::Validation => "Review the quality report and relax or fix the failing policy.",
            Self::Build => "Inspect the build log and fix the compilation error.",
            Self::Test => "Inspect the failing test output; the sub-task can be skipped.",
            Self::Permission => "Fix credentials or permissions; this failure is not retried.",
            Self::Unknown => "Inspect the error message; no automatic remediation is known.",
        }
    }
}

/// Returns whether a classified failure is recoverable.
///
/// Permission errors and syntax/parse/malformed-input failures always
/// abort regardless of any registered strategy.
#[must_use]
pub fn is_recoverable(category: ErrorCategory, message: &str) -> bool {
    if category == ErrorCategory::Permission {
        return false;
    }
    let lower = message.to_lowercase();
    !(lower.contains("syntax") || lower.contains("parse error") || lower.contains("malformed"))
}

/// A single recorded failure observation. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowError {
    /// The stage the failure occurred in.
    pub stage: PipelineStage,
    /// The assigned category.
    pub category: ErrorCategory,
    /// Human-readable message.
    pub message: String,
    /// Whether recovery is possible at all.
    pub recoverable: bool,
    /// Suggested remediation text.
    pub suggested_action: String,
    /// When the failure was recorded (ISO 8601).
    pub timestamp: String,
    /// Structured summary of the original cause, if distinct from the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl WorkflowError {
    /// Classifies a raw failure into a recorded workflow error.
    #[must_use]
    pub fn classify(stage: PipelineStage, message: impl Into<String>) -> Self {
        let message = message.into();
        let category = ErrorCategory::classify(&message);
        Self {
            stage,
            category,
            recoverable: is_recoverable(category, &message),
            suggested_action: category.suggested_action().to_string(),
            timestamp: iso_timestamp(),
            cause: None,
            message,
        }
    }

    /// Attaches a structured cause summary.
    #[must_use]
    pub fn with_cause(mut self, cause: impl Into<String>) -> Self {
        self.cause = Some(cause.into());
        self
    }

    /// The counter key used by the recovery policy engine.
    #[must_use]
    pub fn counter_key(&self) -> String {
        format!("{}:{}", self.stage, self.category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_classify_priority_order() {
        // "connection timed out" mentions both network and timeout;
        // network wins because it is checked first.
        assert_eq!(
            ErrorCategory::classify("connection timed out"),
            ErrorCategory::Network
        );
        assert_eq!(ErrorCategory::classify("request timed out"), ErrorCategory::Timeout);
        assert_eq!(
            ErrorCategory::classify("template not found"),
            ErrorCategory::FileNotFound
        );
        assert_eq!(
            ErrorCategory::classify("quality gate below threshold"),
            ErrorCategory::Validation
        );
        assert_eq!(ErrorCategory::classify("compile failed"), ErrorCategory::Build);
        assert_eq!(
            ErrorCategory::classify("assertion failed in suite"),
            ErrorCategory::Test
        );
        assert_eq!(
            ErrorCategory::classify("access denied by server"),
            ErrorCategory::Permission
        );
        assert_eq!(ErrorCategory::classify("something odd"), ErrorCategory::Unknown);
    }

    #[test]
    fn test_permission_never_recoverable() {
        assert!(!is_recoverable(ErrorCategory::Permission, "access denied"));
    }

    #[test]
    fn test_malformed_input_never_recoverable() {
        assert!(!is_recoverable(
            ErrorCategory::Unknown,
            "malformed requirement document"
        ));
        assert!(!is_recoverable(ErrorCategory::Validation, "syntax error at line 3"));
    }

    #[test]
    fn test_other_categories_recoverable() {
        assert!(is_recoverable(ErrorCategory::Network, "connection refused"));
        assert!(is_recoverable(ErrorCategory::Build, "compile failed"));
    }

    #[test]
    fn test_workflow_error_classify() {
        let err = WorkflowError::classify(PipelineStage::Discovery, "connection refused");
        assert_eq!(err.category, ErrorCategory::Network);
        assert!(err.recoverable);
        assert_eq!(err.counter_key(), "discovery:network");
    }

    #[test]
    fn test_workflow_error_serialization() {
        let err = WorkflowError::classify(PipelineStage::Execution, "build failed")
            .with_cause("exit status 1");
        let json = serde_json::to_string(&err).unwrap();
        let back: WorkflowError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.category, ErrorCategory::Build);
        assert_eq!(back.cause.as_deref(), Some("exit status 1"));
    }

    #[test]
    fn test_category_display() {
        assert_eq!(ErrorCategory::FileNotFound.to_string(), "file_not_found");
        assert_eq!(ErrorCategory::Network.to_string(), "network");
    }
}
