//! Minimal built-in collaborators.
//!
//! These are deliberately small, deterministic implementations so the
//! pipeline runs end-to-end out of the box; real deployments substitute
//! their own executors behind the same traits.

use super::{
    DiscoveryArtifact, DiscoveryExecutor, PlanningArtifact, PlanningExecutor, QualityMetadata,
    SubTask, SubTaskKind, TaskOutcome, TaskRunner,
};
use crate::errors::BuildflowError;
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

const SETUP_MINUTES: u64 = 15;
const FEATURE_MINUTES: u64 = 30;

/// Keyword-based project detection over the raw requirement text.
#[derive(Debug, Default, Clone)]
pub struct KeywordDiscoveryExecutor;

impl KeywordDiscoveryExecutor {
    /// Creates the executor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn detect_kind(requirement: &str) -> &'static str {
        let lower = requirement.to_lowercase();
        if lower.contains("landing") || lower.contains("marketing") {
            "landing_page"
        } else if lower.contains("saas") || lower.contains("dashboard") || lower.contains("app") {
            "web_app"
        } else if lower.contains("cli") || lower.contains("command") {
            "cli_tool"
        } else {
            "web_app"
        }
    }

    fn extract_features(requirement: &str) -> Vec<String> {
        let lower = requirement.to_lowercase();
        let mut features = Vec::new();
        for (keyword, feature) in [
            ("auth", "user authentication"),
            ("login", "user authentication"),
            ("dashboard", "dashboard"),
            ("team", "team management"),
            ("task", "task tracking"),
            ("notif", "notifications"),
            ("form", "contact form"),
            ("pricing", "pricing table"),
        ] {
            if lower.contains(keyword) && !features.contains(&feature.to_string()) {
                features.push(feature.to_string());
            }
        }
        if features.is_empty() {
            features.push("core feature".to_string());
        }
        features
    }
}

#[async_trait]
impl DiscoveryExecutor for KeywordDiscoveryExecutor {
    async fn execute(
        &self,
        requirement: &str,
    ) -> Result<(DiscoveryArtifact, QualityMetadata), BuildflowError> {
        let trimmed = requirement.trim();
        if trimmed.is_empty() {
            return Err(BuildflowError::Internal(
                "malformed requirement: empty description".to_string(),
            ));
        }

        let features = Self::extract_features(trimmed);
        let project_name = features
            .first()
            .map(|f| f.replace(' ', "-"))
            .unwrap_or_else(|| "project".to_string());

        debug!(kind = Self::detect_kind(trimmed), features = features.len(), "Requirement analyzed");

        let artifact = DiscoveryArtifact {
            project_name,
            project_kind: Self::detect_kind(trimmed).to_string(),
            summary: trimmed.to_string(),
            estimated_minutes: SETUP_MINUTES + features.len() as u64 * FEATURE_MINUTES,
            features,
        };
        Ok((artifact, QualityMetadata::with_score(0.75)))
    }
}

/// Expands each discovered feature into scaffold/build/validate/test
/// tasks with checkpoint markers after the mutating steps.
#[derive(Debug, Default, Clone)]
pub struct TemplatePlanningExecutor;

impl TemplatePlanningExecutor {
    /// Creates the executor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PlanningExecutor for TemplatePlanningExecutor {
    async fn execute(
        &self,
        discovery: &DiscoveryArtifact,
    ) -> Result<(PlanningArtifact, QualityMetadata), BuildflowError> {
        let mut tasks = vec![SubTask::new("setup", "project scaffold", SubTaskKind::Scaffold)
            .with_checkpoint()];

        for (index, feature) in discovery.features.iter().enumerate() {
            let slug = feature.replace(' ', "-");
            let build_id = format!("build-{slug}");
            let validate_id = format!("validate-{slug}");

            tasks.push(
                SubTask::new(&build_id, format!("build {feature}"), SubTaskKind::Build)
                    .depends_on("setup")
                    .independent()
                    .with_checkpoint(),
            );
            tasks.push(
                SubTask::new(&validate_id, format!("validate {feature}"), SubTaskKind::Validate)
                    .depends_on(&build_id),
            );
            if index == discovery.features.len() - 1 {
                tasks.push(
                    SubTask::new(format!("test-{slug}"), format!("test {feature}"), SubTaskKind::Test)
                        .depends_on(&validate_id),
                );
            }
        }

        let artifact = PlanningArtifact {
            estimated_minutes: discovery.estimated_minutes,
            tasks,
        };
        Ok((artifact, QualityMetadata::with_score(0.8)))
    }
}

/// Writes placeholder files into the output directory, one per task.
#[derive(Debug, Clone)]
pub struct ScaffoldTaskRunner {
    output_dir: PathBuf,
}

impl ScaffoldTaskRunner {
    /// Creates a runner writing under the given project directory.
    #[must_use]
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl TaskRunner for ScaffoldTaskRunner {
    async fn run(&self, task: &SubTask) -> Result<TaskOutcome, BuildflowError> {
        match task.kind {
            SubTaskKind::Scaffold | SubTaskKind::Build => {
                // Private per-task namespace keeps parallel tasks from
                // writing over each other.
                let path = self.output_dir.join(&task.id).join("README.md");
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, format!("# {}\n", task.name)).await?;
                Ok(TaskOutcome {
                    files_created: vec![path],
                    files_modified: Vec::new(),
                    quality_score: Some(0.8),
                })
            }
            SubTaskKind::Validate | SubTaskKind::Test => Ok(TaskOutcome {
                files_created: Vec::new(),
                files_modified: Vec::new(),
                quality_score: Some(0.9),
            }),
        }
    }
}
