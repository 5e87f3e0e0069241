//! Durable session storage.
//!
//! Sessions are written on pause (and on cancellation for postmortem),
//! read back on resume, and deleted on successful completion. Planning
//! and execution artifacts are stored as sibling files and referenced by
//! path rather than inlined.

use super::{PipelineSession, PipelineStage, SessionStatus};
use crate::errors::{BuildflowError, WorkflowError};
use crate::executors::{DiscoveryArtifact, ExecutionArtifact, PlanningArtifact};
use crate::progress::ProgressEvent;
use crate::utils::{now_utc, Timestamp};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;

/// The persisted session document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionDocument {
    id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project_name: Option<String>,
    requirement: String,
    stage: PipelineStage,
    status: SessionStatus,
    started_at: Timestamp,
    updated_at: Timestamp,
    discovery_complete: bool,
    planning_complete: bool,
    execution_complete: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    discovery: Option<DiscoveryArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    planning_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    execution_path: Option<PathBuf>,
    #[serde(default)]
    errors: Vec<WorkflowError>,
    #[serde(default)]
    progress: Vec<ProgressEvent>,
}

/// File-backed session store rooted at one directory.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    /// Creates a store rooted at `dir`. The directory is created lazily
    /// on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The path the session document is written to.
    #[must_use]
    pub fn session_path(&self, session_id: Uuid) -> PathBuf {
        self.dir.join(format!("session-{}.json", session_id.simple()))
    }

    fn artifact_path(&self, session_id: Uuid, stage: PipelineStage) -> PathBuf {
        self.dir
            .join(format!("{stage}-{}.json", session_id.simple()))
    }

    /// Persists a session, returning the document path.
    pub fn save(&self, session: &PipelineSession) -> Result<PathBuf, BuildflowError> {
        std::fs::create_dir_all(&self.dir)?;

        let planning_path = session
            .planning
            .as_ref()
            .map(|artifact| {
                let path = self.artifact_path(session.id, PipelineStage::Planning);
                write_json(&path, artifact)?;
                Ok::<_, BuildflowError>(path)
            })
            .transpose()?;

        let execution_path = session
            .execution
            .as_ref()
            .map(|artifact| {
                let path = self.artifact_path(session.id, PipelineStage::Execution);
                write_json(&path, artifact)?;
                Ok::<_, BuildflowError>(path)
            })
            .transpose()?;

        let document = SessionDocument {
            id: session.id,
            project_name: session.project_name.clone(),
            requirement: session.requirement.clone(),
            stage: session.stage,
            status: session.status,
            started_at: session.started_at,
            updated_at: now_utc(),
            discovery_complete: session.stage_complete(PipelineStage::Discovery),
            planning_complete: session.stage_complete(PipelineStage::Planning),
            execution_complete: session.stage_complete(PipelineStage::Execution),
            discovery: session.discovery.clone(),
            planning_path,
            execution_path,
            errors: session.errors.clone(),
            progress: session.progress.clone(),
        };

        let path = self.session_path(session.id);
        write_json(&path, &document)?;
        info!(session_id = %session.id, path = %path.display(), "Session persisted");
        Ok(path)
    }

    /// Loads a session from a persisted document path.
    pub fn load(&self, path: &Path) -> Result<PipelineSession, BuildflowError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BuildflowError::Persistence(format!("{}: {e}", path.display())))?;
        let document: SessionDocument = serde_json::from_str(&raw)?;

        let planning: Option<PlanningArtifact> = document
            .planning_path
            .as_deref()
            .map(read_json)
            .transpose()?;
        let execution: Option<ExecutionArtifact> = document
            .execution_path
            .as_deref()
            .map(read_json)
            .transpose()?;

        debug!(session_id = %document.id, stage = %document.stage, "Session loaded");

        Ok(PipelineSession {
            id: document.id,
            project_name: document.project_name,
            requirement: document.requirement,
            stage: document.stage,
            status: document.status,
            started_at: document.started_at,
            updated_at: document.updated_at,
            discovery: document.discovery,
            planning,
            execution,
            errors: document.errors,
            progress: document.progress,
            checkpoints: Vec::new(),
        })
    }

    /// Loads a session by id from this store's directory.
    pub fn load_by_id(&self, session_id: Uuid) -> Result<PipelineSession, BuildflowError> {
        self.load(&self.session_path(session_id))
    }

    /// Removes the session document and its artifact files.
    pub fn delete(&self, session_id: Uuid) -> Result<(), BuildflowError> {
        for path in [
            self.session_path(session_id),
            self.artifact_path(session_id, PipelineStage::Planning),
            self.artifact_path(session_id, PipelineStage::Execution),
        ] {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }
        info!(session_id = %session_id, "Session state cleared");
        Ok(())
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), BuildflowError> {
    let raw = serde_json::to_string_pretty(value)?;
    std::fs::write(path, raw)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, BuildflowError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| BuildflowError::Persistence(format!("{}: {e}", path.display())))?;
    Ok(serde_json::from_str(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::mocks::{sample_discovery, sample_plan};
    use crate::executors::{SubTask, SubTaskKind};
    use pretty_assertions::assert_eq;

    fn paused_session() -> PipelineSession {
        let mut session = PipelineSession::new("build a blog");
        session.discovery = Some(sample_discovery());
        session.planning = Some(sample_plan(vec![SubTask::new(
            "t1",
            "one",
            SubTaskKind::Scaffold,
        )]));
        session.stage = PipelineStage::Execution;
        session.status = SessionStatus::Paused;
        session.project_name = Some("sample-project".to_string());
        session
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = paused_session();

        let path = store.save(&session).unwrap();
        let loaded = store.load(&path).unwrap();

        assert_eq!(loaded.id, session.id);
        assert_eq!(loaded.requirement, "build a blog");
        assert_eq!(loaded.stage, PipelineStage::Execution);
        assert_eq!(loaded.status, SessionStatus::Paused);
        assert!(loaded.discovery.is_some());
        assert_eq!(loaded.planning.unwrap().task_count(), 1);
        assert!(loaded.execution.is_none());
    }

    #[test]
    fn test_planning_artifact_stored_by_reference() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = paused_session();

        let path = store.save(&session).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: serde_json::Value = serde_json::from_str(&raw).unwrap();

        assert!(doc["planning_path"].is_string());
        assert!(doc.get("planning").is_none());
        assert!(doc["discovery_complete"].as_bool().unwrap());
        assert!(doc["planning_complete"].as_bool().unwrap());
        assert!(!doc["execution_complete"].as_bool().unwrap());
    }

    #[test]
    fn test_delete_removes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let session = paused_session();

        let path = store.save(&session).unwrap();
        assert!(path.exists());

        store.delete(session.id).unwrap();
        assert!(!path.exists());
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path());
        let err = store.load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, BuildflowError::Persistence(_)));
    }
}
