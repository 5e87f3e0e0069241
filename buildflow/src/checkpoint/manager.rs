//! Checkpoint bookkeeping: ordered creation and rollback.

use super::{FileManifest, ManifestStore};
use crate::errors::BuildflowError;
use crate::utils::iso_timestamp;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// A restorable point within the execution stage.
///
/// Never mutated after creation, except for the `can_rollback` flag which
/// is cleared when a rollback invalidates later checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Monotonically increasing id within a session, starting at 1.
    pub id: u64,
    /// Creation time (ISO 8601).
    pub created_at: String,
    /// The sub-task this checkpoint follows.
    pub after_task_id: String,
    /// Manifest of artifact files at this point.
    pub manifest: FileManifest,
    /// The last quality signal observed, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    /// False when the snapshot is known incomplete or a later rollback
    /// invalidated this checkpoint.
    pub can_rollback: bool,
}

/// Creates and restores checkpoints for one session.
///
/// Creation is serialized through the internal lock so checkpoint ids
/// stay strictly ordered even when sub-tasks run in parallel.
pub struct CheckpointManager {
    store: Arc<dyn ManifestStore>,
    create_lock: tokio::sync::Mutex<()>,
    checkpoints: Mutex<Vec<Checkpoint>>,
}

impl CheckpointManager {
    /// Creates a manager backed by the given manifest store.
    #[must_use]
    pub fn new(store: Arc<dyn ManifestStore>) -> Self {
        Self {
            store,
            create_lock: tokio::sync::Mutex::new(()),
            checkpoints: Mutex::new(Vec::new()),
        }
    }

    /// The id the next checkpoint will receive (`count + 1`).
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.checkpoints.lock().len() as u64 + 1
    }

    /// Captures current state and appends a new checkpoint.
    pub async fn create(
        &self,
        after_task_id: impl Into<String>,
        quality_score: Option<f64>,
    ) -> Result<Checkpoint, BuildflowError> {
        // Held across the capture so parallel sub-tasks cannot mint the
        // same id or interleave snapshots.
        let _guard = self.create_lock.lock().await;
        let id = self.next_id();
        let manifest = self.store.capture(id).await?;

        let checkpoint = Checkpoint {
            id,
            created_at: iso_timestamp(),
            after_task_id: after_task_id.into(),
            manifest,
            quality_score,
            can_rollback: true,
        };

        info!(
            checkpoint_id = checkpoint.id,
            after_task = %checkpoint.after_task_id,
            "Checkpoint created"
        );
        self.checkpoints.lock().push(checkpoint.clone());
        Ok(checkpoint)
    }

    /// Rolls back to the given checkpoint.
    ///
    /// Fails with `CheckpointNotFound` if absent, `CheckpointNotRestorable`
    /// if its flag is cleared. On success, checkpoints created after the
    /// target stay in the list for audit but become non-restorable, and
    /// the target's `after_task_id` is returned so the caller knows which
    /// sub-task to resume from.
    pub async fn rollback(&self, to_checkpoint_id: u64) -> Result<String, BuildflowError> {
        let after_task_id = {
            let checkpoints = self.checkpoints.lock();
            let target = checkpoints
                .iter()
                .find(|c| c.id == to_checkpoint_id)
                .ok_or(BuildflowError::CheckpointNotFound { id: to_checkpoint_id })?;
            if !target.can_rollback {
                return Err(BuildflowError::CheckpointNotRestorable { id: to_checkpoint_id });
            }
            target.after_task_id.clone()
        };

        self.store.restore(to_checkpoint_id).await?;

        let mut checkpoints = self.checkpoints.lock();
        for checkpoint in checkpoints.iter_mut() {
            if checkpoint.id > to_checkpoint_id && checkpoint.can_rollback {
                warn!(checkpoint_id = checkpoint.id, "Checkpoint invalidated by rollback");
                checkpoint.can_rollback = false;
            }
        }

        info!(checkpoint_id = to_checkpoint_id, after_task = %after_task_id, "Rolled back");
        Ok(after_task_id)
    }

    /// The most recent checkpoint that is still restorable.
    #[must_use]
    pub fn latest_restorable(&self) -> Option<Checkpoint> {
        self.checkpoints
            .lock()
            .iter()
            .rev()
            .find(|c| c.can_rollback)
            .cloned()
    }

    /// All checkpoints in creation order.
    #[must_use]
    pub fn list(&self) -> Vec<Checkpoint> {
        self.checkpoints.lock().clone()
    }

    /// Number of checkpoints created.
    #[must_use]
    pub fn len(&self) -> usize {
        self.checkpoints.lock().len()
    }

    /// Returns true if no checkpoints exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.checkpoints.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::RecordingManifestStore;
    use pretty_assertions::assert_eq;

    fn manager() -> (Arc<RecordingManifestStore>, CheckpointManager) {
        let store = Arc::new(RecordingManifestStore::new());
        let manager = CheckpointManager::new(store.clone());
        (store, manager)
    }

    #[tokio::test]
    async fn test_ids_strictly_increasing() {
        let (_store, manager) = manager();
        let a = manager.create("task-1", Some(0.9)).await.unwrap();
        let b = manager.create("task-2", None).await.unwrap();
        let c = manager.create("task-3", Some(0.7)).await.unwrap();

        assert_eq!((a.id, b.id, c.id), (1, 2, 3));
        assert_eq!(manager.next_id(), 4);
    }

    #[tokio::test]
    async fn test_rollback_returns_task_and_invalidates_later() {
        let (store, manager) = manager();
        manager.create("task-1", None).await.unwrap();
        manager.create("task-2", None).await.unwrap();
        manager.create("task-3", None).await.unwrap();

        let resume_from = manager.rollback(1).await.unwrap();
        assert_eq!(resume_from, "task-1");
        assert_eq!(store.restored_ids(), vec![1]);

        let list = manager.list();
        assert_eq!(list.len(), 3);
        assert!(list[0].can_rollback);
        assert!(!list[1].can_rollback);
        assert!(!list[2].can_rollback);
    }

    #[tokio::test]
    async fn test_rollback_missing_checkpoint() {
        let (_store, manager) = manager();
        let err = manager.rollback(7).await.unwrap_err();
        assert!(matches!(err, BuildflowError::CheckpointNotFound { id: 7 }));
    }

    #[tokio::test]
    async fn test_rollback_invalidated_checkpoint_fails() {
        let (_store, manager) = manager();
        manager.create("task-1", None).await.unwrap();
        manager.create("task-2", None).await.unwrap();

        manager.rollback(1).await.unwrap();
        let err = manager.rollback(2).await.unwrap_err();
        assert!(matches!(err, BuildflowError::CheckpointNotRestorable { id: 2 }));
    }

    #[tokio::test]
    async fn test_latest_restorable_skips_invalidated() {
        let (_store, manager) = manager();
        manager.create("task-1", None).await.unwrap();
        manager.create("task-2", None).await.unwrap();
        manager.rollback(1).await.unwrap();

        let latest = manager.latest_restorable().unwrap();
        assert_eq!(latest.id, 1);
    }
}
