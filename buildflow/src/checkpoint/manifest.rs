//! File manifests and the snapshot/restore collaborator.
//!
//! The manifest store is the external file-system collaborator behind
//! rollback. The directory implementation keeps a full copy per
//! checkpoint under a snapshot directory; rollback restores the copied
//! tree. Reverting database migrations is out of scope here.

use crate::errors::BuildflowError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

/// The set of artifact files present at a point in time, as paths
/// relative to the project root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileManifest {
    /// Relative file paths, sorted.
    pub files: Vec<PathBuf>,
}

impl FileManifest {
    /// Creates a manifest from an iterator of relative paths.
    pub fn from_paths(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        let set: BTreeSet<PathBuf> = paths.into_iter().collect();
        Self {
            files: set.into_iter().collect(),
        }
    }

    /// Returns the number of files in the manifest.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Returns true if the manifest is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// External collaborator that captures and restores on-disk state.
///
/// Captures are keyed by checkpoint id so a later restore can locate the
/// saved copy.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    /// Captures the current state under the given checkpoint id and
    /// returns the manifest of captured files.
    async fn capture(&self, checkpoint_id: u64) -> Result<FileManifest, BuildflowError>;

    /// Restores the state captured under the given checkpoint id.
    async fn restore(&self, checkpoint_id: u64) -> Result<(), BuildflowError>;
}

/// Directory-backed store: full copy per checkpoint under `snapshot_dir`.
pub struct DirManifestStore {
    root: PathBuf,
    snapshot_dir: PathBuf,
}

impl DirManifestStore {
    /// Creates a store over a project root. Snapshots live in a sibling
    /// directory so they are never captured themselves.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            snapshot_dir: snapshot_dir.into(),
        }
    }

    fn relative_files(&self) -> Result<Vec<PathBuf>, BuildflowError> {
        let mut files = Vec::new();
        if !self.root.exists() {
            return Ok(files);
        }
        for entry in WalkDir::new(&self.root).into_iter().filter_map(Result::ok) {
            let path = entry.path();
            if path.starts_with(&self.snapshot_dir) || !entry.file_type().is_file() {
                continue;
            }
            let rel = path
                .strip_prefix(&self.root)
                .map_err(|e| BuildflowError::Internal(e.to_string()))?;
            files.push(rel.to_path_buf());
        }
        files.sort();
        Ok(files)
    }

    fn copy_tree(from: &Path, to: &Path, files: &[PathBuf]) -> Result<(), BuildflowError> {
        for rel in files {
            let src = from.join(rel);
            let dst = to.join(rel);
            if let Some(parent) = dst.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&src, &dst)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ManifestStore for DirManifestStore {
    async fn capture(&self, checkpoint_id: u64) -> Result<FileManifest, BuildflowError> {
        let files = self.relative_files()?;
        let target = self.snapshot_dir.join(checkpoint_id.to_string());
        std::fs::create_dir_all(&target)?;
        Self::copy_tree(&self.root, &target, &files)?;
        info!(checkpoint_id, file_count = files.len(), "Captured snapshot");
        Ok(FileManifest::from_paths(files))
    }

    async fn restore(&self, checkpoint_id: u64) -> Result<(), BuildflowError> {
        let source = self.snapshot_dir.join(checkpoint_id.to_string());
        if !source.exists() {
            return Err(BuildflowError::CheckpointNotFound { id: checkpoint_id });
        }

        // Drop files created after the snapshot, then copy the saved
        // tree back in place.
        for rel in self.relative_files()? {
            std::fs::remove_file(self.root.join(&rel))?;
        }

        let mut saved = Vec::new();
        for entry in WalkDir::new(&source).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(&source)
                    .map_err(|e| BuildflowError::Internal(e.to_string()))?;
                saved.push(rel.to_path_buf());
            }
        }
        Self::copy_tree(&source, &self.root, &saved)?;
        info!(checkpoint_id, file_count = saved.len(), "Restored snapshot");
        Ok(())
    }
}

/// In-memory store for tests: returns configured manifests and records
/// restore calls.
#[derive(Default)]
pub struct RecordingManifestStore {
    manifests: Mutex<Vec<(u64, FileManifest)>>,
    restored: Mutex<Vec<u64>>,
    next_manifest: Mutex<FileManifest>,
}

impl RecordingManifestStore {
    /// Creates an empty recording store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the manifest returned by the next captures.
    pub fn set_manifest(&self, manifest: FileManifest) {
        *self.next_manifest.lock() = manifest;
    }

    /// Checkpoint ids restore was called with, in order.
    #[must_use]
    pub fn restored_ids(&self) -> Vec<u64> {
        self.restored.lock().clone()
    }

    /// Number of captures performed.
    #[must_use]
    pub fn capture_count(&self) -> usize {
        self.manifests.lock().len()
    }
}

#[async_trait]
impl ManifestStore for RecordingManifestStore {
    async fn capture(&self, checkpoint_id: u64) -> Result<FileManifest, BuildflowError> {
        let manifest = self.next_manifest.lock().clone();
        self.manifests.lock().push((checkpoint_id, manifest.clone()));
        Ok(manifest)
    }

    async fn restore(&self, checkpoint_id: u64) -> Result<(), BuildflowError> {
        self.restored.lock().push(checkpoint_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_manifest_from_paths_sorted_dedup() {
        let manifest = FileManifest::from_paths(vec![
            PathBuf::from("src/b.rs"),
            PathBuf::from("src/a.rs"),
            PathBuf::from("src/a.rs"),
        ]);
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest.files[0], PathBuf::from("src/a.rs"));
    }

    #[tokio::test]
    async fn test_dir_store_capture_and_restore() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        let snapshots = dir.path().join("snapshots");
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::write(root.join("src/main.rs"), "fn main() {}").unwrap();

        let store = DirManifestStore::new(&root, &snapshots);
        let manifest = store.capture(1).await.unwrap();
        assert_eq!(manifest.len(), 1);

        // Mutate the tree after the snapshot.
        std::fs::write(root.join("src/main.rs"), "fn main() { broken }").unwrap();
        std::fs::write(root.join("src/extra.rs"), "// extra").unwrap();

        store.restore(1).await.unwrap();

        let content = std::fs::read_to_string(root.join("src/main.rs")).unwrap();
        assert_eq!(content, "fn main() {}");
        assert!(!root.join("src/extra.rs").exists());
    }

    #[tokio::test]
    async fn test_dir_store_restore_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirManifestStore::new(dir.path().join("p"), dir.path().join("s"));
        let err = store.restore(99).await.unwrap_err();
        assert!(matches!(err, BuildflowError::CheckpointNotFound { id: 99 }));
    }

    #[tokio::test]
    async fn test_recording_store() {
        let store = RecordingManifestStore::new();
        store.set_manifest(FileManifest::from_paths(vec![PathBuf::from("a.rs")]));

        let manifest = store.capture(1).await.unwrap();
        assert_eq!(manifest.len(), 1);
        assert_eq!(store.capture_count(), 1);

        store.restore(1).await.unwrap();
        assert_eq!(store.restored_ids(), vec![1]);
    }
}
