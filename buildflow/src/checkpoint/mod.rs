//! Checkpoint creation and rollback for the execution stage.

mod manager;
mod manifest;

pub use manager::{Checkpoint, CheckpointManager};
pub use manifest::{DirManifestStore, FileManifest, ManifestStore, RecordingManifestStore};
