//! Weighted progress computation and append-only event history.

mod tracker;

pub use tracker::{
    stage_weight, CollectingObserver, ProgressEvent, ProgressObserver, ProgressStatus,
    ProgressTracker,
};
