//! Progress tracker with fixed per-stage weights.
//!
//! Overall completion is `sum(weights of completed earlier stages) +
//! weight(stage) * local/100`, clamped to [0, 100]. The terminal Complete
//! stage always reports exactly 100. History is append-only and observers
//! are notified synchronously in registration order; this is a hot path,
//! so observers must not block materially.

use crate::session::PipelineStage;
use crate::utils::iso_timestamp;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Fixed stage weights: Discovery 20, Planning 15, Execution 65.
#[must_use]
pub fn stage_weight(stage: PipelineStage) -> f64 {
    match stage {
        PipelineStage::Discovery => 20.0,
        PipelineStage::Planning => 15.0,
        PipelineStage::Execution => 65.0,
        PipelineStage::Complete | PipelineStage::Failed => 0.0,
    }
}

fn completed_weight_before(stage: PipelineStage) -> f64 {
    match stage {
        PipelineStage::Discovery => 0.0,
        PipelineStage::Planning => 20.0,
        PipelineStage::Execution => 35.0,
        PipelineStage::Complete | PipelineStage::Failed => 100.0,
    }
}

/// Per-event status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// The stage is in flight.
    Running,
    /// The stage finished successfully.
    Completed,
    /// The stage failed.
    Failed,
}

/// One tick of observable progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// The stage the event belongs to.
    pub stage: PipelineStage,
    /// Per-event status.
    pub status: ProgressStatus,
    /// Free-text message.
    pub message: String,
    /// Computed overall percentage, 0-100.
    pub overall_percent: f64,
    /// When the event was recorded (ISO 8601).
    pub timestamp: String,
    /// Optional structured metadata (e.g. sub-task index/total).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Observer notified synchronously on every progress event.
pub trait ProgressObserver: Send + Sync {
    /// Called once per reported event, in registration order.
    fn on_progress(&self, event: &ProgressEvent);
}

/// Deterministic overall-percentage computation and replayable history.
#[derive(Default)]
pub struct ProgressTracker {
    history: RwLock<Vec<ProgressEvent>>,
    observers: RwLock<Vec<Arc<dyn ProgressObserver>>>,
}

impl ProgressTracker {
    /// Creates a new tracker with empty history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer. Observers are invoked in registration order.
    pub fn add_observer(&self, observer: Arc<dyn ProgressObserver>) {
        self.observers.write().push(observer);
    }

    /// Computes the overall percentage for a stage-local percentage.
    #[must_use]
    pub fn overall_percent(stage: PipelineStage, stage_local_percent: f64) -> f64 {
        if stage == PipelineStage::Complete {
            return 100.0;
        }
        let local = stage_local_percent.clamp(0.0, 100.0);
        let overall = completed_weight_before(stage) + stage_weight(stage) * local / 100.0;
        overall.clamp(0.0, 100.0)
    }

    /// Records one progress event and notifies observers.
    pub fn report(
        &self,
        stage: PipelineStage,
        stage_local_percent: f64,
        status: ProgressStatus,
        message: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) -> ProgressEvent {
        let event = ProgressEvent {
            stage,
            status,
            message: message.into(),
            overall_percent: Self::overall_percent(stage, stage_local_percent),
            timestamp: iso_timestamp(),
            metadata,
        };

        self.history.write().push(event.clone());

        let observers = self.observers.read();
        for observer in observers.iter() {
            observer.on_progress(&event);
        }

        event
    }

    /// Returns the time-ordered event history.
    #[must_use]
    pub fn history(&self) -> Vec<ProgressEvent> {
        self.history.read().clone()
    }

    /// Returns the number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    /// Returns true if no events have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.history.read().is_empty()
    }
}

/// A collecting observer for tests.
#[derive(Default)]
pub struct CollectingObserver {
    events: RwLock<Vec<ProgressEvent>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all observed events.
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.read().clone()
    }
}

impl ProgressObserver for CollectingObserver {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_weights_sum_to_100() {
        let sum = stage_weight(PipelineStage::Discovery)
            + stage_weight(PipelineStage::Planning)
            + stage_weight(PipelineStage::Execution);
        assert!((sum - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_overall_percent_discovery() {
        assert!((ProgressTracker::overall_percent(PipelineStage::Discovery, 0.0)).abs() < 1e-9);
        assert!(
            (ProgressTracker::overall_percent(PipelineStage::Discovery, 50.0) - 10.0).abs() < 1e-9
        );
        assert!(
            (ProgressTracker::overall_percent(PipelineStage::Discovery, 100.0) - 20.0).abs() < 1e-9
        );
    }

    #[test]
    fn test_overall_percent_later_stages() {
        assert!(
            (ProgressTracker::overall_percent(PipelineStage::Planning, 100.0) - 35.0).abs() < 1e-9
        );
        assert!(
            (ProgressTracker::overall_percent(PipelineStage::Execution, 50.0) - 67.5).abs() < 1e-9
        );
        assert!(
            (ProgressTracker::overall_percent(PipelineStage::Execution, 100.0) - 100.0).abs()
                < 1e-9
        );
    }

    #[test]
    fn test_complete_always_100() {
        assert!((ProgressTracker::overall_percent(PipelineStage::Complete, 0.0) - 100.0).abs() < 1e-9);
        assert!(
            (ProgressTracker::overall_percent(PipelineStage::Complete, 42.0) - 100.0).abs() < 1e-9
        );
    }

    #[test]
    fn test_out_of_range_input_clamped() {
        assert!(
            (ProgressTracker::overall_percent(PipelineStage::Discovery, 150.0) - 20.0).abs()
                < 1e-9
        );
        assert!((ProgressTracker::overall_percent(PipelineStage::Discovery, -5.0)).abs() < 1e-9);
    }

    #[test]
    fn test_history_append_only_ordering() {
        let tracker = ProgressTracker::new();
        tracker.report(PipelineStage::Discovery, 0.0, ProgressStatus::Running, "start", None);
        tracker.report(
            PipelineStage::Discovery,
            100.0,
            ProgressStatus::Completed,
            "done",
            None,
        );
        tracker.report(PipelineStage::Planning, 0.0, ProgressStatus::Running, "start", None);

        let history = tracker.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].message, "start");
        assert_eq!(history[1].stage, PipelineStage::Discovery);
        assert_eq!(history[2].stage, PipelineStage::Planning);
    }

    #[test]
    fn test_percent_non_decreasing_over_successful_run() {
        let tracker = ProgressTracker::new();
        for (stage, pct) in [
            (PipelineStage::Discovery, 0.0),
            (PipelineStage::Discovery, 100.0),
            (PipelineStage::Planning, 0.0),
            (PipelineStage::Planning, 100.0),
            (PipelineStage::Execution, 0.0),
            (PipelineStage::Execution, 50.0),
            (PipelineStage::Execution, 100.0),
            (PipelineStage::Complete, 100.0),
        ] {
            tracker.report(stage, pct, ProgressStatus::Running, "tick", None);
        }

        let history = tracker.history();
        for pair in history.windows(2) {
            assert!(pair[1].overall_percent >= pair[0].overall_percent);
        }
        assert!((history.last().unwrap().overall_percent - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_observers_notified_in_registration_order() {
        struct TaggingObserver {
            tag: &'static str,
            log: Arc<RwLock<Vec<&'static str>>>,
        }
        impl ProgressObserver for TaggingObserver {
            fn on_progress(&self, _event: &ProgressEvent) {
                self.log.write().push(self.tag);
            }
        }

        let log = Arc::new(RwLock::new(Vec::new()));
        let tracker = ProgressTracker::new();
        tracker.add_observer(Arc::new(TaggingObserver { tag: "first", log: log.clone() }));
        tracker.add_observer(Arc::new(TaggingObserver { tag: "second", log: log.clone() }));

        tracker.report(PipelineStage::Discovery, 0.0, ProgressStatus::Running, "tick", None);

        assert_eq!(*log.read(), vec!["first", "second"]);
    }

    #[test]
    fn test_event_metadata_roundtrip() {
        let tracker = ProgressTracker::new();
        let event = tracker.report(
            PipelineStage::Execution,
            25.0,
            ProgressStatus::Running,
            "sub-task 1/4",
            Some(serde_json::json!({"task_index": 1, "task_total": 4})),
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: ProgressEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.metadata.unwrap()["task_total"], 4);
    }
}
