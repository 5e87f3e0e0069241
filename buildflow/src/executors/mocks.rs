//! Scripted executors for tests.
//!
//! Each mock replays a queue of outcomes and records how it was called,
//! so tests can assert retry counts and stage re-entry behavior.

use super::{
    DiscoveryArtifact, DiscoveryExecutor, PlanningArtifact, PlanningExecutor, QualityMetadata,
    SubTask, TaskOutcome, TaskRunner,
};
use crate::errors::BuildflowError;
use crate::session::PipelineStage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// A sample discovery artifact for tests.
#[must_use]
pub fn sample_discovery() -> DiscoveryArtifact {
    DiscoveryArtifact {
        project_name: "sample-project".to_string(),
        project_kind: "web_app".to_string(),
        summary: "a sample project".to_string(),
        features: vec!["homepage".to_string()],
        estimated_minutes: 45,
    }
}

/// A sample planning artifact over the given tasks.
#[must_use]
pub fn sample_plan(tasks: Vec<SubTask>) -> PlanningArtifact {
    PlanningArtifact {
        tasks,
        estimated_minutes: 30,
    }
}

type StageScript<T> = Mutex<VecDeque<Result<T, String>>>;

/// Discovery executor that replays scripted outcomes.
///
/// When the script runs out it keeps returning the sample artifact, which
/// makes "fail n times then succeed" scenarios trivial to express.
#[derive(Default)]
pub struct ScriptedDiscoveryExecutor {
    script: StageScript<DiscoveryArtifact>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedDiscoveryExecutor {
    /// Creates an executor that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a failure with the given message.
    #[must_use]
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.script.lock().push_back(Err(message.into()));
        self
    }

    /// Queues a success with the given artifact.
    #[must_use]
    pub fn then_succeed(self, artifact: DiscoveryArtifact) -> Self {
        self.script.lock().push_back(Ok(artifact));
        self
    }

    /// Number of times `execute` was invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// The requirement passed on each call.
    #[must_use]
    pub fn recorded_inputs(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DiscoveryExecutor for ScriptedDiscoveryExecutor {
    async fn execute(
        &self,
        requirement: &str,
    ) -> Result<(DiscoveryArtifact, QualityMetadata), BuildflowError> {
        self.calls.lock().push(requirement.to_string());
        match self.script.lock().pop_front() {
            Some(Err(message)) => Err(BuildflowError::stage_execution(
                PipelineStage::Discovery,
                message,
            )),
            Some(Ok(artifact)) => Ok((artifact, QualityMetadata::with_score(0.9))),
            None => Ok((sample_discovery(), QualityMetadata::with_score(0.9))),
        }
    }
}

/// Planning executor that replays scripted outcomes.
pub struct ScriptedPlanningExecutor {
    script: StageScript<PlanningArtifact>,
    fallback: PlanningArtifact,
    calls: Mutex<usize>,
}

impl ScriptedPlanningExecutor {
    /// Creates an executor that always returns the fallback plan.
    #[must_use]
    pub fn new(fallback: PlanningArtifact) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: Mutex::new(0),
        }
    }

    /// Queues a failure with the given message.
    #[must_use]
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        self.script.lock().push_back(Err(message.into()));
        self
    }

    /// Number of times `execute` was invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl PlanningExecutor for ScriptedPlanningExecutor {
    async fn execute(
        &self,
        _discovery: &DiscoveryArtifact,
    ) -> Result<(PlanningArtifact, QualityMetadata), BuildflowError> {
        *self.calls.lock() += 1;
        match self.script.lock().pop_front() {
            Some(Err(message)) => Err(BuildflowError::stage_execution(
                PipelineStage::Planning,
                message,
            )),
            Some(Ok(artifact)) => Ok((artifact, QualityMetadata::with_score(0.9))),
            None => Ok((self.fallback.clone(), QualityMetadata::with_score(0.9))),
        }
    }
}

/// Task runner that replays per-task scripted outcomes.
#[derive(Default)]
pub struct ScriptedTaskRunner {
    scripts: Mutex<HashMap<String, VecDeque<Result<TaskOutcome, String>>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTaskRunner {
    /// Creates a runner where every task succeeds with an empty outcome.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a failure for the given task id.
    pub fn fail_task(&self, task_id: impl Into<String>, message: impl Into<String>) {
        self.scripts
            .lock()
            .entry(task_id.into())
            .or_default()
            .push_back(Err(message.into()));
    }

    /// Queues a success outcome for the given task id.
    pub fn succeed_task(&self, task_id: impl Into<String>, outcome: TaskOutcome) {
        self.scripts
            .lock()
            .entry(task_id.into())
            .or_default()
            .push_back(Ok(outcome));
    }

    /// Task ids in invocation order.
    #[must_use]
    pub fn invocations(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// How many times the given task was run.
    #[must_use]
    pub fn runs_of(&self, task_id: &str) -> usize {
        self.calls.lock().iter().filter(|id| *id == task_id).count()
    }
}

#[async_trait]
impl TaskRunner for ScriptedTaskRunner {
    async fn run(&self, task: &SubTask) -> Result<TaskOutcome, BuildflowError> {
        self.calls.lock().push(task.id.clone());
        let next = self.scripts.lock().get_mut(&task.id).and_then(VecDeque::pop_front);
        match next {
            Some(Err(message)) => Err(BuildflowError::sub_task(&task.id, message)),
            Some(Ok(outcome)) => Ok(outcome),
            None => Ok(TaskOutcome::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::SubTaskKind;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_scripted_discovery_fail_then_succeed() {
        let executor = ScriptedDiscoveryExecutor::new().then_fail("connection refused");

        assert!(executor.execute("req").await.is_err());
        assert!(executor.execute("req").await.is_ok());
        assert_eq!(executor.call_count(), 2);
        assert_eq!(executor.recorded_inputs(), vec!["req", "req"]);
    }

    #[tokio::test]
    async fn test_scripted_runner_per_task_scripts() {
        let runner = ScriptedTaskRunner::new();
        runner.fail_task("t1", "build failed");

        let t1 = SubTask::new("t1", "one", SubTaskKind::Build);
        let t2 = SubTask::new("t2", "two", SubTaskKind::Build);

        assert!(runner.run(&t1).await.is_err());
        assert!(runner.run(&t1).await.is_ok());
        assert!(runner.run(&t2).await.is_ok());
        assert_eq!(runner.runs_of("t1"), 2);
    }
}
