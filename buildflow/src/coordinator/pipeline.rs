//! The pipeline coordinator: owns the stage loop, delegates stage work to
//! executors, and consults the recovery policy engine on every failure.
//!
//! The coordinator is the only writer of session state. Stage transitions
//! follow the fixed Discovery -> Planning -> Execution -> Complete order;
//! a retry re-invokes only the failing stage or sub-task, never the whole
//! pipeline. Cancellation is observed between stages and between
//! sub-tasks, never mid-flight.

use super::{PipelineConfig, PipelineResult, RunMetrics};
use crate::cancellation::CancellationToken;
use crate::checkpoint::{CheckpointManager, DirManifestStore, ManifestStore};
use crate::errors::{BuildflowError, WorkflowError};
use crate::executors::{
    DiscoveryExecutor, ExecutionArtifact, KeywordDiscoveryExecutor, PlanningExecutor,
    ScaffoldTaskRunner, SubTask, SubTaskResult, TaskRunner, TemplatePlanningExecutor,
};
use crate::progress::{ProgressEvent, ProgressObserver, ProgressStatus, ProgressTracker};
use crate::recovery::{RecoveryAction, RecoveryPolicyEngine, StrategyTable};
use crate::session::{PipelineSession, PipelineStage, SessionStatus, SessionStore};
use crate::utils::{now_utc, Timestamp};
use futures::future::join_all;
use serde_json::json;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

fn elapsed_ms(start: Timestamp) -> u64 {
    (now_utc() - start).num_milliseconds().max(0) as u64
}

/// The outcome of one sub-task, including every failure observed while
/// the recovery engine retried it.
struct TaskVerdict {
    result: SubTaskResult,
    errors: Vec<WorkflowError>,
    fatal: bool,
}

/// Drives sessions through the staged build pipeline.
pub struct PipelineCoordinator {
    config: PipelineConfig,
    project_dir: PathBuf,
    discovery: Arc<dyn DiscoveryExecutor>,
    planning: Arc<dyn PlanningExecutor>,
    runner: Arc<dyn TaskRunner>,
    manifest_store: Arc<dyn ManifestStore>,
    strategies: Arc<StrategyTable>,
    tracker: Arc<ProgressTracker>,
    store: SessionStore,
    cancel: Arc<CancellationToken>,
}

impl PipelineCoordinator {
    /// Creates a coordinator with the built-in executors, writing the
    /// project under `<output_dir>/project` and checkpoint snapshots
    /// under `<output_dir>/checkpoints`.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let project_dir = config.output_dir.join("project");
        let snapshot_dir = config.output_dir.join("checkpoints");
        Self {
            discovery: Arc::new(KeywordDiscoveryExecutor::new()),
            planning: Arc::new(TemplatePlanningExecutor::new()),
            runner: Arc::new(ScaffoldTaskRunner::new(&project_dir)),
            manifest_store: Arc::new(DirManifestStore::new(&project_dir, snapshot_dir)),
            strategies: Arc::new(StrategyTable::with_defaults()),
            tracker: Arc::new(ProgressTracker::new()),
            store: SessionStore::new(&config.output_dir),
            cancel: Arc::new(CancellationToken::new()),
            project_dir,
            config,
        }
    }

    /// Replaces the discovery executor.
    #[must_use]
    pub fn with_discovery_executor(mut self, executor: Arc<dyn DiscoveryExecutor>) -> Self {
        self.discovery = executor;
        self
    }

    /// Replaces the planning executor.
    #[must_use]
    pub fn with_planning_executor(mut self, executor: Arc<dyn PlanningExecutor>) -> Self {
        self.planning = executor;
        self
    }

    /// Replaces the sub-task runner.
    #[must_use]
    pub fn with_task_runner(mut self, runner: Arc<dyn TaskRunner>) -> Self {
        self.runner = runner;
        self
    }

    /// Replaces the checkpoint manifest store.
    #[must_use]
    pub fn with_manifest_store(mut self, store: Arc<dyn ManifestStore>) -> Self {
        self.manifest_store = store;
        self
    }

    /// Replaces the recovery strategy table. Must happen before a run.
    #[must_use]
    pub fn with_strategy_table(mut self, table: StrategyTable) -> Self {
        self.strategies = Arc::new(table);
        self
    }

    /// Registers a progress observer.
    pub fn add_observer(&self, observer: Arc<dyn ProgressObserver>) {
        self.tracker.add_observer(observer);
    }

    /// A handle that cancels in-flight and future runs on this coordinator.
    #[must_use]
    pub fn cancel_token(&self) -> Arc<CancellationToken> {
        Arc::clone(&self.cancel)
    }

    /// Requests cooperative cancellation.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.cancel.cancel(reason);
    }

    /// The full progress event history across runs on this coordinator.
    #[must_use]
    pub fn progress_history(&self) -> Vec<ProgressEvent> {
        self.tracker.history()
    }

    /// The session store backing pause/resume.
    #[must_use]
    pub fn session_store(&self) -> &SessionStore {
        &self.store
    }

    /// Runs a new session for the given requirement to a terminal outcome.
    pub async fn run(
        &self,
        requirement: impl Into<String>,
    ) -> Result<PipelineResult, BuildflowError> {
        let mut session = PipelineSession::new(requirement);
        session.status = SessionStatus::Running;
        self.drive(session, false).await
    }

    /// Resumes a paused or cancelled session from the store.
    ///
    /// The session is re-driven from its first incomplete stage; stages
    /// whose artifacts were persisted are not re-executed. Checkpoints do
    /// not survive a pause, so the resumed run starts with none. Failed
    /// sessions are kept for postmortem only and cannot be resumed.
    pub async fn resume(&self, session_id: Uuid) -> Result<PipelineResult, BuildflowError> {
        let mut session = self.store.load_by_id(session_id)?;
        if !matches!(
            session.status,
            SessionStatus::Paused | SessionStatus::Cancelled
        ) {
            return Err(BuildflowError::Internal(format!(
                "session {session_id} cannot be resumed (status: {})",
                session.status
            )));
        }
        session.status = SessionStatus::Running;
        session.stage = session.first_incomplete_stage();
        session.touch();
        self.drive(session, true).await
    }

    fn cancel_reason(&self) -> String {
        self.cancel
            .reason()
            .unwrap_or_else(|| "cancelled".to_string())
    }

    /// Records a progress event on the tracker and the session.
    fn report(
        &self,
        session: &mut PipelineSession,
        stage: PipelineStage,
        local_percent: f64,
        status: ProgressStatus,
        message: impl Into<String>,
        metadata: Option<serde_json::Value>,
    ) {
        let event = self
            .tracker
            .report(stage, local_percent, status, message, metadata);
        session.progress.push(event);
    }

    async fn drive(
        &self,
        mut session: PipelineSession,
        resuming: bool,
    ) -> Result<PipelineResult, BuildflowError> {
        let run_start = now_utc();
        let engine = RecoveryPolicyEngine::new(Arc::clone(&self.strategies));
        let checkpoints = CheckpointManager::new(Arc::clone(&self.manifest_store));
        let mut metrics = RunMetrics::default();
        let mut fatal = 0usize;

        info!(session_id = %session.id, stage = %session.stage, resuming, "Pipeline run started");

        while !session.stage.is_terminal() {
            if self.cancel.is_cancelled() {
                let stage = session.stage;
                session.status = SessionStatus::Cancelled;
                session.touch();
                let reason = self.cancel_reason();
                self.report(
                    &mut session,
                    stage,
                    0.0,
                    ProgressStatus::Failed,
                    format!("Cancelled: {reason}"),
                    None,
                );
                return self.finish(session, metrics, fatal, run_start);
            }

            match session.stage {
                PipelineStage::Discovery => {
                    self.report(
                        &mut session,
                        PipelineStage::Discovery,
                        0.0,
                        ProgressStatus::Running,
                        "Analyzing requirement",
                        None,
                    );
                    let stage_start = now_utc();
                    let executor = Arc::clone(&self.discovery);
                    let requirement = session.requirement.clone();
                    let outcome = self
                        .attempt_stage(
                            PipelineStage::Discovery,
                            &mut session,
                            &engine,
                            &mut fatal,
                            move || {
                                let executor = Arc::clone(&executor);
                                let requirement = requirement.clone();
                                async move { executor.execute(&requirement).await }
                            },
                        )
                        .await;
                    match outcome {
                        Ok((artifact, quality)) => {
                            metrics.discovery_ms = elapsed_ms(stage_start);
                            session.project_name = Some(artifact.project_name.clone());
                            session.discovery = Some(artifact);
                            self.report(
                                &mut session,
                                PipelineStage::Discovery,
                                100.0,
                                ProgressStatus::Completed,
                                "Requirement analyzed",
                                Some(json!({ "quality": quality.score })),
                            );
                            session.advance_stage();
                        }
                        Err(err) => {
                            return self.fail_or_cancel(session, err, metrics, fatal, run_start)
                        }
                    }
                }
                PipelineStage::Planning => {
                    let Some(discovery_artifact) = session.discovery.clone() else {
                        return Err(BuildflowError::MissingArtifact {
                            stage: PipelineStage::Discovery,
                        });
                    };
                    self.report(
                        &mut session,
                        PipelineStage::Planning,
                        0.0,
                        ProgressStatus::Running,
                        "Building task plan",
                        None,
                    );
                    let stage_start = now_utc();
                    let executor = Arc::clone(&self.planning);
                    let outcome = self
                        .attempt_stage(
                            PipelineStage::Planning,
                            &mut session,
                            &engine,
                            &mut fatal,
                            move || {
                                let executor = Arc::clone(&executor);
                                let discovery_artifact = discovery_artifact.clone();
                                async move { executor.execute(&discovery_artifact).await }
                            },
                        )
                        .await;
                    match outcome {
                        Ok((artifact, quality)) => {
                            metrics.planning_ms = elapsed_ms(stage_start);
                            let task_count = artifact.task_count();
                            session.planning = Some(artifact);
                            self.report(
                                &mut session,
                                PipelineStage::Planning,
                                100.0,
                                ProgressStatus::Completed,
                                format!("Plan ready with {task_count} sub-tasks"),
                                Some(json!({ "quality": quality.score })),
                            );
                            session.advance_stage();

                            if !self.config.auto_advance {
                                session.status = SessionStatus::Paused;
                                session.touch();
                                info!(session_id = %session.id, "Paused before execution");
                                return self.finish(session, metrics, fatal, run_start);
                            }
                        }
                        Err(err) => {
                            return self.fail_or_cancel(session, err, metrics, fatal, run_start)
                        }
                    }
                }
                PipelineStage::Execution => {
                    self.report(
                        &mut session,
                        PipelineStage::Execution,
                        0.0,
                        ProgressStatus::Running,
                        "Executing plan",
                        None,
                    );
                    let stage_start = now_utc();
                    let outcome = self
                        .run_execution(&mut session, &engine, &checkpoints, &mut fatal)
                        .await;
                    metrics.execution_ms = elapsed_ms(stage_start);
                    match outcome {
                        Ok(artifact) => {
                            session.checkpoints = checkpoints.list();
                            session.execution = Some(artifact);
                            self.report(
                                &mut session,
                                PipelineStage::Execution,
                                100.0,
                                ProgressStatus::Completed,
                                "Plan executed",
                                None,
                            );
                            session.advance_stage();
                        }
                        Err(err) => {
                            session.checkpoints = checkpoints.list();
                            return self.fail_or_cancel(session, err, metrics, fatal, run_start);
                        }
                    }
                }
                PipelineStage::Complete | PipelineStage::Failed => break,
            }
        }

        session.status = SessionStatus::Completed;
        session.touch();
        self.report(
            &mut session,
            PipelineStage::Complete,
            100.0,
            ProgressStatus::Completed,
            "Pipeline completed",
            None,
        );
        self.finish(session, metrics, fatal, run_start)
    }

    /// Runs one stage attempt, consulting the recovery engine on failure
    /// and re-invoking only this stage until the budget runs out.
    async fn attempt_stage<T, F, Fut>(
        &self,
        stage: PipelineStage,
        session: &mut PipelineSession,
        engine: &RecoveryPolicyEngine,
        fatal: &mut usize,
        attempt: F,
    ) -> Result<T, BuildflowError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BuildflowError>>,
    {
        loop {
            if self.cancel.is_cancelled() {
                return Err(BuildflowError::Cancelled(self.cancel_reason()));
            }
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let failure = WorkflowError::classify(stage, err.to_string());
                    warn!(
                        stage = %stage,
                        category = %failure.category,
                        error = %err,
                        "Stage attempt failed"
                    );
                    let decision = engine.decide(&failure);
                    session.record_error(failure);

                    if decision.should_retry {
                        self.report(
                            session,
                            stage,
                            0.0,
                            ProgressStatus::Failed,
                            format!(
                                "Stage failed, retrying ({}/{})",
                                decision.attempts_used, decision.max_retries
                            ),
                            None,
                        );
                        tokio::time::sleep(decision.delay).await;
                        continue;
                    }

                    *fatal += 1;
                    return Err(err);
                }
            }
        }
    }

    /// The execution-stage sub-task loop.
    ///
    /// Tasks run in plan order. Consecutive independent tasks form a batch
    /// executed concurrently under the `max_parallel` bound; everything
    /// else runs sequentially. Failures are resolved per sub-task through
    /// the recovery engine, so a retry or rollback re-runs only the
    /// failing task.
    async fn run_execution(
        &self,
        session: &mut PipelineSession,
        engine: &RecoveryPolicyEngine,
        checkpoints: &CheckpointManager,
        fatal: &mut usize,
    ) -> Result<ExecutionArtifact, BuildflowError> {
        let plan = session.planning.clone().ok_or(BuildflowError::MissingArtifact {
            stage: PipelineStage::Planning,
        })?;
        let tasks = plan.tasks;
        let total = tasks.len().max(1);
        let mut results: Vec<SubTaskResult> = Vec::with_capacity(tasks.len());
        let mut first_fatal: Option<String> = None;

        let mut index = 0;
        while index < tasks.len() {
            if self.cancel.is_cancelled() {
                return Err(BuildflowError::Cancelled(self.cancel_reason()));
            }

            let mut end = index + 1;
            if tasks[index].independent {
                while end < tasks.len() && tasks[end].independent {
                    end += 1;
                }
            }
            let batch = &tasks[index..end];

            let outcomes = if batch.len() == 1 {
                vec![self.run_task(&batch[0], engine, checkpoints).await]
            } else {
                let semaphore = Arc::new(Semaphore::new(self.config.max_parallel));
                let futures = batch.iter().map(|task| {
                    let semaphore = Arc::clone(&semaphore);
                    async move {
                        let _permit = semaphore.acquire().await.map_err(|_| {
                            BuildflowError::Internal("task semaphore closed".to_string())
                        })?;
                        self.run_task(task, engine, checkpoints).await
                    }
                });
                join_all(futures).await
            };

            // A hard error in one task must not discard the verdicts of
            // siblings that already ran in the same batch.
            let mut verdicts = Vec::with_capacity(outcomes.len());
            let mut batch_error: Option<BuildflowError> = None;
            for outcome in outcomes {
                match outcome {
                    Ok(verdict) => verdicts.push(verdict),
                    Err(err) if batch_error.is_none() => batch_error = Some(err),
                    Err(_) => {}
                }
            }

            for verdict in verdicts {
                for error in verdict.errors {
                    session.record_error(error);
                }
                if verdict.fatal {
                    *fatal += 1;
                    if first_fatal.is_none() {
                        first_fatal = Some(
                            verdict
                                .result
                                .error
                                .clone()
                                .unwrap_or_else(|| "sub-task failed".to_string()),
                        );
                    }
                }

                let done = results.len() + 1;
                let local = done as f64 / total as f64 * 100.0;
                let (status, message) = if verdict.result.success {
                    (
                        ProgressStatus::Running,
                        format!("Sub-task '{}' completed", verdict.result.task_id),
                    )
                } else if verdict.fatal {
                    (
                        ProgressStatus::Failed,
                        format!("Sub-task '{}' failed", verdict.result.task_id),
                    )
                } else {
                    (
                        ProgressStatus::Failed,
                        format!("Sub-task '{}' skipped after failure", verdict.result.task_id),
                    )
                };
                self.report(
                    session,
                    PipelineStage::Execution,
                    local,
                    status,
                    message,
                    Some(json!({
                        "task_id": verdict.result.task_id,
                        "task_index": done,
                        "task_total": total,
                    })),
                );
                results.push(verdict.result);
            }

            if let Some(err) = batch_error {
                return Err(err);
            }
            if first_fatal.is_some() && !self.config.continue_on_failure {
                break;
            }
            index = end;
        }

        if let Some(message) = first_fatal {
            return Err(BuildflowError::stage_execution(
                PipelineStage::Execution,
                message,
            ));
        }

        let files_created: Vec<PathBuf> = results
            .iter()
            .flat_map(|r| r.files_created.iter().cloned())
            .collect();
        let scores: Vec<f64> = results.iter().filter_map(|r| r.quality_score).collect();
        let average_quality = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        };

        Ok(ExecutionArtifact {
            project_dir: self.project_dir.clone(),
            task_results: results,
            files_created,
            average_quality,
        })
    }

    /// Runs one sub-task to a verdict, retrying and rolling back per the
    /// recovery engine's decisions.
    async fn run_task(
        &self,
        task: &SubTask,
        engine: &RecoveryPolicyEngine,
        checkpoints: &CheckpointManager,
    ) -> Result<TaskVerdict, BuildflowError> {
        let mut errors = Vec::new();
        loop {
            if self.cancel.is_cancelled() {
                return Err(BuildflowError::Cancelled(self.cancel_reason()));
            }

            let timer = SubTaskResult::started(&task.id, &task.name, task.kind);
            match self.runner.run(task).await {
                Ok(outcome) => {
                    let checkpoint_id = if task.checkpoint_after && self.config.checkpoints_enabled
                    {
                        let checkpoint = checkpoints.create(&task.id, outcome.quality_score).await?;
                        Some(checkpoint.id)
                    } else {
                        None
                    };
                    debug!(task = %task.id, "Sub-task completed");
                    return Ok(TaskVerdict {
                        result: timer.succeeded(outcome, checkpoint_id),
                        errors,
                        fatal: false,
                    });
                }
                Err(err) => {
                    let failure = WorkflowError::classify(PipelineStage::Execution, err.to_string());
                    warn!(task = %task.id, category = %failure.category, error = %err, "Sub-task failed");
                    let decision = engine.decide(&failure);
                    errors.push(failure);

                    if decision.should_retry {
                        if decision.action == RecoveryAction::Rollback {
                            match checkpoints.latest_restorable() {
                                Some(checkpoint) => {
                                    checkpoints.rollback(checkpoint.id).await?;
                                }
                                None => {
                                    // Nothing to restore; the failure stands.
                                    return Ok(TaskVerdict {
                                        result: timer.failed(err.to_string()),
                                        errors,
                                        fatal: true,
                                    });
                                }
                            }
                        }
                        tokio::time::sleep(decision.delay).await;
                        continue;
                    }

                    let fatal = decision.action != RecoveryAction::Skip;
                    return Ok(TaskVerdict {
                        result: timer.failed(err.to_string()),
                        errors,
                        fatal,
                    });
                }
            }
        }
    }

    fn fail_or_cancel(
        &self,
        mut session: PipelineSession,
        error: BuildflowError,
        metrics: RunMetrics,
        mut fatal: usize,
        run_start: Timestamp,
    ) -> Result<PipelineResult, BuildflowError> {
        let stage = session.stage;
        if let BuildflowError::Cancelled(reason) = &error {
            info!(session_id = %session.id, stage = %stage, reason, "Pipeline cancelled");
            let message = format!("Cancelled: {reason}");
            session.status = SessionStatus::Cancelled;
            session.touch();
            self.report(&mut session, stage, 0.0, ProgressStatus::Failed, message, None);
        } else {
            warn!(session_id = %session.id, stage = %stage, error = %error, "Pipeline failed");
            // Failures that bypass the per-attempt classification (a
            // checkpoint capture error, for instance) must still land in
            // the session's error history.
            let message = error.to_string();
            let recorded = session
                .errors
                .last()
                .is_some_and(|last| last.message == message || message.contains(&last.message));
            if !recorded {
                session.record_error(WorkflowError::classify(stage, message.clone()));
                fatal += 1;
            }
            session.mark_failed();
            self.report(&mut session, stage, 0.0, ProgressStatus::Failed, message, None);
        }
        self.finish(session, metrics, fatal, run_start)
    }

    /// Finalizes a run: aggregates metrics, persists or clears the
    /// session, and writes the result document for terminal outcomes.
    fn finish(
        &self,
        session: PipelineSession,
        mut metrics: RunMetrics,
        fatal: usize,
        run_start: Timestamp,
    ) -> Result<PipelineResult, BuildflowError> {
        metrics.total_ms = elapsed_ms(run_start);
        metrics.absorb_execution(&session);
        metrics.absorb_errors(&session, fatal);

        match session.status {
            SessionStatus::Completed => self.store.delete(session.id)?,
            SessionStatus::Paused | SessionStatus::Failed | SessionStatus::Cancelled => {
                self.store.save(&session)?;
            }
            SessionStatus::Initializing | SessionStatus::Running => {}
        }

        let status = session.status;
        let result = PipelineResult {
            success: status == SessionStatus::Completed,
            status,
            session,
            metrics,
        };
        if status != SessionStatus::Paused {
            result.write_to(&self.config.output_dir)?;
        }
        info!(
            session_id = %result.session.id,
            status = %status,
            total_ms = result.metrics.total_ms,
            "Pipeline run finished"
        );
        Ok(result)
    }
}
