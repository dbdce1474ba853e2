//! Task dispatcher.
//!
//! The `Dispatcher` is a background service that:
//! - Claims tasks from the queue
//! - Invokes the source worker under a per-source timeout
//! - Retries failed attempts with exponential backoff
//! - Classifies terminal results and records them
//! - Enqueues the persona stage and runs aggregation when a job drains
//!
//! # Architecture
//!
//! ```text
//! Dispatcher
//!     │
//!     ├─► dequeue (claim with fresh token)
//!     ├─► SourceWorker::invoke under timeout + child CancellationToken
//!     ├─► requeue with backoff, or save result + finish
//!     └─► on last finish: enqueue persona stage, or Aggregator::synthesize
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::aggregator::Aggregator;
use crate::classifier::classify;
use crate::deps::PipelineDeps;
use crate::error::{PipelineError, Result};
use crate::traits::{JobStore, StepTracker, TaskQueue, WorkerRegistry, WorkerRequest};
use crate::types::step::REPORT_STEP;
use crate::types::{
    ClaimedTask, ClassifiedStatus, Dequeued, Evidence, JobStatus, JobUpdate, ReportOutcome,
    SourceType, StepUpdate, TaskDescriptor, TaskParams, TaskRecord, TaskState, WorkerResult,
};

/// Retry schedule for failed attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Attempts allowed per task, including the first
    pub max_attempts: u32,
    /// Delay multiplied by `2^attempts`
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `attempts` have been consumed.
    pub fn backoff(&self, attempts: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempts))
            .min(self.max_delay)
    }
}

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// How long to wait when no tasks are available
    pub poll_interval: Duration,
    /// Maximum concurrent worker invocations
    pub max_concurrency: usize,
    pub retry: RetryPolicy,
    /// Per-source timeout overrides
    pub timeouts: HashMap<SourceType, Duration>,
    /// Worker ID for this instance
    pub worker_id: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_concurrency: 8,
            retry: RetryPolicy::default(),
            timeouts: HashMap::new(),
            worker_id: format!("dispatcher-{}", Uuid::new_v4()),
        }
    }
}

impl DispatcherConfig {
    /// Create a new config with a specific worker ID.
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }

    /// Override the timeout for one source.
    pub fn with_timeout(mut self, source: SourceType, timeout: Duration) -> Self {
        self.timeouts.insert(source, timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Effective timeout for a source.
    pub fn timeout_for(&self, source: SourceType) -> Duration {
        self.timeouts
            .get(&source)
            .copied()
            .unwrap_or_else(|| source.default_timeout())
    }
}

/// What happened to a claimed task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Terminal with the given classification
    Finished(ClassifiedStatus),
    /// Put back in the queue after a failed attempt
    Retrying { attempts: u32, delay: Duration },
    /// Job was already terminal; the task was drained without running
    Skipped,
    /// Claim was superseded (reclaimed elsewhere); result discarded
    Stale,
    /// Shutdown interrupted the attempt; requeued without consuming it
    Interrupted,
}

enum Attempt {
    Returned(WorkerResult),
    Errored(String),
    Interrupted,
}

/// Background service that drains the task queue.
pub struct Dispatcher {
    jobs: Arc<dyn JobStore>,
    queue: Arc<dyn TaskQueue>,
    tracker: Arc<dyn StepTracker>,
    workers: WorkerRegistry,
    aggregator: Aggregator,
    config: DispatcherConfig,
}

impl Dispatcher {
    /// Create a dispatcher with default configuration.
    pub fn new(deps: &PipelineDeps) -> Self {
        Self::with_config(deps, DispatcherConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(deps: &PipelineDeps, config: DispatcherConfig) -> Self {
        Self {
            jobs: deps.jobs.clone(),
            queue: deps.queue.clone(),
            tracker: deps.tracker.clone(),
            workers: deps.workers.clone(),
            aggregator: Aggregator::new(deps.jobs.clone(), deps.tracker.clone(), deps.reports.clone())
                .with_timeout(deps.report_timeout),
            config,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        info!(
            worker_id = %self.config.worker_id,
            max_concurrency = self.config.max_concurrency,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "dispatcher starting"
        );

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let idle = match self.queue.dequeue().await {
                Ok(Dequeued::Task(claimed)) => {
                    let dispatcher = Arc::clone(&self);
                    let token = cancel.child_token();
                    tokio::spawn(async move {
                        let _permit = permit;
                        let job_id = claimed.task.job_id.clone();
                        let source = claimed.task.source;
                        if let Err(e) = dispatcher.dispatch(claimed, &token).await {
                            error!(job_id = %job_id, source = %source, error = %e, "dispatch failed");
                        }
                    });
                    None
                }
                Ok(Dequeued::Empty) => Some(self.config.poll_interval),
                Err(e) => {
                    error!(error = %e, "failed to dequeue task");
                    Some(Duration::from_secs(1))
                }
            };

            if let Some(wait) = idle {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }

        // Spawned dispatches hold permits; wait for them to record their outcome.
        let permits = u32::try_from(self.config.max_concurrency.max(1)).unwrap_or(u32::MAX);
        debug!(worker_id = %self.config.worker_id, "waiting for in-flight dispatches");
        if semaphore.acquire_many(permits).await.is_err() {
            warn!(worker_id = %self.config.worker_id, "semaphore closed during shutdown");
        }

        info!(worker_id = %self.config.worker_id, "dispatcher stopped");
    }

    /// Claim and dispatch one task, if any is eligible.
    pub async fn dispatch_next(&self) -> Result<Option<TaskOutcome>> {
        match self.queue.dequeue().await? {
            Dequeued::Task(claimed) => {
                let token = CancellationToken::new();
                self.dispatch(claimed, &token).await.map(Some)
            }
            Dequeued::Empty => Ok(None),
        }
    }

    /// Dispatch eligible tasks until the queue reports empty.
    ///
    /// Returns the number of tasks dispatched.
    pub async fn drain(&self) -> Result<usize> {
        let mut dispatched = 0;
        while self.dispatch_next().await?.is_some() {
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Run one attempt of a claimed task and record the outcome.
    ///
    /// Task failures are absorbed into the outcome; only store errors are
    /// returned. A store error leaves the task in flight for the sweeper.
    pub async fn dispatch(&self, claimed: ClaimedTask, cancel: &CancellationToken) -> Result<TaskOutcome> {
        let job_id = claimed.task.job_id.clone();
        let source = claimed.task.source;

        let Some(job) = self.jobs.get_job(&job_id).await? else {
            warn!(job_id = %job_id, source = %source, "dropping task for unknown job");
            self.queue.mark_task_done(&job_id, source).await?;
            return Ok(TaskOutcome::Skipped);
        };

        if job.status.is_terminal() {
            return self.skip(&claimed, job.status).await;
        }

        if job.status == JobStatus::Pending {
            match self.jobs.update_job_status(&job_id, JobUpdate::processing()).await {
                Ok(_) => info!(job_id = %job_id, "job processing"),
                Err(PipelineError::InvalidTransition { from, .. }) => {
                    return self.skip(&claimed, from).await;
                }
                Err(e) => return Err(e),
            }
        }

        let attempt = claimed.task.attempts + 1;
        let mut record = TaskRecord::queued(&claimed.task);
        record.state = TaskState::InFlight;
        self.jobs.upsert_task_record(&record).await?;
        self.track(
            &job_id,
            source,
            StepUpdate::in_progress(Some(json!({
                "attempt": attempt,
                "target_url": claimed.task.params.target_url,
                "limit": claimed.task.params.limit,
            }))),
        )
        .await;

        debug!(job_id = %job_id, source = %source, attempt, "invoking worker");
        match self.invoke(&claimed, attempt, cancel).await {
            Attempt::Returned(result) => {
                let status = classify(Some(&result), source);
                if status == ClassifiedStatus::Failed {
                    warn!(
                        job_id = %job_id,
                        source = %source,
                        error = result.error_message().unwrap_or("success: false"),
                        "worker reported failure"
                    );
                }
                self.complete(&claimed, result, attempt).await
            }
            Attempt::Errored(message) => self.handle_failure(&claimed, attempt, &message).await,
            Attempt::Interrupted => {
                info!(job_id = %job_id, source = %source, "attempt interrupted by shutdown");
                if self.queue.requeue(&claimed, claimed.task.attempts, Utc::now()).await? {
                    record.state = TaskState::Queued;
                    self.jobs.upsert_task_record(&record).await?;
                    Ok(TaskOutcome::Interrupted)
                } else {
                    Ok(TaskOutcome::Stale)
                }
            }
        }
    }

    async fn invoke(&self, claimed: &ClaimedTask, attempt: u32, cancel: &CancellationToken) -> Attempt {
        let source = claimed.task.source;
        let Some(worker) = self.workers.get(source) else {
            return Attempt::Returned(WorkerResult::failure(format!(
                "no worker registered for {source}"
            )));
        };

        let request = WorkerRequest {
            job_id: claimed.task.job_id.clone(),
            source,
            attempt,
            params: claimed.task.params.clone(),
        };
        let timeout = self.config.timeout_for(source);
        let child = cancel.child_token();

        let outcome = tokio::time::timeout(timeout, worker.invoke(&request, child.clone())).await;
        if outcome.is_err() {
            child.cancel();
        }
        if cancel.is_cancelled() {
            return Attempt::Interrupted;
        }

        match outcome {
            Ok(Ok(result)) => Attempt::Returned(result),
            Ok(Err(e)) => Attempt::Errored(e.to_string()),
            Err(_) => Attempt::Errored(format!("timed out after {}s", timeout.as_secs())),
        }
    }

    /// Count a failed attempt: requeue with backoff or fail terminally.
    ///
    /// Shared with the stuck-task sweeper.
    pub(crate) async fn handle_failure(
        &self,
        claimed: &ClaimedTask,
        attempt: u32,
        message: &str,
    ) -> Result<TaskOutcome> {
        let job_id = &claimed.task.job_id;
        let source = claimed.task.source;
        let max_attempts = claimed.task.max_attempts;

        if attempt < max_attempts {
            let delay = self.config.retry.backoff(attempt);
            let not_before = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            if !self.queue.requeue(claimed, attempt, not_before).await? {
                debug!(job_id = %job_id, source = %source, "claim superseded, dropping retry");
                return Ok(TaskOutcome::Stale);
            }

            warn!(
                job_id = %job_id,
                source = %source,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "task attempt failed, retrying"
            );

            let mut record = TaskRecord::queued(&claimed.task);
            record.state = TaskState::Retrying;
            record.attempts = attempt;
            record.last_error = Some(message.to_string());
            record.next_attempt_at = Some(not_before);
            self.jobs.upsert_task_record(&record).await?;
            self.track(
                job_id,
                source,
                StepUpdate {
                    error_message: Some(format!("attempt {attempt} failed: {message}")),
                    ..Default::default()
                },
            )
            .await;

            return Ok(TaskOutcome::Retrying {
                attempts: attempt,
                delay,
            });
        }

        warn!(
            job_id = %job_id,
            source = %source,
            attempts = attempt,
            error = %message,
            "task failed, attempts exhausted"
        );
        self.complete(claimed, WorkerResult::failure(message), attempt)
            .await
    }

    /// Record a terminal result and release the task.
    async fn complete(
        &self,
        claimed: &ClaimedTask,
        result: WorkerResult,
        attempts: u32,
    ) -> Result<TaskOutcome> {
        let job_id = &claimed.task.job_id;
        let source = claimed.task.source;

        if !self.queue.is_current(claimed).await? {
            debug!(job_id = %job_id, source = %source, "claim superseded, discarding result");
            return Ok(TaskOutcome::Stale);
        }

        let status = classify(Some(&result), source);
        self.jobs.save_task_result(job_id, source, &result).await?;

        let error = result.error_message().map(str::to_string).or_else(|| {
            (status == ClassifiedStatus::Failed).then(|| "worker reported failure".to_string())
        });

        let mut record = TaskRecord::queued(&claimed.task);
        record.state = TaskState::Done;
        record.attempts = attempts;
        record.status = status;
        record.last_error = error.clone();
        self.jobs.upsert_task_record(&record).await?;

        let step_update = match &error {
            Some(message) if status == ClassifiedStatus::Failed => StepUpdate::failed(message.clone()),
            _ => StepUpdate::completed(Some(json!({
                "status": status,
                "items": result.payload.item_count(),
            }))),
        };
        self.track(job_id, source, step_update).await;

        info!(job_id = %job_id, source = %source, status = %status, attempts, "task finished");

        if status == ClassifiedStatus::Failed && source.is_mandatory() {
            let message = format!(
                "{source} failed after {attempts} attempt(s): {}",
                error.as_deref().unwrap_or("unknown error")
            );
            self.fail_job(job_id, message).await?;
        }

        match self.queue.finish(claimed).await? {
            None => Ok(TaskOutcome::Stale),
            Some(0) => {
                self.on_job_drained(job_id, source).await?;
                Ok(TaskOutcome::Finished(status))
            }
            Some(remaining) => {
                debug!(job_id = %job_id, remaining, "tasks outstanding");
                Ok(TaskOutcome::Finished(status))
            }
        }
    }

    /// Release a task whose job is already terminal.
    async fn skip(&self, claimed: &ClaimedTask, job_status: JobStatus) -> Result<TaskOutcome> {
        let job_id = &claimed.task.job_id;
        let source = claimed.task.source;
        if self.queue.finish(claimed).await?.is_none() {
            return Ok(TaskOutcome::Stale);
        }

        let reason = format!("job already {job_status}");
        let mut record = TaskRecord::queued(&claimed.task);
        record.state = TaskState::Done;
        record.last_error = Some(reason.clone());
        self.jobs.upsert_task_record(&record).await?;
        self.track(job_id, source, StepUpdate::skipped(reason)).await;

        debug!(job_id = %job_id, source = %source, "skipped task of terminal job");
        Ok(TaskOutcome::Skipped)
    }

    async fn fail_job(&self, job_id: &str, message: String) -> Result<()> {
        match self.jobs.update_job_status(job_id, JobUpdate::failed(message.clone())).await {
            Ok(_) => {
                warn!(job_id, error = %message, "job failed");
                if let Err(e) = self
                    .tracker
                    .update_step(job_id, REPORT_STEP, StepUpdate::skipped("mandatory source failed"))
                    .await
                {
                    warn!(job_id, error = %e, "failed to record report step");
                }
                Ok(())
            }
            Err(PipelineError::InvalidTransition { from, .. }) => {
                debug!(job_id, status = %from, "job already terminal");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Continue a job whose outstanding set just became empty.
    async fn on_job_drained(&self, job_id: &str, last_source: SourceType) -> Result<()> {
        let Some(job) = self.jobs.get_job(job_id).await? else {
            return Ok(());
        };
        if job.status.is_terminal() {
            return Ok(());
        }
        let pending = self.aggregator.pending_mandatory(job_id).await?;
        if !pending.is_empty() {
            warn!(job_id, ?pending, "outstanding set drained before mandatory tasks finished");
            return Ok(());
        }

        let results = self.jobs.get_task_results(job_id).await?;
        let persona = SourceType::PersonaSynthesis;
        if !last_source.is_continuation()
            && self.workers.contains(persona)
            && !results.contains_key(&persona)
        {
            let mut params = TaskParams::for_job(&job, persona);
            params.evidence = results
                .iter()
                .filter(|(source, result)| {
                    classify(Some(*result), **source) == ClassifiedStatus::Completed
                })
                .map(|(source, result)| Evidence {
                    source: *source,
                    payload: result.payload.clone(),
                })
                .collect();

            let task = TaskDescriptor::new(job_id, persona, params)
                .with_max_attempts(self.config.retry.max_attempts);
            let enqueued = self.queue.enqueue(task.clone()).await?;
            if enqueued.is_created() {
                self.jobs.upsert_task_record(&TaskRecord::queued(&task)).await?;
                info!(job_id, "collection finished, persona stage queued");
                return Ok(());
            }
        }

        match self.aggregator.synthesize(job_id).await? {
            ReportOutcome::Failed { error } => {
                warn!(job_id, error = %error, "aggregation failed");
            }
            outcome => debug!(job_id, ?outcome, "aggregation finished"),
        }
        Ok(())
    }

    async fn track(&self, job_id: &str, source: SourceType, update: StepUpdate) {
        if let Err(e) = self
            .tracker
            .update_step(job_id, &source.step_name(), update)
            .await
        {
            warn!(job_id, source = %source, error = %e, "failed to record step");
        }
    }
}
