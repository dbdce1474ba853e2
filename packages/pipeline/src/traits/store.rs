//! Storage traits for jobs, task results, and the task queue.
//!
//! - `JobStore`: job records, raw task results, per-task bookkeeping
//! - `TaskQueue`: FIFO of pending tasks plus the outstanding set per job

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    ClaimedTask, Dequeued, EnqueueResult, Job, JobUpdate, SourceType, TaskDescriptor, TaskRecord,
    WorkerResult,
};

/// System of record for jobs and their task results.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job.
    async fn create_job(&self, job: &Job) -> Result<()>;

    /// Get a job by ID.
    async fn get_job(&self, job_id: &str) -> Result<Option<Job>>;

    /// Apply a status update.
    ///
    /// Fails with `InvalidTransition` if the change is not monotonic and with
    /// `JobNotFound` for unknown jobs. Returns the updated job.
    async fn update_job_status(&self, job_id: &str, update: JobUpdate) -> Result<Job>;

    /// Store the latest result for a task, replacing any earlier one.
    async fn save_task_result(
        &self,
        job_id: &str,
        source: SourceType,
        result: &WorkerResult,
    ) -> Result<()>;

    /// All stored results for a job, keyed by source.
    async fn get_task_results(&self, job_id: &str) -> Result<BTreeMap<SourceType, WorkerResult>>;

    /// Insert or replace the bookkeeping record for a task.
    async fn upsert_task_record(&self, record: &TaskRecord) -> Result<()>;

    /// Bookkeeping records for a job, in source order.
    async fn get_task_records(&self, job_id: &str) -> Result<Vec<TaskRecord>>;
}

/// Durable queue of pending tasks.
///
/// A task is outstanding from `enqueue` until it is finished or marked done.
/// While outstanding it is either queued or in flight; a second enqueue of
/// the same (job, source) is a duplicate.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Queue a task and add it to the job's outstanding set.
    ///
    /// Durable before returning.
    async fn enqueue(&self, task: TaskDescriptor) -> Result<EnqueueResult>;

    /// Queue several tasks at once.
    ///
    /// No task in the batch becomes visible to `dequeue` before all of them
    /// are outstanding. Results are in input order.
    async fn enqueue_batch(&self, tasks: Vec<TaskDescriptor>) -> Result<Vec<EnqueueResult>>;

    /// Claim the oldest eligible queued task. Never blocks.
    ///
    /// Eligible means `not_before <= now`. The claimed task moves in flight
    /// under a fresh claim token.
    async fn dequeue(&self) -> Result<Dequeued>;

    /// Put an in-flight task back in the queue.
    ///
    /// Returns false if `claim` is no longer the current claim.
    async fn requeue(
        &self,
        claim: &ClaimedTask,
        attempts: u32,
        not_before: DateTime<Utc>,
    ) -> Result<bool>;

    /// Whether `claim` still holds its task.
    async fn is_current(&self, claim: &ClaimedTask) -> Result<bool>;

    /// Remove a claimed task from the outstanding set.
    ///
    /// Returns the remaining outstanding count, or `None` if the claim is
    /// stale. Calls are serialized per job, so exactly one caller sees the
    /// count reach zero.
    async fn finish(&self, claim: &ClaimedTask) -> Result<Option<usize>>;

    /// Remove a task from the outstanding set regardless of claim.
    ///
    /// Returns the remaining outstanding count.
    async fn mark_task_done(&self, job_id: &str, source: SourceType) -> Result<usize>;

    /// Number of outstanding tasks for a job.
    async fn outstanding_count(&self, job_id: &str) -> Result<usize>;

    /// Outstanding sources for a job.
    async fn outstanding(&self, job_id: &str) -> Result<Vec<SourceType>>;

    /// In-flight tasks claimed before `cutoff`.
    async fn in_flight_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<ClaimedTask>>;
}
