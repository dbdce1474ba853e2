//! Task descriptors, claims, and per-task records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::types::job::Job;
use crate::types::result::{ClassifiedStatus, Evidence};
use crate::types::source::SourceType;

/// Default attempt budget per task.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Parameters a source worker receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
    pub target_url: String,
    #[serde(default)]
    pub competitor_urls: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Item cap for this source.
    pub limit: u32,
    /// Upstream evidence for continuation stages.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
}

impl TaskParams {
    /// Parameters for `source` derived from the job and its tier.
    pub fn for_job(job: &Job, source: SourceType) -> Self {
        Self {
            target_url: job.target_url.clone(),
            competitor_urls: job.competitor_urls.clone(),
            keywords: job.keywords.clone(),
            limit: job.tier.limit_for(source),
            evidence: Vec::new(),
        }
    }
}

/// A queued unit of work, identified by (job_id, source).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    pub job_id: String,
    pub source: SourceType,
    pub params: TaskParams,
    /// Attempts already consumed.
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
    /// Earliest time the task may be dequeued.
    pub not_before: DateTime<Utc>,
}

impl TaskDescriptor {
    pub fn new(job_id: impl Into<String>, source: SourceType, params: TaskParams) -> Self {
        let now = Utc::now();
        Self {
            job_id: job_id.into(),
            source,
            params,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            enqueued_at: now,
            not_before: now,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }
}

/// A task handed out by `dequeue`, fenced by a fresh claim token.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedTask {
    pub task: TaskDescriptor,
    pub claim_id: Uuid,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimedTask {
    pub fn job_id(&self) -> &str {
        &self.task.job_id
    }

    pub fn source(&self) -> SourceType {
        self.task.source
    }
}

/// Result type for enqueue operations that handles idempotency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    /// Task was added to the queue
    Created,
    /// Task is already outstanding for this job
    Duplicate,
}

impl EnqueueResult {
    /// Returns true if this was a newly queued task
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueResult::Created)
    }
}

/// Outcome of a non-blocking dequeue.
#[derive(Debug, Clone, PartialEq)]
pub enum Dequeued {
    Task(ClaimedTask),
    Empty,
}

/// Where a task sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    InFlight,
    Retrying,
    Done,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::InFlight => "in_flight",
            TaskState::Retrying => "retrying",
            TaskState::Done => "done",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskState::Queued),
            "in_flight" => Ok(TaskState::InFlight),
            "retrying" => Ok(TaskState::Retrying),
            "done" => Ok(TaskState::Done),
            other => Err(PipelineError::storage(format!("unknown task state: {other}"))),
        }
    }
}

/// Durable per-task bookkeeping for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub job_id: String,
    pub source: SourceType,
    pub state: TaskState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub status: ClassifiedStatus,
    pub last_error: Option<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Record for a freshly queued task.
    pub fn queued(task: &TaskDescriptor) -> Self {
        Self {
            job_id: task.job_id.clone(),
            source: task.source,
            state: TaskState::Queued,
            attempts: task.attempts,
            max_attempts: task.max_attempts,
            status: ClassifiedStatus::NotStarted,
            last_error: None,
            next_attempt_at: None,
            updated_at: Utc::now(),
        }
    }
}
