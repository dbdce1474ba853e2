//! In-memory storage implementation for testing and development.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::traits::{JobStore, StepTracker, TaskQueue};
use crate::types::{
    ClaimedTask, DebugStep, Dequeued, EnqueueResult, Job, JobUpdate, SourceType, StepUpdate,
    TaskDescriptor, TaskRecord, WorkerResult,
};

type TaskKey = (String, SourceType);

struct QueueEntry {
    task: TaskDescriptor,
    seq: u64,
    claim: Option<(Uuid, DateTime<Utc>)>,
}

#[derive(Default)]
struct QueueState {
    next_seq: u64,
    /// Outstanding tasks; presence here is the outstanding-set membership.
    entries: HashMap<TaskKey, QueueEntry>,
}

impl QueueState {
    fn bump(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remaining(&self, job_id: &str) -> usize {
        self.entries.keys().filter(|(id, _)| id == job_id).count()
    }

    fn insert(&mut self, task: TaskDescriptor) -> EnqueueResult {
        let key = (task.job_id.clone(), task.source);
        if self.entries.contains_key(&key) {
            return EnqueueResult::Duplicate;
        }
        let seq = self.bump();
        self.entries.insert(
            key,
            QueueEntry {
                task,
                seq,
                claim: None,
            },
        );
        EnqueueResult::Created
    }

    fn holds(&self, claim: &ClaimedTask) -> bool {
        self.entries
            .get(&(claim.task.job_id.clone(), claim.task.source))
            .and_then(|entry| entry.claim)
            .is_some_and(|(claim_id, _)| claim_id == claim.claim_id)
    }
}

/// In-memory storage for jobs, the task queue, and debug steps.
///
/// Useful for testing and development. Not suitable for production
/// as data is lost on restart.
pub struct MemoryStore {
    jobs: RwLock<HashMap<String, Job>>,
    results: RwLock<HashMap<String, BTreeMap<SourceType, WorkerResult>>>,
    records: RwLock<HashMap<TaskKey, TaskRecord>>,
    steps: RwLock<HashMap<String, Vec<DebugStep>>>,
    queue: Mutex<QueueState>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            steps: RwLock::new(HashMap::new()),
            queue: Mutex::new(QueueState::default()),
        }
    }

    /// Clear all stored data.
    pub fn clear(&self) {
        self.jobs.write().unwrap().clear();
        self.results.write().unwrap().clear();
        self.records.write().unwrap().clear();
        self.steps.write().unwrap().clear();
        *self.queue.lock().unwrap() = QueueState::default();
    }

    /// Get the number of stored jobs.
    pub fn job_count(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    /// Get the number of outstanding tasks across all jobs.
    pub fn queue_len(&self) -> usize {
        self.queue.lock().unwrap().entries.len()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, job: &Job) -> Result<()> {
        self.jobs
            .write()
            .unwrap()
            .insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> Result<Option<Job>> {
        Ok(self.jobs.read().unwrap().get(job_id).cloned())
    }

    async fn update_job_status(&self, job_id: &str, update: JobUpdate) -> Result<Job> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(job_id).ok_or_else(|| PipelineError::JobNotFound {
            job_id: job_id.to_string(),
        })?;
        job.apply(update)?;
        Ok(job.clone())
    }

    async fn save_task_result(
        &self,
        job_id: &str,
        source: SourceType,
        result: &WorkerResult,
    ) -> Result<()> {
        self.results
            .write()
            .unwrap()
            .entry(job_id.to_string())
            .or_default()
            .insert(source, result.clone());
        Ok(())
    }

    async fn get_task_results(&self, job_id: &str) -> Result<BTreeMap<SourceType, WorkerResult>> {
        Ok(self
            .results
            .read()
            .unwrap()
            .get(job_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn upsert_task_record(&self, record: &TaskRecord) -> Result<()> {
        self.records
            .write()
            .unwrap()
            .insert((record.job_id.clone(), record.source), record.clone());
        Ok(())
    }

    async fn get_task_records(&self, job_id: &str) -> Result<Vec<TaskRecord>> {
        let mut records: Vec<TaskRecord> = self
            .records
            .read()
            .unwrap()
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.source);
        Ok(records)
    }
}

#[async_trait]
impl TaskQueue for MemoryStore {
    async fn enqueue(&self, task: TaskDescriptor) -> Result<EnqueueResult> {
        Ok(self.queue.lock().unwrap().insert(task))
    }

    async fn enqueue_batch(&self, tasks: Vec<TaskDescriptor>) -> Result<Vec<EnqueueResult>> {
        let mut queue = self.queue.lock().unwrap();
        Ok(tasks.into_iter().map(|task| queue.insert(task)).collect())
    }

    async fn dequeue(&self) -> Result<Dequeued> {
        let mut queue = self.queue.lock().unwrap();
        let now = Utc::now();
        let next = queue
            .entries
            .iter()
            .filter(|(_, e)| e.claim.is_none() && e.task.not_before <= now)
            .min_by_key(|(_, e)| e.seq)
            .map(|(key, _)| key.clone());

        let Some(key) = next else {
            return Ok(Dequeued::Empty);
        };
        let Some(entry) = queue.entries.get_mut(&key) else {
            return Ok(Dequeued::Empty);
        };
        let claim_id = Uuid::new_v4();
        entry.claim = Some((claim_id, now));
        Ok(Dequeued::Task(ClaimedTask {
            task: entry.task.clone(),
            claim_id,
            claimed_at: now,
        }))
    }

    async fn requeue(
        &self,
        claim: &ClaimedTask,
        attempts: u32,
        not_before: DateTime<Utc>,
    ) -> Result<bool> {
        let mut queue = self.queue.lock().unwrap();
        if !queue.holds(claim) {
            return Ok(false);
        }
        let seq = queue.bump();
        let key = (claim.task.job_id.clone(), claim.task.source);
        if let Some(entry) = queue.entries.get_mut(&key) {
            entry.task.attempts = attempts;
            entry.task.not_before = not_before;
            entry.seq = seq;
            entry.claim = None;
        }
        Ok(true)
    }

    async fn is_current(&self, claim: &ClaimedTask) -> Result<bool> {
        Ok(self.queue.lock().unwrap().holds(claim))
    }

    async fn finish(&self, claim: &ClaimedTask) -> Result<Option<usize>> {
        let mut queue = self.queue.lock().unwrap();
        if !queue.holds(claim) {
            return Ok(None);
        }
        queue
            .entries
            .remove(&(claim.task.job_id.clone(), claim.task.source));
        Ok(Some(queue.remaining(&claim.task.job_id)))
    }

    async fn mark_task_done(&self, job_id: &str, source: SourceType) -> Result<usize> {
        let mut queue = self.queue.lock().unwrap();
        queue.entries.remove(&(job_id.to_string(), source));
        Ok(queue.remaining(job_id))
    }

    async fn outstanding_count(&self, job_id: &str) -> Result<usize> {
        Ok(self.queue.lock().unwrap().remaining(job_id))
    }

    async fn outstanding(&self, job_id: &str) -> Result<Vec<SourceType>> {
        let queue = self.queue.lock().unwrap();
        let mut sources: Vec<SourceType> = queue
            .entries
            .keys()
            .filter(|(id, _)| id == job_id)
            .map(|(_, source)| *source)
            .collect();
        sources.sort();
        Ok(sources)
    }

    async fn in_flight_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<ClaimedTask>> {
        let queue = self.queue.lock().unwrap();
        let mut stuck: Vec<(u64, ClaimedTask)> = queue
            .entries
            .values()
            .filter_map(|entry| {
                let (claim_id, claimed_at) = entry.claim?;
                (claimed_at <= cutoff).then(|| {
                    (
                        entry.seq,
                        ClaimedTask {
                            task: entry.task.clone(),
                            claim_id,
                            claimed_at,
                        },
                    )
                })
            })
            .collect();
        stuck.sort_by_key(|(seq, _)| *seq);
        Ok(stuck.into_iter().map(|(_, claim)| claim).collect())
    }
}

#[async_trait]
impl StepTracker for MemoryStore {
    async fn initialize_steps(&self, analysis_id: &str, step_names: &[String]) -> Result<()> {
        let steps = step_names
            .iter()
            .enumerate()
            .map(|(order, name)| DebugStep::pending(analysis_id, name.clone(), order as i32))
            .collect();
        self.steps
            .write()
            .unwrap()
            .insert(analysis_id.to_string(), steps);
        Ok(())
    }

    async fn update_step(
        &self,
        analysis_id: &str,
        step_name: &str,
        update: StepUpdate,
    ) -> Result<()> {
        let mut steps = self.steps.write().unwrap();
        let step = steps
            .get_mut(analysis_id)
            .and_then(|steps| steps.iter_mut().find(|s| s.step_name == step_name))
            .ok_or_else(|| PipelineError::StepNotFound {
                analysis_id: analysis_id.to_string(),
                step_name: step_name.to_string(),
            })?;
        step.apply(update);
        Ok(())
    }

    async fn get_steps(&self, analysis_id: &str) -> Result<Vec<DebugStep>> {
        Ok(self
            .steps
            .read()
            .unwrap()
            .get(analysis_id)
            .cloned()
            .unwrap_or_default())
    }
}
