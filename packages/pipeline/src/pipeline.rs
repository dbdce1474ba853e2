//! Research pipeline facade.
//!
//! Entry point for callers: submits jobs (create, declare steps, seed
//! tasks) and serves the read-only observability queries.

use std::collections::BTreeMap;

use tracing::{info, instrument, warn};

use crate::classifier::classify;
use crate::deps::PipelineDeps;
use crate::dispatcher::{Dispatcher, DispatcherConfig};
use crate::error::{PipelineError, Result};
use crate::types::step::REPORT_STEP;
use crate::types::task::DEFAULT_MAX_ATTEMPTS;
use crate::types::{
    ClassifiedStatus, DebugStep, Job, NewJob, SourceType, TaskDescriptor, TaskParams, TaskRecord,
};

/// Submission settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Attempt budget stamped on every seeded task
    pub max_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Submits research jobs and answers status queries.
#[derive(Clone)]
pub struct ResearchPipeline {
    deps: PipelineDeps,
    config: PipelineConfig,
}

impl ResearchPipeline {
    pub fn new(deps: PipelineDeps) -> Self {
        Self::with_config(deps, PipelineConfig::default())
    }

    pub fn with_config(deps: PipelineDeps, config: PipelineConfig) -> Self {
        Self { deps, config }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    /// Build a dispatcher over the same dependencies.
    ///
    /// The retry budget follows this pipeline's `max_attempts`.
    pub fn dispatcher(&self, mut config: DispatcherConfig) -> Dispatcher {
        config.retry.max_attempts = self.config.max_attempts;
        Dispatcher::with_config(&self.deps, config)
    }

    /// Validate a submission, persist the job, declare its steps, and seed
    /// one task per configured collection source.
    #[instrument(skip(self, new_job), fields(target_url = %new_job.target_url))]
    pub async fn submit(&self, new_job: NewJob) -> Result<Job> {
        let job = new_job.into_job()?;

        let sources = self.deps.workers.collection_sources();
        if sources.is_empty() {
            return Err(PipelineError::invalid_job("no source workers configured"));
        }
        if self.deps.jobs.get_job(&job.id).await?.is_some() {
            return Err(PipelineError::invalid_job(format!(
                "job {} already exists",
                job.id
            )));
        }

        self.deps.jobs.create_job(&job).await?;

        let mut steps: Vec<String> = sources.iter().map(SourceType::step_name).collect();
        if self.deps.workers.contains(SourceType::PersonaSynthesis) {
            steps.push(SourceType::PersonaSynthesis.step_name());
        }
        steps.push(REPORT_STEP.to_string());
        if let Err(e) = self.deps.tracker.initialize_steps(&job.id, &steps).await {
            warn!(job_id = %job.id, error = %e, "failed to initialize debug steps");
        }

        let tasks: Vec<TaskDescriptor> = sources
            .iter()
            .map(|source| {
                TaskDescriptor::new(&job.id, *source, TaskParams::for_job(&job, *source))
                    .with_max_attempts(self.config.max_attempts)
            })
            .collect();
        // Every record exists before any task of the job can be claimed.
        for task in &tasks {
            self.deps.jobs.upsert_task_record(&TaskRecord::queued(task)).await?;
        }
        self.deps.queue.enqueue_batch(tasks).await?;

        info!(
            job_id = %job.id,
            tier = %job.tier,
            sources = sources.len(),
            "research job submitted"
        );
        Ok(job)
    }

    /// Get a job by ID.
    pub async fn job(&self, job_id: &str) -> Result<Job> {
        self.deps
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    /// Classified status of every task the job has.
    ///
    /// Sources seeded but not yet finished report `not_started`.
    pub async fn task_statuses(&self, job_id: &str) -> Result<BTreeMap<SourceType, ClassifiedStatus>> {
        self.job(job_id).await?;
        let results = self.deps.jobs.get_task_results(job_id).await?;
        let records = self.deps.jobs.get_task_records(job_id).await?;

        let mut statuses: BTreeMap<SourceType, ClassifiedStatus> = records
            .iter()
            .map(|r| (r.source, classify(results.get(&r.source), r.source)))
            .collect();
        for (source, result) in &results {
            statuses
                .entry(*source)
                .or_insert_with(|| classify(Some(result), *source));
        }
        Ok(statuses)
    }

    /// Per-task bookkeeping for a job.
    pub async fn task_records(&self, job_id: &str) -> Result<Vec<TaskRecord>> {
        self.job(job_id).await?;
        self.deps.jobs.get_task_records(job_id).await
    }

    /// Debug steps for a job; empty if none were declared.
    pub async fn debug_steps(&self, analysis_id: &str) -> Result<Vec<DebugStep>> {
        self.deps.tracker.get_steps(analysis_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::stores::MemoryStore;
    use crate::testing::{MockReportGenerator, MockWorker};
    use crate::traits::{TaskQueue, WorkerRegistry};
    use crate::types::{JobStatus, ServiceTier, StepStatus};

    fn pipeline(workers: WorkerRegistry) -> (Arc<MemoryStore>, ResearchPipeline) {
        let store = Arc::new(MemoryStore::new());
        let deps = PipelineDeps::new(
            store.clone(),
            workers,
            Arc::new(MockReportGenerator::new("report")),
        );
        (store, ResearchPipeline::new(deps))
    }

    fn all_collectors() -> WorkerRegistry {
        SourceType::COLLECTION
            .into_iter()
            .fold(WorkerRegistry::new(), |registry, source| {
                registry.with_worker(Arc::new(MockWorker::new(source)))
            })
    }

    fn submission() -> NewJob {
        NewJob::builder()
            .target_url("https://groundluxe.com")
            .competitor_urls(vec!["https://earthing.com".to_string()])
            .keywords(vec!["grounding sheets".to_string(), "earthing".to_string()])
            .tier(ServiceTier::Premium)
            .build()
    }

    #[tokio::test]
    async fn submit_seeds_one_task_per_source() {
        let (store, pipeline) = pipeline(all_collectors());
        let job = pipeline.submit(submission()).await.unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(store.outstanding_count(&job.id).await.unwrap(), 4);

        let statuses = pipeline.task_statuses(&job.id).await.unwrap();
        assert_eq!(statuses.len(), 4);
        assert!(statuses.values().all(|s| *s == ClassifiedStatus::NotStarted));

        let steps = pipeline.debug_steps(&job.id).await.unwrap();
        let names: Vec<_> = steps.iter().map(|s| s.step_name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "collect_website",
                "collect_amazon_reviews",
                "collect_reddit",
                "collect_youtube_comments",
                "report_synthesis",
            ]
        );
        assert!(steps.iter().all(|s| s.status == StepStatus::Pending));
    }

    #[tokio::test]
    async fn submit_applies_tier_limits() {
        let (store, pipeline) = pipeline(all_collectors());
        let job = pipeline.submit(submission()).await.unwrap();

        let mut limits = Vec::new();
        while let crate::types::Dequeued::Task(claimed) = store.dequeue().await.unwrap() {
            limits.push((claimed.source(), claimed.task.params.limit));
        }
        limits.sort();
        assert_eq!(
            limits,
            vec![
                (SourceType::Website, 200),
                (SourceType::AmazonReviews, 200),
                (SourceType::Reddit, 100),
                (SourceType::YoutubeComments, 100),
            ]
        );
        assert_eq!(store.outstanding_count(&job.id).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn submit_skips_sources_without_workers() {
        let workers = WorkerRegistry::new()
            .with_worker(Arc::new(MockWorker::new(SourceType::Website)))
            .with_worker(Arc::new(MockWorker::new(SourceType::PersonaSynthesis)));
        let (store, pipeline) = pipeline(workers);
        let job = pipeline.submit(submission()).await.unwrap();

        assert_eq!(
            store.outstanding(&job.id).await.unwrap(),
            vec![SourceType::Website]
        );
        let steps = pipeline.debug_steps(&job.id).await.unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[1].step_name, "persona_synthesis");
    }

    #[tokio::test]
    async fn submit_rejects_invalid_and_duplicate_jobs() {
        let (_store, pipeline) = pipeline(all_collectors());

        let mut invalid = submission();
        invalid.keywords.clear();
        assert!(matches!(
            pipeline.submit(invalid).await,
            Err(PipelineError::InvalidJob { .. })
        ));

        let mut fixed = submission();
        fixed.id = Some("job-1".into());
        pipeline.submit(fixed.clone()).await.unwrap();
        assert!(matches!(
            pipeline.submit(fixed).await,
            Err(PipelineError::InvalidJob { .. })
        ));
    }

    #[tokio::test]
    async fn submit_requires_a_collection_worker() {
        let (_store, pipeline) = pipeline(WorkerRegistry::new());
        assert!(matches!(
            pipeline.submit(submission()).await,
            Err(PipelineError::InvalidJob { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_job_queries() {
        let (_store, pipeline) = pipeline(all_collectors());
        assert!(matches!(
            pipeline.job("missing").await,
            Err(PipelineError::JobNotFound { .. })
        ));
        assert!(pipeline.debug_steps("missing").await.unwrap().is_empty());
    }
}
