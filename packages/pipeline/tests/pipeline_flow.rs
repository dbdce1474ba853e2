//! End-to-end job flows over the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use voc_pipeline::testing::{FailingTracker, MockReportGenerator, MockResponse, MockWorker};
use voc_pipeline::types::report::LOW_CONFIDENCE_NOTICE;
use voc_pipeline::{
    ClaimedTask, ClassifiedStatus, ConfidenceLevel, Dequeued, DispatcherConfig, EnqueueResult,
    JobStatus, JobStore, MemoryStore, NewJob, PipelineDeps, ResearchPipeline, RetryPolicy,
    ServiceTier, SourcePayload, SourceType, StepStatus, StuckTaskSweeper, SweeperConfig,
    TaskDescriptor, TaskOutcome, TaskQueue, TaskState, WorkerRegistry, WorkerResult,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Harness {
    store: Arc<MemoryStore>,
    reports: Arc<MockReportGenerator>,
    pipeline: ResearchPipeline,
}

impl Harness {
    fn new(workers: Vec<Arc<MockWorker>>) -> Self {
        Self::with_reports(workers, MockReportGenerator::new("# Customer voice report"))
    }

    fn with_reports(workers: Vec<Arc<MockWorker>>, reports: MockReportGenerator) -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let reports = Arc::new(reports);
        let registry = workers
            .into_iter()
            .fold(WorkerRegistry::new(), |registry, worker| registry.with_worker(worker));
        let deps = PipelineDeps::new(store.clone(), registry, reports.clone());
        Self {
            store,
            reports,
            pipeline: ResearchPipeline::new(deps),
        }
    }

    fn dispatcher_config() -> DispatcherConfig {
        let mut config = DispatcherConfig::with_worker_id("test-dispatcher").with_retry(RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        });
        for source in SourceType::ALL {
            config = config.with_timeout(source, Duration::from_millis(50));
        }
        config
    }

    fn dispatcher(&self) -> voc_pipeline::Dispatcher {
        self.pipeline.dispatcher(Self::dispatcher_config())
    }
}

fn submission() -> NewJob {
    NewJob::builder()
        .target_url("https://groundluxe.com")
        .competitor_urls(vec!["https://earthing.com".to_string()])
        .keywords(vec!["grounding sheets".to_string()])
        .tier(ServiceTier::Basic)
        .build()
}

fn collectors() -> Vec<Arc<MockWorker>> {
    SourceType::COLLECTION
        .into_iter()
        .map(|source| Arc::new(MockWorker::new(source)))
        .collect()
}

#[tokio::test]
async fn all_sources_succeed_and_job_completes() {
    let workers = collectors();
    let h = Harness::new(workers.clone());
    let job = h.pipeline.submit(submission()).await.unwrap();

    let dispatched = h.dispatcher().drain().await.unwrap();
    assert_eq!(dispatched, 4);

    let job = h.pipeline.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.report.as_deref(), Some("# Customer voice report"));
    // 3 website items + 12 reviews + 1 post + 1 comment
    assert_eq!(job.confidence, Some(ConfidenceLevel::Medium));

    let statuses = h.pipeline.task_statuses(&job.id).await.unwrap();
    assert!(statuses.values().all(|s| *s == ClassifiedStatus::Completed));
    assert!(workers.iter().all(|w| w.call_count() == 1));

    let requests = h.reports.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].evidence.len(), 4);

    let steps = h.pipeline.debug_steps(&job.id).await.unwrap();
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
    assert_eq!(h.store.outstanding_count(&job.id).await.unwrap(), 0);
}

#[tokio::test]
async fn workers_receive_tier_limits() {
    let workers = collectors();
    let h = Harness::new(workers.clone());
    h.pipeline.submit(submission()).await.unwrap();
    h.dispatcher().drain().await.unwrap();

    let limit = |source: SourceType| {
        let worker = workers.iter().find(|w| w.calls()[0].source == source).unwrap();
        worker.calls()[0].params.limit
    };
    assert_eq!(limit(SourceType::Website), 20);
    assert_eq!(limit(SourceType::AmazonReviews), 20);
    assert_eq!(limit(SourceType::Reddit), 10);
    assert_eq!(limit(SourceType::YoutubeComments), 10);
}

#[tokio::test]
async fn mandatory_failure_fails_job_and_skips_the_rest() {
    let website = Arc::new(
        MockWorker::new(SourceType::Website)
            .returning(MockResponse::Result(WorkerResult::failure("site blocked crawler"))),
    );
    let amazon = Arc::new(MockWorker::new(SourceType::AmazonReviews));
    let reddit = Arc::new(MockWorker::new(SourceType::Reddit));
    let h = Harness::new(vec![website.clone(), amazon.clone(), reddit.clone()]);
    let job = h.pipeline.submit(submission()).await.unwrap();

    h.dispatcher().drain().await.unwrap();

    let job = h.pipeline.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("site blocked crawler"));
    assert!(job.report.is_none());

    // success: false is terminal on the first attempt
    assert_eq!(website.call_count(), 1);
    assert_eq!(amazon.call_count(), 0);
    assert_eq!(reddit.call_count(), 0);
    assert!(h.reports.requests().is_empty());

    let steps = h.pipeline.debug_steps(&job.id).await.unwrap();
    let status_of = |name: &str| steps.iter().find(|s| s.step_name == name).unwrap().status;
    assert_eq!(status_of("collect_website"), StepStatus::Failed);
    assert_eq!(status_of("collect_amazon_reviews"), StepStatus::Skipped);
    assert_eq!(status_of("report_synthesis"), StepStatus::Skipped);
    assert_eq!(h.store.outstanding_count(&job.id).await.unwrap(), 0);
}

#[tokio::test]
async fn optional_source_failure_is_tolerated() {
    let reddit = Arc::new(
        MockWorker::new(SourceType::Reddit)
            .returning(MockResponse::Result(WorkerResult::failure("rate limited"))),
    );
    let h = Harness::new(vec![
        Arc::new(MockWorker::new(SourceType::Website)),
        Arc::new(MockWorker::new(SourceType::AmazonReviews)),
        reddit,
    ]);
    let job = h.pipeline.submit(submission()).await.unwrap();
    h.dispatcher().drain().await.unwrap();

    let job = h.pipeline.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);

    let statuses = h.pipeline.task_statuses(&job.id).await.unwrap();
    assert_eq!(statuses[&SourceType::Reddit], ClassifiedStatus::Failed);

    let requests = h.reports.requests();
    let request = &requests[0];
    assert_eq!(request.evidence.len(), 2);
    assert!(request.notes.iter().any(|n| n.contains("reddit failed: rate limited")));
}

#[tokio::test]
async fn empty_amazon_results_are_no_data_not_failure() {
    let amazon = Arc::new(MockWorker::new(SourceType::AmazonReviews).returning(
        MockResponse::Result(WorkerResult::no_data(SourcePayload::Reviews { reviews: vec![] })),
    ));
    let h = Harness::new(vec![Arc::new(MockWorker::new(SourceType::Website)), amazon.clone()]);
    let job = h.pipeline.submit(submission()).await.unwrap();
    h.dispatcher().drain().await.unwrap();

    let statuses = h.pipeline.task_statuses(&job.id).await.unwrap();
    assert_eq!(statuses[&SourceType::AmazonReviews], ClassifiedStatus::CompletedNoData);
    assert_eq!(amazon.call_count(), 1);

    let job = h.pipeline.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.confidence, Some(ConfidenceLevel::Low));
}

#[tokio::test]
async fn timeouts_are_retried_until_attempts_run_out() {
    let website = Arc::new(MockWorker::new(SourceType::Website).returning(MockResponse::Hang));
    let h = Harness::new(vec![website.clone()]);
    let job = h.pipeline.submit(submission()).await.unwrap();

    let dispatcher = h.dispatcher();
    let mut outcomes = Vec::new();
    while let Some(outcome) = dispatcher.dispatch_next().await.unwrap() {
        outcomes.push(outcome);
    }

    assert_eq!(website.call_count(), 3);
    assert!(matches!(outcomes[0], TaskOutcome::Retrying { attempts: 1, .. }));
    assert!(matches!(outcomes[1], TaskOutcome::Retrying { attempts: 2, .. }));
    assert_eq!(outcomes[2], TaskOutcome::Finished(ClassifiedStatus::Failed));

    let attempts: Vec<u32> = website.calls().iter().map(|c| c.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);

    let records = h.pipeline.task_records(&job.id).await.unwrap();
    assert_eq!(records[0].attempts, 3);
    assert_eq!(records[0].state, TaskState::Done);
    assert!(records[0].last_error.as_deref().unwrap().contains("timed out"));

    let job = h.pipeline.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
}

#[tokio::test]
async fn transient_error_then_success() {
    let website = Arc::new(
        MockWorker::new(SourceType::Website).then(MockResponse::Error("connection reset".into())),
    );
    let h = Harness::new(vec![website.clone()]);
    let job = h.pipeline.submit(submission()).await.unwrap();
    h.dispatcher().drain().await.unwrap();

    assert_eq!(website.call_count(), 2);
    let records = h.pipeline.task_records(&job.id).await.unwrap();
    assert_eq!(records[0].attempts, 2);
    assert_eq!(records[0].status, ClassifiedStatus::Completed);
    assert_eq!(
        h.pipeline.job(&job.id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn stuck_task_is_reclaimed_exactly_once() {
    let website = Arc::new(MockWorker::new(SourceType::Website));
    let h = Harness::new(vec![website.clone()]);
    let job = h.pipeline.submit(submission()).await.unwrap();

    // A dispatcher claims the task and then disappears.
    let Dequeued::Task(lost_claim) = h.store.dequeue().await.unwrap() else {
        panic!("expected a task");
    };

    let dispatcher = Arc::new(h.dispatcher());
    let sweeper = StuckTaskSweeper::new(
        h.store.clone(),
        dispatcher.clone(),
        SweeperConfig::with_stuck_timeout(Duration::ZERO),
    );
    assert_eq!(sweeper.sweep().await.unwrap(), 1);
    assert_eq!(sweeper.sweep().await.unwrap(), 0);

    let records = h.pipeline.task_records(&job.id).await.unwrap();
    assert_eq!(records[0].state, TaskState::Retrying);
    assert_eq!(records[0].attempts, 1);

    // The lost dispatcher comes back late; its result is discarded.
    let token = CancellationToken::new();
    let late = dispatcher.dispatch(lost_claim, &token).await.unwrap();
    assert_eq!(late, TaskOutcome::Stale);

    assert_eq!(dispatcher.drain().await.unwrap(), 1);
    let job = h.pipeline.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(h.reports.requests().len(), 1);
}

#[tokio::test]
async fn persona_stage_receives_collected_evidence() {
    let mut workers = collectors();
    let persona = Arc::new(MockWorker::new(SourceType::PersonaSynthesis));
    workers.push(persona.clone());
    let h = Harness::new(workers);
    let job = h.pipeline.submit(submission()).await.unwrap();

    assert_eq!(h.dispatcher().drain().await.unwrap(), 5);

    assert_eq!(persona.call_count(), 1);
    let calls = persona.calls();
    let evidence = &calls[0].params.evidence;
    assert_eq!(evidence.len(), 4);
    assert!(evidence.iter().all(|e| e.source != SourceType::PersonaSynthesis));

    let requests = h.reports.requests();
    let request = &requests[0];
    assert!(request
        .evidence
        .iter()
        .any(|e| e.source == SourceType::PersonaSynthesis));

    let job = h.pipeline.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let steps = h.pipeline.debug_steps(&job.id).await.unwrap();
    assert_eq!(steps.len(), 6);
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));
}

#[tokio::test]
async fn no_mandatory_data_completes_with_low_confidence_notice() {
    let website = Arc::new(MockWorker::new(SourceType::Website).returning(MockResponse::Result(
        WorkerResult::no_data(SourcePayload::Empty),
    )));
    let amazon = Arc::new(MockWorker::new(SourceType::AmazonReviews).returning(
        MockResponse::Result(WorkerResult::no_data(SourcePayload::Reviews { reviews: vec![] })),
    ));
    let h = Harness::with_reports(
        vec![website, amazon, Arc::new(MockWorker::new(SourceType::Reddit))],
        MockReportGenerator::new("Forum sentiment only"),
    );
    let job = h.pipeline.submit(submission()).await.unwrap();
    h.dispatcher().drain().await.unwrap();

    let job = h.pipeline.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.confidence, Some(ConfidenceLevel::Insufficient));
    let report = job.report.unwrap();
    assert!(report.starts_with(LOW_CONFIDENCE_NOTICE));
    assert!(report.contains("Forum sentiment only"));
}

#[tokio::test]
async fn report_failure_fails_job() {
    let h = Harness::with_reports(collectors(), MockReportGenerator::failing("context too long"));
    let job = h.pipeline.submit(submission()).await.unwrap();
    h.dispatcher().drain().await.unwrap();

    let job = h.pipeline.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("context too long"));
}

#[tokio::test]
async fn broken_tracker_does_not_change_outcome() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let registry = collectors()
        .into_iter()
        .fold(WorkerRegistry::new(), |registry, worker| registry.with_worker(worker));
    let deps = PipelineDeps::new(
        store.clone(),
        registry,
        Arc::new(MockReportGenerator::new("Report")),
    )
    .with_tracker(Arc::new(FailingTracker));
    let pipeline = ResearchPipeline::new(deps);

    let job = pipeline.submit(submission()).await.unwrap();
    pipeline
        .dispatcher(Harness::dispatcher_config())
        .drain()
        .await
        .unwrap();

    let job = store.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(pipeline.debug_steps(&job.id).await.is_err());
}

#[tokio::test]
async fn run_loop_processes_jobs_until_cancelled() {
    let h = Harness::new(collectors());
    let first = h.pipeline.submit(submission()).await.unwrap();
    let second = h.pipeline.submit(submission()).await.unwrap();

    let mut config = Harness::dispatcher_config();
    config.poll_interval = Duration::from_millis(10);
    let dispatcher = Arc::new(h.pipeline.dispatcher(config));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(dispatcher.run(cancel.clone()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let a = h.pipeline.job(&first.id).await.unwrap().status;
        let b = h.pipeline.job(&second.id).await.unwrap().status;
        if a.is_terminal() && b.is_terminal() {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "jobs did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    cancel.cancel();
    handle.await.unwrap();

    assert_eq!(
        h.pipeline.job(&first.id).await.unwrap().status,
        JobStatus::Completed
    );
    assert_eq!(
        h.pipeline.job(&second.id).await.unwrap().status,
        JobStatus::Completed
    );
    assert_eq!(h.reports.requests().len(), 2);
}

#[tokio::test]
async fn shutdown_requeues_without_consuming_an_attempt() {
    let website = Arc::new(MockWorker::new(SourceType::Website).then(MockResponse::Delayed(
        Duration::from_secs(30),
        WorkerResult::with_data(SourcePayload::Empty),
    )));
    let h = Harness::new(vec![website.clone()]);
    let job = h.pipeline.submit(submission()).await.unwrap();

    let config = Harness::dispatcher_config().with_timeout(SourceType::Website, Duration::from_secs(60));
    let dispatcher = h.pipeline.dispatcher(config);
    let Dequeued::Task(claimed) = h.store.dequeue().await.unwrap() else {
        panic!("expected a task");
    };

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let outcome = dispatcher.dispatch(claimed, &cancel).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Interrupted);
    assert_eq!(website.cancellations(), 1);

    // The next attempt is still the first one.
    assert_eq!(dispatcher.drain().await.unwrap(), 1);
    assert_eq!(website.calls()[1].attempt, 1);
    assert_eq!(
        h.pipeline.job(&job.id).await.unwrap().status,
        JobStatus::Completed
    );
}

#[tokio::test]
async fn run_loop_waits_for_interrupted_attempts_before_returning() {
    let website = Arc::new(MockWorker::new(SourceType::Website).then(MockResponse::Delayed(
        Duration::from_secs(30),
        WorkerResult::with_data(SourcePayload::Empty),
    )));
    let h = Harness::new(vec![website.clone()]);
    let job = h.pipeline.submit(submission()).await.unwrap();

    let mut config =
        Harness::dispatcher_config().with_timeout(SourceType::Website, Duration::from_secs(60));
    config.poll_interval = Duration::from_millis(5);
    let dispatcher = Arc::new(h.pipeline.dispatcher(config));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(dispatcher.run(cancel.clone()));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while website.call_count() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "worker was never called");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();
    handle.await.unwrap();

    let records = h.pipeline.task_records(&job.id).await.unwrap();
    assert_eq!(records[0].state, TaskState::Queued);
    let Dequeued::Task(requeued) = h.store.dequeue().await.unwrap() else {
        panic!("interrupted task was not requeued");
    };
    assert_eq!(requeued.task.attempts, 0);
}

/// Queue whose enqueues take as long as a database round trip.
struct SlowEnqueue {
    inner: Arc<MemoryStore>,
    delay: Duration,
}

#[async_trait]
impl TaskQueue for SlowEnqueue {
    async fn enqueue(&self, task: TaskDescriptor) -> voc_pipeline::Result<EnqueueResult> {
        let result = self.inner.enqueue(task).await;
        tokio::time::sleep(self.delay).await;
        result
    }

    async fn enqueue_batch(
        &self,
        tasks: Vec<TaskDescriptor>,
    ) -> voc_pipeline::Result<Vec<EnqueueResult>> {
        let result = self.inner.enqueue_batch(tasks).await;
        tokio::time::sleep(self.delay).await;
        result
    }

    async fn dequeue(&self) -> voc_pipeline::Result<Dequeued> {
        self.inner.dequeue().await
    }

    async fn requeue(
        &self,
        claim: &ClaimedTask,
        attempts: u32,
        not_before: DateTime<Utc>,
    ) -> voc_pipeline::Result<bool> {
        self.inner.requeue(claim, attempts, not_before).await
    }

    async fn is_current(&self, claim: &ClaimedTask) -> voc_pipeline::Result<bool> {
        self.inner.is_current(claim).await
    }

    async fn finish(&self, claim: &ClaimedTask) -> voc_pipeline::Result<Option<usize>> {
        self.inner.finish(claim).await
    }

    async fn mark_task_done(&self, job_id: &str, source: SourceType) -> voc_pipeline::Result<usize> {
        self.inner.mark_task_done(job_id, source).await
    }

    async fn outstanding_count(&self, job_id: &str) -> voc_pipeline::Result<usize> {
        self.inner.outstanding_count(job_id).await
    }

    async fn outstanding(&self, job_id: &str) -> voc_pipeline::Result<Vec<SourceType>> {
        self.inner.outstanding(job_id).await
    }

    async fn in_flight_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> voc_pipeline::Result<Vec<ClaimedTask>> {
        self.inner.in_flight_older_than(cutoff).await
    }
}

#[tokio::test]
async fn job_submitted_under_a_running_dispatcher_waits_for_every_source() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let reports = Arc::new(MockReportGenerator::new("# Report"));
    let registry = collectors()
        .into_iter()
        .fold(WorkerRegistry::new(), |registry, worker| registry.with_worker(worker));
    let mut deps = PipelineDeps::new(store.clone(), registry, reports.clone());
    deps.queue = Arc::new(SlowEnqueue {
        inner: store.clone(),
        delay: Duration::from_millis(100),
    });
    let pipeline = ResearchPipeline::new(deps);

    let mut config = Harness::dispatcher_config();
    config.poll_interval = Duration::from_millis(5);
    let dispatcher = Arc::new(pipeline.dispatcher(config));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(dispatcher.run(cancel.clone()));

    let job = pipeline.submit(submission()).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !pipeline.job(&job.id).await.unwrap().status.is_terminal() {
        assert!(tokio::time::Instant::now() < deadline, "job did not finish");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cancel.cancel();
    handle.await.unwrap();

    let job = pipeline.job(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    let statuses = pipeline.task_statuses(&job.id).await.unwrap();
    assert_eq!(statuses.len(), 4);
    assert!(statuses.values().all(|s| *s == ClassifiedStatus::Completed));
    assert_eq!(reports.requests().len(), 1);
    assert_eq!(reports.requests()[0].evidence.len(), 4);
}
