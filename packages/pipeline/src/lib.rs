//! Voice-of-Customer Research Pipeline
//!
//! Orchestrates per-source collection tasks for a research job and turns
//! their results into one report.
//!
//! # Flow
//!
//! ```text
//! submit ─► seed one task per source ─► Dispatcher drains queue
//!                                          │
//!                     classify + record ◄──┤ (timeout, retry, backoff)
//!                                          │
//!                  last task finished ─► persona stage ─► Aggregator ─► completed | failed
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use voc_pipeline::{MemoryStore, NewJob, PipelineDeps, ResearchPipeline, WorkerRegistry};
//! use voc_pipeline::testing::{MockReportGenerator, MockWorker};
//!
//! let store = Arc::new(MemoryStore::new());
//! let workers = WorkerRegistry::new()
//!     .with_worker(Arc::new(MockWorker::new(SourceType::Website)));
//! let deps = PipelineDeps::new(store, workers, Arc::new(MockReportGenerator::new("...")));
//!
//! let pipeline = ResearchPipeline::new(deps);
//! let job = pipeline.submit(new_job).await?;
//!
//! let dispatcher = pipeline.dispatcher(DispatcherConfig::default());
//! dispatcher.drain().await?;
//! ```
//!
//! # Modules
//!
//! - [`types`] - Jobs, tasks, worker results, debug steps
//! - [`classifier`] - Result classification
//! - [`adapter`] - Raw worker JSON to typed results
//! - [`traits`] - Store, queue, tracker, worker, and report seams
//! - [`stores`] - Storage implementations (MemoryStore, PostgresStore)
//! - [`dispatcher`] - Queue draining with timeout and retry
//! - [`reclaim`] - Stuck-task sweeper
//! - [`aggregator`] - Report synthesis
//! - [`testing`] - Mock implementations for testing

pub mod adapter;
pub mod aggregator;
pub mod classifier;
pub mod deps;
pub mod dispatcher;
pub mod error;
pub mod pipeline;
pub mod reclaim;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use aggregator::Aggregator;
pub use classifier::classify;
pub use deps::PipelineDeps;
pub use dispatcher::{Dispatcher, DispatcherConfig, RetryPolicy, TaskOutcome};
pub use error::{PipelineError, Result};
pub use pipeline::{PipelineConfig, ResearchPipeline};
pub use reclaim::{StuckTaskSweeper, SweeperConfig};
pub use stores::MemoryStore;
#[cfg(feature = "postgres")]
pub use stores::PostgresStore;
pub use traits::{
    JobStore, ReportGenerator, SourceWorker, StepTracker, TaskQueue, WorkerRegistry, WorkerRequest,
};
pub use types::{
    ClaimedTask, ClassifiedStatus, ConfidenceLevel, DebugStep, Dequeued, EnqueueResult, Evidence,
    Job, JobStatus, JobUpdate, NewJob, ReportOutcome, ServiceTier, SourcePayload, SourceType,
    StepStatus, StepUpdate, SynthesisRequest, TaskDescriptor, TaskParams, TaskRecord, TaskState,
    WorkerResult,
};
