//! Pipeline dependencies (using traits for testability)
//!
//! One container holds every collaborator the dispatcher, sweeper, and
//! facade need. Nothing in the pipeline reaches for global state.

use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::DEFAULT_REPORT_TIMEOUT;
use crate::traits::{JobStore, ReportGenerator, StepTracker, TaskQueue, WorkerRegistry};

/// Pipeline dependencies, shared by value (all fields are cheap clones).
#[derive(Clone)]
pub struct PipelineDeps {
    pub jobs: Arc<dyn JobStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub tracker: Arc<dyn StepTracker>,
    pub workers: WorkerRegistry,
    pub reports: Arc<dyn ReportGenerator>,
    /// Deadline for one report generation call
    pub report_timeout: Duration,
}

impl PipelineDeps {
    /// Build from a single store that backs jobs, queue, and steps.
    pub fn new<S>(store: Arc<S>, workers: WorkerRegistry, reports: Arc<dyn ReportGenerator>) -> Self
    where
        S: JobStore + TaskQueue + StepTracker + 'static,
    {
        Self {
            jobs: store.clone(),
            queue: store.clone(),
            tracker: store,
            workers,
            reports,
            report_timeout: DEFAULT_REPORT_TIMEOUT,
        }
    }

    /// Replace the step tracker.
    pub fn with_tracker(mut self, tracker: Arc<dyn StepTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_report_timeout(mut self, timeout: Duration) -> Self {
        self.report_timeout = timeout;
        self
    }
}
