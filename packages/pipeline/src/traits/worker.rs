//! Source worker and report generator contracts.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::types::{SourceType, SynthesisRequest, TaskParams, WorkerResult};

/// What a worker is invoked with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub job_id: String,
    pub source: SourceType,
    /// 1-based attempt number.
    pub attempt: u32,
    #[serde(flatten)]
    pub params: TaskParams,
}

/// Extractor for one source type.
///
/// Implementations should stop work promptly once `cancel` fires.
#[async_trait]
pub trait SourceWorker: Send + Sync {
    /// Source this worker serves.
    fn source(&self) -> SourceType;

    /// Run one extraction.
    ///
    /// `Err` is treated as a retryable failure; `Ok` with `success: false`
    /// is a terminal failure.
    async fn invoke(&self, request: &WorkerRequest, cancel: CancellationToken)
        -> Result<WorkerResult>;
}

/// Produces the final report text.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    /// Generate report text. Empty text must be reported as an error.
    async fn generate(&self, request: &SynthesisRequest) -> Result<String>;
}

/// Workers keyed by the source they serve.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: HashMap<SourceType, Arc<dyn SourceWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker under its own source, replacing any earlier one.
    pub fn register(&mut self, worker: Arc<dyn SourceWorker>) {
        self.workers.insert(worker.source(), worker);
    }

    /// Builder-style registration.
    pub fn with_worker(mut self, worker: Arc<dyn SourceWorker>) -> Self {
        self.register(worker);
        self
    }

    pub fn get(&self, source: SourceType) -> Option<Arc<dyn SourceWorker>> {
        self.workers.get(&source).cloned()
    }

    pub fn contains(&self, source: SourceType) -> bool {
        self.workers.contains_key(&source)
    }

    /// Collection sources with a registered worker, in step order.
    pub fn collection_sources(&self) -> Vec<SourceType> {
        SourceType::COLLECTION
            .into_iter()
            .filter(|s| self.contains(*s))
            .collect()
    }
}
