//! Testing utilities including mock implementations.
//!
//! These are useful for exercising the dispatcher and aggregator without
//! real source workers or LLM calls.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};
use crate::traits::{ReportGenerator, SourceWorker, StepTracker, WorkerRequest};
use crate::types::{DebugStep, SourcePayload, SourceType, StepUpdate, SynthesisRequest, WorkerResult};

/// One scripted reply from a [`MockWorker`].
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Return this result
    Result(WorkerResult),
    /// Return a worker error (retryable)
    Error(String),
    /// Wait for this long, then return the result
    Delayed(Duration, WorkerResult),
    /// Never answer; resolves only when cancelled
    Hang,
}

/// A mock source worker.
///
/// Replies from a script first, then falls back to a default reply.
/// Every call is recorded for assertions.
pub struct MockWorker {
    source: SourceType,
    script: Arc<RwLock<VecDeque<MockResponse>>>,
    fallback: MockResponse,
    calls: Arc<RwLock<Vec<WorkerRequest>>>,
    cancellations: Arc<RwLock<usize>>,
}

impl MockWorker {
    /// Create a worker that always returns sample data for `source`.
    pub fn new(source: SourceType) -> Self {
        Self {
            source,
            script: Arc::new(RwLock::new(VecDeque::new())),
            fallback: MockResponse::Result(WorkerResult::with_data(sample_payload(source))),
            calls: Arc::new(RwLock::new(Vec::new())),
            cancellations: Arc::new(RwLock::new(0)),
        }
    }

    /// Replace the default reply.
    pub fn returning(mut self, response: MockResponse) -> Self {
        self.fallback = response;
        self
    }

    /// Queue a reply for the next unscripted call.
    pub fn then(self, response: MockResponse) -> Self {
        self.script.write().unwrap().push_back(response);
        self
    }

    /// Requests received, in order.
    pub fn calls(&self) -> Vec<WorkerRequest> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Number of calls that observed cancellation.
    pub fn cancellations(&self) -> usize {
        *self.cancellations.read().unwrap()
    }
}

#[async_trait]
impl SourceWorker for MockWorker {
    fn source(&self) -> SourceType {
        self.source
    }

    async fn invoke(&self, request: &WorkerRequest, cancel: CancellationToken) -> Result<WorkerResult> {
        self.calls.write().unwrap().push(request.clone());
        let response = self
            .script
            .write()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match response {
            MockResponse::Result(result) => Ok(result),
            MockResponse::Error(message) => Err(PipelineError::worker(self.source, message)),
            MockResponse::Delayed(delay, result) => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        *self.cancellations.write().unwrap() += 1;
                        Err(PipelineError::worker(self.source, "cancelled"))
                    }
                    _ = tokio::time::sleep(delay) => Ok(result),
                }
            }
            MockResponse::Hang => {
                cancel.cancelled().await;
                *self.cancellations.write().unwrap() += 1;
                Err(PipelineError::worker(self.source, "cancelled"))
            }
        }
    }
}

/// Sample payload with real data for a source.
pub fn sample_payload(source: SourceType) -> SourcePayload {
    match source {
        SourceType::Website => SourcePayload::Website {
            customer_reviews: vec!["I sleep through the night now".into()],
            testimonials: vec!["Best purchase this year".into()],
            pain_points: vec!["Shipping took two weeks".into()],
        },
        SourceType::AmazonReviews => SourcePayload::Reviews {
            reviews: (0..12)
                .map(|i| json!({ "rating": 4, "text": format!("Review {i}") }))
                .collect(),
        },
        SourceType::Reddit => SourcePayload::Discussions {
            posts: vec![json!({ "title": "Do grounding sheets work?", "score": 42 })],
        },
        SourceType::YoutubeComments => SourcePayload::Comments {
            comments: vec![json!({ "text": "Tried these for a month", "likes": 7 })],
        },
        SourceType::PersonaSynthesis => SourcePayload::Persona {
            text: "Wellness-focused adults aged 30 to 55 who struggle with sleep quality, \
                   research products carefully, and value natural remedies over medication."
                .into(),
        },
    }
}

/// A mock report generator.
#[derive(Default)]
pub struct MockReportGenerator {
    text: String,
    error: Option<String>,
    delay: Option<Duration>,
    requests: Arc<RwLock<Vec<SynthesisRequest>>>,
}

impl MockReportGenerator {
    /// Generator that returns `text` for every request.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// Generator that fails every request.
    pub fn failing(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Requests received, in order.
    pub fn requests(&self) -> Vec<SynthesisRequest> {
        self.requests.read().unwrap().clone()
    }
}

#[async_trait]
impl ReportGenerator for MockReportGenerator {
    async fn generate(&self, request: &SynthesisRequest) -> Result<String> {
        self.requests.write().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.error {
            Some(error) => Err(PipelineError::Report(error.clone())),
            None => Ok(self.text.clone()),
        }
    }
}

/// A step tracker whose every call fails.
#[derive(Default)]
pub struct FailingTracker;

#[async_trait]
impl StepTracker for FailingTracker {
    async fn initialize_steps(&self, _analysis_id: &str, _step_names: &[String]) -> Result<()> {
        Err(PipelineError::storage("tracker unavailable"))
    }

    async fn update_step(&self, _analysis_id: &str, _step_name: &str, _update: StepUpdate) -> Result<()> {
        Err(PipelineError::storage("tracker unavailable"))
    }

    async fn get_steps(&self, _analysis_id: &str) -> Result<Vec<DebugStep>> {
        Err(PipelineError::storage("tracker unavailable"))
    }
}
