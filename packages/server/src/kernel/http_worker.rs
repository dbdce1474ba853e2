//! Source worker backed by an HTTP extraction service.
//!
//! Each source's extractor runs as its own service. The worker POSTs the
//! request as JSON and normalizes whatever comes back through the adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use voc_pipeline::adapter::adapt;
use voc_pipeline::{PipelineError, SourceType, SourceWorker, WorkerRequest, WorkerResult};

/// Calls one extraction endpoint for one source.
#[derive(Clone)]
pub struct HttpSourceWorker {
    http_client: Client,
    source: SourceType,
    url: String,
}

impl HttpSourceWorker {
    pub fn new(source: SourceType, url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), source, url)
    }

    /// Share a client (and its connection pool) across workers.
    pub fn with_client(http_client: Client, source: SourceType, url: impl Into<String>) -> Self {
        Self {
            http_client,
            source,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn call(&self, request: &WorkerRequest) -> voc_pipeline::Result<WorkerResult> {
        let start = std::time::Instant::now();

        let response = self
            .http_client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| PipelineError::worker(self.source, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(source = %self.source, status = %status, error = %body, "worker returned error status");
            return Err(PipelineError::worker(
                self.source,
                format!("HTTP {status}: {body}"),
            ));
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| PipelineError::worker(self.source, format!("invalid response body: {e}")))?;

        debug!(
            source = %self.source,
            job_id = %request.job_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "worker responded"
        );
        Ok(adapt(self.source, &raw))
    }
}

#[async_trait]
impl SourceWorker for HttpSourceWorker {
    fn source(&self) -> SourceType {
        self.source
    }

    async fn invoke(
        &self,
        request: &WorkerRequest,
        cancel: CancellationToken,
    ) -> voc_pipeline::Result<WorkerResult> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::worker(self.source, "cancelled")),
            result = self.call(request) => result,
        }
    }
}

/// Default client for worker calls.
///
/// The dispatcher enforces per-source deadlines; this timeout only bounds
/// connections that never complete.
pub fn worker_client() -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(300))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use voc_pipeline::{ClassifiedStatus, ServiceTier, TaskParams};
    use voc_pipeline::{classify, NewJob};

    fn request(source: SourceType) -> WorkerRequest {
        let job = NewJob::builder()
            .id("job-1")
            .target_url("https://groundluxe.com")
            .keywords(vec!["grounding sheets".to_string()])
            .tier(ServiceTier::Premium)
            .build()
            .into_job()
            .unwrap();
        WorkerRequest {
            job_id: job.id.clone(),
            source,
            attempt: 1,
            params: TaskParams::for_job(&job, source),
        }
    }

    #[tokio::test]
    async fn amazon_empty_reviews_classify_as_no_data() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/amazon")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "hasActualData": false, "reviews": []}"#)
            .create_async()
            .await;

        let worker = HttpSourceWorker::new(SourceType::AmazonReviews, format!("{}/amazon", server.url()));
        let result = worker
            .invoke(&request(SourceType::AmazonReviews), CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(
            classify(Some(&result), SourceType::AmazonReviews),
            ClassifiedStatus::CompletedNoData
        );
    }

    #[tokio::test]
    async fn request_body_carries_job_and_limit() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/website")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "job_id": "job-1",
                "source": "website",
                "attempt": 1,
                "limit": 200,
            })))
            .with_status(200)
            .with_body(r#"{"success": true, "hasActualData": true, "websiteData": {"customerReviews": ["great"]}}"#)
            .create_async()
            .await;

        let worker = HttpSourceWorker::new(SourceType::Website, format!("{}/website", server.url()));
        let result = worker
            .invoke(&request(SourceType::Website), CancellationToken::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.payload.item_count(), 1);
    }

    #[tokio::test]
    async fn server_error_is_a_retryable_worker_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/reddit")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let worker = HttpSourceWorker::new(SourceType::Reddit, format!("{}/reddit", server.url()));
        let err = worker
            .invoke(&request(SourceType::Reddit), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Worker { .. }));
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn cancelled_token_aborts_call() {
        let worker = HttpSourceWorker::new(SourceType::Reddit, "http://127.0.0.1:9/unreachable");
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = worker
            .invoke(&request(SourceType::Reddit), cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
