//! Report aggregation.
//!
//! Runs once a job has no outstanding tasks. Collects the payloads of
//! sources classified `completed`, grades confidence, asks the report
//! generator for text, and moves the job to its terminal state.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, instrument, warn};

use crate::classifier::classify;
use crate::error::{PipelineError, Result};
use crate::traits::{JobStore, ReportGenerator, StepTracker};
use crate::types::report::LOW_CONFIDENCE_NOTICE;
use crate::types::step::REPORT_STEP;
use crate::types::{
    ClassifiedStatus, ConfidenceLevel, Evidence, JobUpdate, ReportOutcome, SourceType, StepUpdate,
    SynthesisRequest, TaskState,
};

/// Item count below which a report is flagged as thin.
pub const MIN_RECOMMENDED_ITEMS: usize = 20;

/// Item count for medium confidence.
const MEDIUM_ITEMS: usize = 10;

/// Default deadline for one report generation call.
pub const DEFAULT_REPORT_TIMEOUT: Duration = Duration::from_secs(120);

/// Builds synthesis requests and records report outcomes.
pub struct Aggregator {
    jobs: Arc<dyn JobStore>,
    tracker: Arc<dyn StepTracker>,
    reports: Arc<dyn ReportGenerator>,
    timeout: Duration,
}

impl Aggregator {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        tracker: Arc<dyn StepTracker>,
        reports: Arc<dyn ReportGenerator>,
    ) -> Self {
        Self {
            jobs,
            tracker,
            reports,
            timeout: DEFAULT_REPORT_TIMEOUT,
        }
    }

    /// Override the report generation deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Assemble the synthesis request for a job from its stored results.
    pub async fn build_request(&self, job_id: &str) -> Result<SynthesisRequest> {
        let job = self
            .jobs
            .get_job(job_id)
            .await?
            .ok_or_else(|| PipelineError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        let results = self.jobs.get_task_results(job_id).await?;

        let mut evidence = Vec::new();
        let mut notes = Vec::new();
        for (source, result) in &results {
            match classify(Some(result), *source) {
                ClassifiedStatus::Completed => evidence.push(Evidence {
                    source: *source,
                    payload: result.payload.clone(),
                }),
                ClassifiedStatus::CompletedNoData => {
                    notes.push(format!("{source} returned no usable data"));
                }
                ClassifiedStatus::Failed => notes.push(format!(
                    "{source} failed: {}",
                    result.error_message().unwrap_or("worker reported failure")
                )),
                ClassifiedStatus::NotStarted => {}
            }
        }

        let items: usize = evidence.iter().map(|e| e.payload.item_count()).sum();
        let confidence = grade(&evidence, items);
        if items < MIN_RECOMMENDED_ITEMS {
            notes.push(format!(
                "WARNING: Below minimum recommended review count for reliable analysis \
                 ({items} of {MIN_RECOMMENDED_ITEMS})"
            ));
        }

        Ok(SynthesisRequest {
            job_id: job.id,
            target_url: job.target_url,
            keywords: job.keywords,
            evidence,
            confidence,
            notes,
        })
    }

    /// Seeded mandatory sources whose task is not done yet.
    pub async fn pending_mandatory(&self, job_id: &str) -> Result<Vec<SourceType>> {
        Ok(self
            .jobs
            .get_task_records(job_id)
            .await?
            .into_iter()
            .filter(|r| r.source.is_mandatory() && r.state != TaskState::Done)
            .map(|r| r.source)
            .collect())
    }

    /// Produce and record the final report for a job.
    ///
    /// Report generator failures fail the job and are returned as
    /// `ReportOutcome::Failed`; only store errors surface as `Err`. Nothing
    /// is written while a seeded mandatory task is not done.
    #[instrument(skip(self))]
    pub async fn synthesize(&self, job_id: &str) -> Result<ReportOutcome> {
        let Some(job) = self.jobs.get_job(job_id).await? else {
            return Err(PipelineError::JobNotFound {
                job_id: job_id.to_string(),
            });
        };
        if job.status.is_terminal() {
            return Ok(ReportOutcome::Skipped);
        }

        let pending = self.pending_mandatory(job_id).await?;
        if !pending.is_empty() {
            warn!(job_id, ?pending, "mandatory tasks unfinished, deferring report");
            return Ok(ReportOutcome::Deferred { pending });
        }

        let request = self.build_request(job_id).await?;
        self.track(
            job_id,
            StepUpdate::in_progress(Some(json!({
                "sources": request.evidence.iter().map(|e| e.source).collect::<Vec<SourceType>>(),
                "items": request.item_count(),
                "confidence": request.confidence,
                "notes": request.notes,
            }))),
        )
        .await;

        let report = if request.evidence.is_empty() {
            info!(job_id, "no usable evidence, skipping report generation");
            Ok(insufficient_report(&request))
        } else {
            self.generate(&request).await
        };

        match report {
            Ok(text) => {
                let update = JobUpdate::completed(text, request.confidence);
                match self.jobs.update_job_status(job_id, update).await {
                    Ok(_) => {}
                    Err(PipelineError::InvalidTransition { .. }) => return Ok(ReportOutcome::Skipped),
                    Err(e) => return Err(e),
                }
                self.track(
                    job_id,
                    StepUpdate::completed(Some(json!({ "confidence": request.confidence }))),
                )
                .await;
                info!(job_id, confidence = request.confidence.as_str(), "report completed");
                Ok(ReportOutcome::Completed {
                    confidence: request.confidence,
                })
            }
            Err(e) => {
                let error = e.to_string();
                warn!(job_id, error = %error, "report generation failed");
                match self
                    .jobs
                    .update_job_status(job_id, JobUpdate::failed(error.clone()))
                    .await
                {
                    Ok(_) => {}
                    Err(PipelineError::InvalidTransition { .. }) => return Ok(ReportOutcome::Skipped),
                    Err(e) => return Err(e),
                }
                self.track(job_id, StepUpdate::failed(error.clone())).await;
                Ok(ReportOutcome::Failed { error })
            }
        }
    }

    async fn generate(&self, request: &SynthesisRequest) -> Result<String> {
        let text = tokio::time::timeout(self.timeout, self.reports.generate(request))
            .await
            .map_err(|_| PipelineError::Timeout {
                operation: "report generation".to_string(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|e| match e {
                PipelineError::Report(_) | PipelineError::Timeout { .. } => e,
                other => PipelineError::Report(other.to_string()),
            })?;

        if text.trim().is_empty() {
            return Err(PipelineError::Report("generator returned empty text".into()));
        }

        Ok(match request.confidence {
            ConfidenceLevel::Insufficient => format!("{LOW_CONFIDENCE_NOTICE}\n\n{text}"),
            _ => text,
        })
    }

    async fn track(&self, job_id: &str, update: StepUpdate) {
        if let Err(e) = self.tracker.update_step(job_id, REPORT_STEP, update).await {
            warn!(job_id, error = %e, "failed to record report step");
        }
    }
}

/// Confidence from completed evidence.
fn grade(evidence: &[Evidence], items: usize) -> ConfidenceLevel {
    if !evidence.iter().any(|e| e.source.is_mandatory()) {
        ConfidenceLevel::Insufficient
    } else if items >= MIN_RECOMMENDED_ITEMS && evidence.len() >= 2 {
        ConfidenceLevel::High
    } else if items >= MEDIUM_ITEMS {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

/// Report text used when no source produced data at all.
fn insufficient_report(request: &SynthesisRequest) -> String {
    let mut text = format!(
        "{LOW_CONFIDENCE_NOTICE}\n\nNo customer data could be collected for {}.",
        request.target_url
    );
    for note in &request.notes {
        text.push_str("\n- ");
        text.push_str(note);
    }
    text
}
