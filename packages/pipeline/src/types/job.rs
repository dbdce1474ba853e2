//! Research job model and status state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::types::source::ServiceTier;

/// Maximum number of competitor URLs on a submission.
pub const MAX_COMPETITORS: usize = 5;

/// Allowed number of keyword phrases on a submission.
pub const KEYWORD_RANGE: std::ops::RangeInclusive<usize> = 1..=3;

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    ///
    /// Re-asserting `processing` is allowed; terminal states accept nothing.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Processing | JobStatus::Failed) => true,
            (JobStatus::Processing, JobStatus::Processing) => true,
            (JobStatus::Processing, JobStatus::Completed | JobStatus::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(PipelineError::storage(format!("unknown job status: {other}"))),
        }
    }
}

/// How much evidence backed the final report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
    Insufficient,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Insufficient => "insufficient",
        }
    }
}

impl FromStr for ConfidenceLevel {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "high" => Ok(ConfidenceLevel::High),
            "medium" => Ok(ConfidenceLevel::Medium),
            "low" => Ok(ConfidenceLevel::Low),
            "insufficient" => Ok(ConfidenceLevel::Insufficient),
            other => Err(PipelineError::storage(format!("unknown confidence: {other}"))),
        }
    }
}

// ============================================================================
// Job Model
// ============================================================================

/// One end-to-end research request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub target_url: String,
    pub competitor_urls: Vec<String>,
    pub keywords: Vec<String>,
    pub tier: ServiceTier,
    pub status: JobStatus,
    pub report: Option<String>,
    pub confidence: Option<ConfidenceLevel>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Apply a status update in place, enforcing monotonic transitions.
    pub fn apply(&mut self, update: JobUpdate) -> Result<()> {
        if !self.status.can_transition_to(update.status) {
            return Err(PipelineError::InvalidTransition {
                from: self.status,
                to: update.status,
            });
        }

        let now = Utc::now();
        self.status = update.status;
        self.updated_at = now;
        if update.report.is_some() {
            self.report = update.report;
        }
        if update.confidence.is_some() {
            self.confidence = update.confidence;
        }
        if update.error_message.is_some() {
            self.error_message = update.error_message;
        }
        if update.status.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }
}

/// A job submission, validated before it becomes a [`Job`].
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct NewJob {
    /// Caller-supplied ID; generated when absent.
    #[builder(default, setter(strip_option))]
    #[serde(default)]
    pub id: Option<String>,
    pub target_url: String,
    #[builder(default)]
    #[serde(default)]
    pub competitor_urls: Vec<String>,
    pub keywords: Vec<String>,
    #[builder(default)]
    #[serde(default)]
    pub tier: ServiceTier,
}

impl NewJob {
    /// Check submission constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(id) = &self.id {
            if id.trim().is_empty() {
                return Err(PipelineError::invalid_job("job id must not be blank"));
            }
        }
        if !is_http_url(&self.target_url) {
            return Err(PipelineError::invalid_job(
                "target_url must be an http(s) URL",
            ));
        }
        if self.competitor_urls.len() > MAX_COMPETITORS {
            return Err(PipelineError::invalid_job(format!(
                "at most {MAX_COMPETITORS} competitor URLs allowed, got {}",
                self.competitor_urls.len()
            )));
        }
        if let Some(bad) = self.competitor_urls.iter().find(|u| !is_http_url(u)) {
            return Err(PipelineError::invalid_job(format!(
                "competitor URL is not http(s): {bad}"
            )));
        }
        if !KEYWORD_RANGE.contains(&self.keywords.len()) {
            return Err(PipelineError::invalid_job(format!(
                "between {} and {} keyword phrases required, got {}",
                KEYWORD_RANGE.start(),
                KEYWORD_RANGE.end(),
                self.keywords.len()
            )));
        }
        if self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(PipelineError::invalid_job("keyword phrases must not be blank"));
        }
        Ok(())
    }

    /// Validate and build a pending job.
    pub fn into_job(self) -> Result<Job> {
        self.validate()?;
        let now = Utc::now();
        Ok(Job {
            id: self.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            target_url: self.target_url.trim().to_string(),
            competitor_urls: self.competitor_urls,
            keywords: self.keywords.into_iter().map(|k| k.trim().to_string()).collect(),
            tier: self.tier,
            status: JobStatus::Pending,
            report: None,
            confidence: None,
            error_message: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }
}

fn is_http_url(url: &str) -> bool {
    let url = url.trim();
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    matches!(rest, Some(host) if !host.is_empty())
}

/// A status change plus the fields that accompany it.
#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub status: JobStatus,
    pub report: Option<String>,
    pub confidence: Option<ConfidenceLevel>,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn processing() -> Self {
        Self {
            status: JobStatus::Processing,
            report: None,
            confidence: None,
            error_message: None,
        }
    }

    pub fn completed(report: impl Into<String>, confidence: ConfidenceLevel) -> Self {
        Self {
            status: JobStatus::Completed,
            report: Some(report.into()),
            confidence: Some(confidence),
            error_message: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            report: None,
            confidence: None,
            error_message: Some(error.into()),
        }
    }
}
