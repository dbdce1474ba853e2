//! Synthesis request handed to the report generator.

use serde::{Deserialize, Serialize};

use crate::types::job::ConfidenceLevel;
use crate::types::result::Evidence;
use crate::types::source::SourceType;

/// Prefix placed on reports built without mandatory evidence.
pub const LOW_CONFIDENCE_NOTICE: &str = "LOW CONFIDENCE: insufficient data. None of the required \
sources (website, marketplace reviews) returned usable customer data, so the findings below \
are not reliable.";

/// Everything the report generator sees for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub job_id: String,
    pub target_url: String,
    pub keywords: Vec<String>,
    pub evidence: Vec<Evidence>,
    pub confidence: ConfidenceLevel,
    pub notes: Vec<String>,
}

impl SynthesisRequest {
    /// Total evidence items across sources.
    pub fn item_count(&self) -> usize {
        self.evidence.iter().map(|e| e.payload.item_count()).sum()
    }
}

/// Final outcome recorded on the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReportOutcome {
    Completed { confidence: ConfidenceLevel },
    Failed { error: String },
    /// Job was already terminal; nothing was written.
    Skipped,
    /// Mandatory tasks are still unfinished; nothing was written.
    Deferred { pending: Vec<SourceType> },
}
