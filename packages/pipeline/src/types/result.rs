//! Worker result contract and classified status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;
use crate::types::source::SourceType;

/// Persona text at or below this many characters counts as no data.
pub const PERSONA_MIN_CHARS: usize = 100;

/// Structured output of a source worker.
///
/// Item contents are opaque to the pipeline; only their presence matters
/// for classification.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourcePayload {
    Website {
        #[serde(default)]
        customer_reviews: Vec<String>,
        #[serde(default)]
        testimonials: Vec<String>,
        #[serde(default)]
        pain_points: Vec<String>,
    },
    Reviews {
        #[serde(default)]
        reviews: Vec<Value>,
    },
    Discussions {
        #[serde(default)]
        posts: Vec<Value>,
    },
    Comments {
        #[serde(default)]
        comments: Vec<Value>,
    },
    Persona {
        #[serde(default)]
        text: String,
    },
    #[default]
    Empty,
}

impl SourcePayload {
    /// Number of evidence items carried.
    pub fn item_count(&self) -> usize {
        match self {
            SourcePayload::Website {
                customer_reviews,
                testimonials,
                pain_points,
            } => customer_reviews.len() + testimonials.len() + pain_points.len(),
            SourcePayload::Reviews { reviews } => reviews.len(),
            SourcePayload::Discussions { posts } => posts.len(),
            SourcePayload::Comments { comments } => comments.len(),
            SourcePayload::Persona { text } => usize::from(!text.trim().is_empty()),
            SourcePayload::Empty => 0,
        }
    }

    /// Shape-based data check for results that predate `has_actual_data`.
    pub fn has_legacy_data(&self) -> bool {
        match self {
            SourcePayload::Persona { text } => text.chars().count() > PERSONA_MIN_CHARS,
            other => other.item_count() > 0,
        }
    }
}

/// What a source worker returns for one task.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkerResult {
    pub success: bool,
    /// The worker's own verdict on data validity; absent on legacy workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_actual_data: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub payload: SourcePayload,
}

impl WorkerResult {
    /// Successful result the worker vouches contains usable data.
    pub fn with_data(payload: SourcePayload) -> Self {
        Self {
            success: true,
            has_actual_data: Some(true),
            error: None,
            payload,
        }
    }

    /// Successful result the worker says has nothing usable.
    pub fn no_data(payload: SourcePayload) -> Self {
        Self {
            success: true,
            has_actual_data: Some(false),
            error: None,
            payload,
        }
    }

    /// Successful result without a data verdict.
    pub fn legacy(payload: SourcePayload) -> Self {
        Self {
            success: true,
            has_actual_data: None,
            error: None,
            payload,
        }
    }

    /// Explicit failure.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            has_actual_data: None,
            error: Some(error.into()),
            payload: SourcePayload::Empty,
        }
    }

    /// The error message, treating blank strings as unset.
    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.trim().is_empty())
    }
}

/// Outcome of classifying a task's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifiedStatus {
    NotStarted,
    Failed,
    Completed,
    CompletedNoData,
}

impl ClassifiedStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassifiedStatus::NotStarted => "not_started",
            ClassifiedStatus::Failed => "failed",
            ClassifiedStatus::Completed => "completed",
            ClassifiedStatus::CompletedNoData => "completed_no_data",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ClassifiedStatus::NotStarted)
    }
}

impl fmt::Display for ClassifiedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassifiedStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(ClassifiedStatus::NotStarted),
            "failed" => Ok(ClassifiedStatus::Failed),
            "completed" => Ok(ClassifiedStatus::Completed),
            "completed_no_data" => Ok(ClassifiedStatus::CompletedNoData),
            other => Err(PipelineError::storage(format!(
                "unknown classified status: {other}"
            ))),
        }
    }
}

/// A completed source's payload handed to downstream stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub source: SourceType,
    pub payload: SourcePayload,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn payload_deserializes_from_tagged_json() {
        let payload: SourcePayload = serde_json::from_value(json!({
            "kind": "reviews",
            "reviews": [{"rating": 5, "text": "Great"}]
        }))
        .unwrap();
        assert_eq!(payload.item_count(), 1);
    }

    #[test]
    fn short_persona_text_is_not_legacy_data() {
        let short = SourcePayload::Persona {
            text: "x".repeat(PERSONA_MIN_CHARS),
        };
        let long = SourcePayload::Persona {
            text: "x".repeat(PERSONA_MIN_CHARS + 1),
        };
        assert!(!short.has_legacy_data());
        assert!(long.has_legacy_data());
    }

    #[test]
    fn blank_error_is_treated_as_unset() {
        let mut result = WorkerResult::legacy(SourcePayload::Empty);
        result.error = Some("   ".into());
        assert_eq!(result.error_message(), None);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let result: WorkerResult = serde_json::from_value(json!({"success": true})).unwrap();
        assert_eq!(result.has_actual_data, None);
        assert_eq!(result.payload, SourcePayload::Empty);
    }
}
