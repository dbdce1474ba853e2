//! Result classification.
//!
//! Maps a worker result to one of four statuses. Order matters:
//!
//! 1. no result → `not_started`
//! 2. error set or `success == false` → `failed`
//! 3. `has_actual_data == Some(true)` → `completed`
//! 4. `has_actual_data == Some(false)` → `completed_no_data`
//! 5. payload shape fallback for results without a verdict
//!
//! The worker's own verdict outranks list emptiness: a list of placeholder
//! reviews is non-empty but carries nothing.

use crate::types::{ClassifiedStatus, SourceType, WorkerResult};

/// Classify a task result.
///
/// `source` is accepted so callers classify per task; the payload variant
/// already carries the source-specific shape.
pub fn classify(result: Option<&WorkerResult>, _source: SourceType) -> ClassifiedStatus {
    let Some(result) = result else {
        return ClassifiedStatus::NotStarted;
    };

    if result.error_message().is_some() || !result.success {
        return ClassifiedStatus::Failed;
    }

    match result.has_actual_data {
        Some(true) => ClassifiedStatus::Completed,
        Some(false) => ClassifiedStatus::CompletedNoData,
        None if result.payload.has_legacy_data() => ClassifiedStatus::Completed,
        None => ClassifiedStatus::CompletedNoData,
    }
}
