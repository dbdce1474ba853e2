//! Debug step records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PipelineError;

/// Name of the final report step.
pub const REPORT_STEP: &str = "report_synthesis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::InProgress => "in_progress",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StepStatus::Pending),
            "in_progress" => Ok(StepStatus::InProgress),
            "completed" => Ok(StepStatus::Completed),
            "failed" => Ok(StepStatus::Failed),
            "skipped" => Ok(StepStatus::Skipped),
            other => Err(PipelineError::storage(format!("unknown step status: {other}"))),
        }
    }
}

/// One named step in a job's debug timeline.
///
/// Snapshots are for display only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugStep {
    pub analysis_id: String,
    pub step_name: String,
    pub step_order: i32,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error_message: Option<String>,
}

impl DebugStep {
    pub fn pending(analysis_id: impl Into<String>, step_name: impl Into<String>, order: i32) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            step_name: step_name.into(),
            step_order: order,
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            input: None,
            output: None,
            error_message: None,
        }
    }

    /// Merge the fields present in `update`.
    pub fn apply(&mut self, update: StepUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if update.started_at.is_some() {
            self.started_at = update.started_at;
        }
        if update.completed_at.is_some() {
            self.completed_at = update.completed_at;
        }
        if update.input.is_some() {
            self.input = update.input;
        }
        if update.output.is_some() {
            self.output = update.output;
        }
        if update.error_message.is_some() {
            self.error_message = update.error_message;
        }
    }
}

/// Partial update to a debug step; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepUpdate {
    pub status: Option<StepStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub input: Option<Value>,
    pub output: Option<Value>,
    pub error_message: Option<String>,
}

impl StepUpdate {
    pub fn in_progress(input: Option<Value>) -> Self {
        Self {
            status: Some(StepStatus::InProgress),
            started_at: Some(Utc::now()),
            input,
            ..Default::default()
        }
    }

    pub fn completed(output: Option<Value>) -> Self {
        Self {
            status: Some(StepStatus::Completed),
            completed_at: Some(Utc::now()),
            output,
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: Some(StepStatus::Failed),
            completed_at: Some(Utc::now()),
            error_message: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            status: Some(StepStatus::Skipped),
            completed_at: Some(Utc::now()),
            error_message: Some(reason.into()),
            ..Default::default()
        }
    }

    /// Attach an output snapshot.
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = Some(output);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_merges_only_present_fields() {
        let mut step = DebugStep::pending("job-1", "collect_website", 0);
        step.apply(StepUpdate::in_progress(Some(json!({"url": "https://a.com"}))));
        let started = step.started_at;
        assert_eq!(step.status, StepStatus::InProgress);

        step.apply(StepUpdate::completed(Some(json!({"items": 3}))));
        assert_eq!(step.status, StepStatus::Completed);
        assert_eq!(step.started_at, started);
        assert_eq!(step.input, Some(json!({"url": "https://a.com"})));
        assert_eq!(step.output, Some(json!({"items": 3})));
        assert!(step.completed_at.is_some());
    }
}
