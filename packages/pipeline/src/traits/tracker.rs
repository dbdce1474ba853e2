//! Debug step recorder.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{DebugStep, StepUpdate};

/// Passive recorder of a job's named steps.
#[async_trait]
pub trait StepTracker: Send + Sync {
    /// Declare the step sequence; every step starts pending.
    ///
    /// Re-initializing replaces the earlier sequence.
    async fn initialize_steps(&self, analysis_id: &str, step_names: &[String]) -> Result<()>;

    /// Merge `update` into the named step.
    ///
    /// Fails with `StepNotFound` if the step was never declared.
    async fn update_step(&self, analysis_id: &str, step_name: &str, update: StepUpdate)
        -> Result<()>;

    /// Steps in declared order; empty before initialization.
    async fn get_steps(&self, analysis_id: &str) -> Result<Vec<DebugStep>>;
}
