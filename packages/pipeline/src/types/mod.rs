//! Data types for jobs, tasks, worker results, and debug steps.

pub mod job;
pub mod report;
pub mod result;
pub mod source;
pub mod step;
pub mod task;

pub use job::{ConfidenceLevel, Job, JobStatus, JobUpdate, NewJob};
pub use report::{ReportOutcome, SynthesisRequest};
pub use result::{ClassifiedStatus, Evidence, SourcePayload, WorkerResult};
pub use source::{ServiceTier, SourceType};
pub use step::{DebugStep, StepStatus, StepUpdate};
pub use task::{ClaimedTask, Dequeued, EnqueueResult, TaskDescriptor, TaskParams, TaskRecord, TaskState};
