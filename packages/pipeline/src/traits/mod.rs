//! Core trait abstractions.

pub mod store;
pub mod tracker;
pub mod worker;

pub use store::{JobStore, TaskQueue};
pub use tracker::StepTracker;
pub use worker::{ReportGenerator, SourceWorker, WorkerRegistry, WorkerRequest};
