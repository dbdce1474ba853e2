//! Kernel module - external services and dependency wiring.

pub mod deps;
pub mod http_worker;
pub mod openai;

pub use deps::{build_report_generator, build_worker_registry, ServerDeps};
pub use http_worker::HttpSourceWorker;
pub use openai::OpenAiReportGenerator;
