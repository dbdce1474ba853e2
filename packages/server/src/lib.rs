// Voice-of-Customer Research - API server
//
// HTTP surface over the research pipeline. Source workers and report
// generation are external services reached over HTTP.

pub mod config;
pub mod kernel;
pub mod server;

pub use config::*;
