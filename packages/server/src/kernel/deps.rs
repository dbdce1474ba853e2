//! Server dependencies
//!
//! Wires the configured HTTP workers, the report generator, and the
//! Postgres store into the pipeline's dependency container.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use voc_pipeline::{
    DispatcherConfig, PipelineConfig, PipelineDeps, PostgresStore, ReportGenerator,
    ResearchPipeline, SourceType, SweeperConfig, WorkerRegistry,
};

use crate::config::Config;
use crate::kernel::http_worker::{worker_client, HttpSourceWorker};
use crate::kernel::openai::OpenAiReportGenerator;

/// One HTTP worker per source with a configured URL.
pub fn build_worker_registry(config: &Config) -> Result<WorkerRegistry> {
    let client = worker_client().context("Failed to build worker HTTP client")?;
    let mut registry = WorkerRegistry::new();

    for source in SourceType::ALL {
        match config.worker_url(source) {
            Some(url) => {
                info!(source = %source, url, "source worker configured");
                registry.register(Arc::new(HttpSourceWorker::with_client(
                    client.clone(),
                    source,
                    url,
                )));
            }
            None if source.is_mandatory() => {
                warn!(source = %source, "mandatory source has no worker URL; jobs will lack its data");
            }
            None => {}
        }
    }

    Ok(registry)
}

pub fn build_report_generator(config: &Config) -> Arc<dyn ReportGenerator> {
    Arc::new(
        OpenAiReportGenerator::new(config.openai_api_key.clone(), config.openai_model.clone())
            .with_base_url(config.openai_base_url.clone()),
    )
}

/// Pipeline, dispatcher config, and sweeper config from server config.
pub struct ServerDeps {
    pub pipeline: ResearchPipeline,
    pub dispatcher: DispatcherConfig,
    pub sweeper: SweeperConfig,
}

impl ServerDeps {
    pub fn new(store: Arc<PostgresStore>, config: &Config) -> Result<Self> {
        let deps = PipelineDeps::new(
            store,
            build_worker_registry(config)?,
            build_report_generator(config),
        )
        .with_report_timeout(config.report_timeout);

        let pipeline = ResearchPipeline::with_config(
            deps,
            PipelineConfig {
                max_attempts: config.task_max_attempts,
            },
        );

        let mut dispatcher = DispatcherConfig::default();
        dispatcher.max_concurrency = config.dispatch_concurrency.max(1);

        Ok(Self {
            pipeline,
            dispatcher,
            sweeper: SweeperConfig::with_stuck_timeout(config.stuck_task_timeout),
        })
    }
}
