use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use voc_pipeline::SourceType;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub website_worker_url: Option<String>,
    pub amazon_worker_url: Option<String>,
    pub reddit_worker_url: Option<String>,
    pub youtube_worker_url: Option<String>,
    pub persona_worker_url: Option<String>,
    pub task_max_attempts: u32,
    pub stuck_task_timeout: Duration,
    pub dispatch_concurrency: usize,
    pub report_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: parse_or("PORT", 8080).context("PORT must be a valid number")?,
            openai_api_key: env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?,
            openai_base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            openai_model: env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o".to_string()),
            website_worker_url: optional("WEBSITE_WORKER_URL"),
            amazon_worker_url: optional("AMAZON_WORKER_URL"),
            reddit_worker_url: optional("REDDIT_WORKER_URL"),
            youtube_worker_url: optional("YOUTUBE_WORKER_URL"),
            persona_worker_url: optional("PERSONA_WORKER_URL"),
            task_max_attempts: parse_or("TASK_MAX_ATTEMPTS", 3)
                .context("TASK_MAX_ATTEMPTS must be a positive number")?
                .max(1),
            stuck_task_timeout: Duration::from_secs(
                parse_or("STUCK_TASK_TIMEOUT_SECS", 600)
                    .context("STUCK_TASK_TIMEOUT_SECS must be a number of seconds")?,
            ),
            dispatch_concurrency: parse_or("DISPATCH_CONCURRENCY", 8)
                .context("DISPATCH_CONCURRENCY must be a positive number")?,
            report_timeout: Duration::from_secs(
                parse_or("REPORT_TIMEOUT_SECS", 120)
                    .context("REPORT_TIMEOUT_SECS must be a number of seconds")?,
            ),
        })
    }

    /// Configured worker endpoint for a source, if any.
    pub fn worker_url(&self, source: SourceType) -> Option<&str> {
        match source {
            SourceType::Website => self.website_worker_url.as_deref(),
            SourceType::AmazonReviews => self.amazon_worker_url.as_deref(),
            SourceType::Reddit => self.reddit_worker_url.as_deref(),
            SourceType::YoutubeComments => self.youtube_worker_url.as_deref(),
            SourceType::PersonaSynthesis => self.persona_worker_url.as_deref(),
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => Ok(raw.trim().parse()?),
        Err(_) => Ok(default),
    }
}
