//! Stuck-task reclamation.
//!
//! A task left in flight past the stuck timeout (a crashed dispatcher, a
//! lost process) is treated as a failed attempt: retried if attempts remain,
//! failed terminally otherwise. The reclaim goes through the same fenced
//! requeue as a normal failure, so a task is reclaimed at most once per claim.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, TaskOutcome};
use crate::error::Result;
use crate::traits::TaskQueue;

/// Default time a task may stay in flight before it is reclaimed.
pub const DEFAULT_STUCK_TIMEOUT: Duration = Duration::from_secs(600);

/// Configuration for the sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// In-flight age after which a task is reclaimed
    pub stuck_timeout: Duration,
    /// How often to sweep
    pub interval: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            stuck_timeout: DEFAULT_STUCK_TIMEOUT,
            interval: Duration::from_secs(60),
        }
    }
}

impl SweeperConfig {
    pub fn with_stuck_timeout(stuck_timeout: Duration) -> Self {
        Self {
            stuck_timeout,
            ..Default::default()
        }
    }
}

/// Background sweep over in-flight tasks.
pub struct StuckTaskSweeper {
    queue: Arc<dyn TaskQueue>,
    dispatcher: Arc<Dispatcher>,
    config: SweeperConfig,
}

impl StuckTaskSweeper {
    pub fn new(queue: Arc<dyn TaskQueue>, dispatcher: Arc<Dispatcher>, config: SweeperConfig) -> Self {
        Self {
            queue,
            dispatcher,
            config,
        }
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            stuck_timeout_secs = self.config.stuck_timeout.as_secs(),
            interval_secs = self.config.interval.as_secs(),
            "stuck task sweeper started"
        );

        let mut interval = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("stuck task sweeper stopping");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!(error = %e, "stuck task sweep failed");
                    }
                }
            }
        }
    }

    /// Reclaim every task in flight longer than the stuck timeout.
    ///
    /// Returns the number of tasks actually reclaimed.
    pub async fn sweep(&self) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.stuck_timeout)
                .unwrap_or_else(|_| chrono::Duration::zero());
        let stuck = self.queue.in_flight_older_than(cutoff).await?;
        if stuck.is_empty() {
            debug!("no stuck tasks");
            return Ok(0);
        }

        let mut reclaimed = 0;
        for claimed in stuck {
            let attempt = claimed.task.attempts + 1;
            let message = format!(
                "stuck in flight for more than {}s",
                self.config.stuck_timeout.as_secs()
            );
            let outcome = self
                .dispatcher
                .handle_failure(&claimed, attempt, &message)
                .await?;

            if outcome == TaskOutcome::Stale {
                continue;
            }
            reclaimed += 1;
            warn!(
                job_id = %claimed.task.job_id,
                source = %claimed.task.source,
                attempt,
                ?outcome,
                "reclaimed stuck task"
            );
        }
        Ok(reclaimed)
    }
}
