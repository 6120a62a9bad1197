//! Due-poll sweeper.
//!
//! In-process poll callbacks die with the process. The sweeper closes
//! that gap: every `interval` it scans the store for running jobs whose
//! `next_poll_at` has passed and runs a poll cycle for each. Together
//! with armed callbacks this makes delivery at-least-once; a job polled
//! twice lands on the terminal no-op check.

use std::sync::Arc;
use std::time::Duration;

use mediagen_db::repositories::JobRepo;
use mediagen_jobs::JobLifecycle;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

/// Default scan interval.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Maximum due jobs handled per scan.
const SWEEP_BATCH_SIZE: i64 = 20;

/// Periodically re-delivers overdue poll cycles.
pub struct PollSweeper {
    pool: PgPool,
    lifecycle: Arc<JobLifecycle>,
    interval: Duration,
}

impl PollSweeper {
    /// Create a sweeper with the default 5-second scan interval.
    pub fn new(pool: PgPool, lifecycle: Arc<JobLifecycle>) -> Self {
        Self {
            pool,
            lifecycle,
            interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run the sweep loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            "Poll sweeper started",
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Poll sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Sweep cycle failed");
                    }
                }
            }
        }
    }

    /// One scan: poll every due job.
    async fn sweep(&self) -> Result<(), sqlx::Error> {
        let due = JobRepo::find_due(&self.pool, SWEEP_BATCH_SIZE).await?;
        if due.is_empty() {
            return Ok(());
        }
        tracing::debug!(count = due.len(), "Due jobs found");

        for row in due {
            if let Err(e) = self.lifecycle.poll(row.id).await {
                tracing::error!(job_id = %row.id, error = %e, "Poll cycle errored");
            }
        }
        Ok(())
    }
}
