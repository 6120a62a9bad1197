//! Poll-callback scheduling.
//!
//! The scheduler arms exactly one future callback per call; the lifecycle
//! re-arms after every non-terminal poll. Delivery is at-least-once: a
//! duplicate or late callback is harmless because polling a terminal job
//! is a no-op.

use std::time::Duration;

use async_trait::async_trait;
use mediagen_core::types::JobId;
use tokio::sync::mpsc;

/// A due poll callback for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollRequest {
    pub job_id: JobId,
}

/// Errors from arming a callback.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Scheduler backend error: {0}")]
    Backend(String),
}

/// Arms one future re-invocation of the poll handler.
#[async_trait]
pub trait Scheduler: Send + Sync {
    async fn schedule(&self, job_id: JobId, delay: Duration) -> Result<(), SchedulerError>;
}

// ---------------------------------------------------------------------------
// Poll backoff
// ---------------------------------------------------------------------------

/// Growing poll intervals: early polls are frequent, later ones back off
/// toward a ceiling so long-running operations are not hammered.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    /// Delay before the first poll.
    pub initial: Duration,
    /// Factor applied per completed attempt.
    pub multiplier: f64,
    /// Upper bound on the delay.
    pub max: Duration,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            multiplier: 1.5,
            max: Duration::from_secs(60),
        }
    }
}

impl PollBackoff {
    /// Delay before the poll following `attempt_count` completed cycles.
    ///
    /// The result is clamped to [`PollBackoff::max`].
    pub fn delay_for_attempt(&self, attempt_count: i32) -> Duration {
        let factor = self.multiplier.powi(attempt_count.max(0));
        let millis = (self.initial.as_millis() as f64 * factor) as u64;
        Duration::from_millis(millis).min(self.max)
    }
}

// ---------------------------------------------------------------------------
// Tokio implementation
// ---------------------------------------------------------------------------

/// Scheduler backed by a Tokio sleep task per callback, delivering due
/// [`PollRequest`]s over an unbounded channel. The receiver side is the
/// worker's poll loop.
pub struct TokioScheduler {
    tx: mpsc::UnboundedSender<PollRequest>,
}

impl TokioScheduler {
    /// Create the scheduler and the receiver its callbacks arrive on.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PollRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Scheduler for TokioScheduler {
    async fn schedule(&self, job_id: JobId, delay: Duration) -> Result<(), SchedulerError> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(PollRequest { job_id }).is_err() {
                tracing::warn!(%job_id, "Poll receiver dropped; callback lost");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_clamps() {
        let backoff = PollBackoff::default();
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_secs(5));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(7_500));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(11_250));
        // Far enough out, the ceiling holds.
        assert_eq!(backoff.delay_for_attempt(50), Duration::from_secs(60));
    }

    #[test]
    fn negative_attempt_counts_use_initial_delay() {
        let backoff = PollBackoff::default();
        assert_eq!(backoff.delay_for_attempt(-1), backoff.initial);
    }

    #[tokio::test]
    async fn scheduled_callback_is_delivered() {
        let (scheduler, mut rx) = TokioScheduler::channel();
        let job_id = uuid::Uuid::now_v7();
        scheduler.schedule(job_id, Duration::ZERO).await.unwrap();
        let request = rx.recv().await.unwrap();
        assert_eq!(request, PollRequest { job_id });
    }

    #[tokio::test]
    async fn each_schedule_call_is_single_shot() {
        let (scheduler, mut rx) = TokioScheduler::channel();
        let job_id = uuid::Uuid::now_v7();
        scheduler.schedule(job_id, Duration::ZERO).await.unwrap();
        let _ = rx.recv().await.unwrap();
        // Nothing further arrives without another arm.
        let empty = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(empty.is_err());
    }
}
