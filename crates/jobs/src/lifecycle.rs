//! Start/poll/cancel driver over the job store, scheduler, and target
//! adapters.
//!
//! Each method loads the record, applies the state machine, writes a
//! partial patch, and (for running jobs) arms exactly one future poll.
//! Nothing here assumes only one poll is ever in flight for a job: a
//! duplicate or late callback lands on the terminal no-op check.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mediagen_core::job::{self, Job, JobError, JobStatus};
use mediagen_core::schema::StructuredRequest;
use mediagen_core::types::JobId;
use mediagen_targets::{AdapterError, AdapterRegistry, GeneratedOutput, StartOutcome};

use crate::scheduler::{PollBackoff, Scheduler, SchedulerError};
use crate::store::{JobPatch, JobStore, JobStoreError};

/// Errors from the lifecycle driver. Adapter failures are not here: they
/// are recorded on the job instead of being thrown.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Tunables for the lifecycle driver.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// How long a running job may poll before it is unconditionally
    /// expired.
    pub ttl: Duration,
    pub backoff: PollBackoff,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(600),
            backoff: PollBackoff::default(),
        }
    }
}

/// Drives jobs from `Requested` to a terminal state.
pub struct JobLifecycle {
    store: Arc<dyn JobStore>,
    scheduler: Arc<dyn Scheduler>,
    adapters: Arc<AdapterRegistry>,
    config: LifecycleConfig,
}

impl JobLifecycle {
    pub fn new(
        store: Arc<dyn JobStore>,
        scheduler: Arc<dyn Scheduler>,
        adapters: Arc<AdapterRegistry>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            store,
            scheduler,
            adapters,
            config,
        }
    }

    /// Persist a fresh `Requested` job.
    pub async fn create(
        &self,
        owner: &str,
        request: StructuredRequest,
        reasons: Vec<String>,
    ) -> Result<Job, LifecycleError> {
        let job = Job::new(owner, request).with_reasons(reasons);
        self.store.create(job.clone()).await?;
        tracing::info!(job_id = %job.id, target = %job.request.target, "Job created");
        Ok(job)
    }

    /// Persist a job that failed before it could start, e.g. a prompt
    /// that did not compile. The record is created already in `Failed`;
    /// no state transition is involved and nothing is scheduled.
    pub async fn create_failed(
        &self,
        owner: &str,
        request: StructuredRequest,
        error: JobError,
    ) -> Result<Job, LifecycleError> {
        let mut job = Job::new(owner, request);
        job.status = JobStatus::Failed;
        job.error = Some(error);
        self.store.create(job.clone()).await?;
        tracing::info!(job_id = %job.id, code = %job.error.as_ref().map(|e| e.code.as_str()).unwrap_or(""), "Failed job recorded");
        Ok(job)
    }

    /// Load one job record.
    pub async fn get(&self, job_id: JobId) -> Result<Job, LifecycleError> {
        Ok(self.store.get(job_id).await?)
    }

    /// Start a requested job.
    ///
    /// Synchronous targets complete (or fail) inside this call; long
    /// running ones transition to `Running` with a TTL deadline and one
    /// armed poll. Adapter failures mark the job `Failed`; they never
    /// schedule anything and never propagate as errors.
    pub async fn start(&self, job_id: JobId) -> Result<Job, LifecycleError> {
        let job = self.store.get(job_id).await?;
        if job.status != JobStatus::Requested {
            tracing::warn!(%job_id, status = %job.status, "Start skipped; job already started");
            return Ok(job);
        }
        let job = self
            .transition(&job, JobStatus::Starting, JobPatch::default())
            .await?;

        let adapter = match self.adapters.resolve(&job.request.target) {
            Ok(adapter) => adapter,
            Err(error) => return self.fail(&job, &error).await,
        };

        match adapter.start(&job.request).await {
            Ok(StartOutcome::Completed(data)) => match adapter.extract_output(&data) {
                Ok(output) => self.succeed(&job, output).await,
                Err(error) => self.fail(&job, &error).await,
            },
            Ok(StartOutcome::Operation { handle }) => {
                let now = Utc::now();
                let delay = self.config.backoff.delay_for_attempt(0);
                let patch = JobPatch {
                    ttl_deadline: Some(now + to_chrono(self.config.ttl)),
                    attempt_count: Some(0),
                    next_poll_at: Some(now + to_chrono(delay)),
                    operation_handle: Some(handle),
                    ..JobPatch::default()
                };
                let job = self.transition(&job, JobStatus::Running, patch).await?;
                self.scheduler.schedule(job.id, delay).await?;
                tracing::info!(%job_id, delay_ms = delay.as_millis() as u64, "Job running; poll armed");
                Ok(job)
            }
            Err(error) => self.fail(&job, &error).await,
        }
    }

    /// One poll cycle.
    ///
    /// Terminal jobs are a no-op, absorbing duplicate or late dispatch.
    /// The TTL check runs before any adapter call, so a late-delivered
    /// callback still expires the job regardless of operation status.
    /// Transport failures are recorded and retried until TTL expiry.
    pub async fn poll(&self, job_id: JobId) -> Result<Job, LifecycleError> {
        let job = self.store.get(job_id).await?;
        if job.status.is_terminal() {
            tracing::debug!(%job_id, status = %job.status, "Poll on terminal job ignored");
            return Ok(job);
        }
        if job.status != JobStatus::Running {
            tracing::warn!(%job_id, status = %job.status, "Poll on non-running job ignored");
            return Ok(job);
        }

        if job.ttl_deadline.is_some_and(|deadline| Utc::now() > deadline) {
            tracing::warn!(%job_id, attempts = job.attempt_count, "Job TTL exceeded");
            return self
                .transition(&job, JobStatus::Expired, JobPatch::default())
                .await;
        }

        let adapter = match self.adapters.resolve(&job.request.target) {
            Ok(adapter) => adapter,
            Err(error) => return self.fail(&job, &error).await,
        };
        let Some(handle) = job.operation_handle.clone() else {
            let error = AdapterError::Malformed("running job has no operation handle".into());
            return self.fail(&job, &error).await;
        };

        match adapter.poll_status(&handle).await {
            Err(error) => {
                tracing::warn!(%job_id, error = %error, "Poll cycle failed; will retry until TTL");
                self.rearm(
                    &job,
                    JobPatch {
                        last_error_at: Some(Utc::now()),
                        ..JobPatch::default()
                    },
                )
                .await
            }
            Ok(status) if !status.done => self.rearm(&job, JobPatch::default()).await,
            Ok(status) => {
                if let Some(message) = status.error {
                    let error = JobError::new("operation_failed", message);
                    tracing::error!(%job_id, error = %error.message, "Operation reported failure");
                    self.transition(
                        &job,
                        JobStatus::Failed,
                        JobPatch {
                            error: Some(error),
                            ..JobPatch::default()
                        },
                    )
                    .await
                } else {
                    let data = status.data.unwrap_or(serde_json::Value::Null);
                    match adapter.extract_output(&data) {
                        Ok(output) => self.succeed(&job, output).await,
                        Err(error) => self.fail(&job, &error).await,
                    }
                }
            }
        }
    }

    /// Explicit cancel. A no-op on jobs that already reached a terminal
    /// state; no scheduling follows.
    pub async fn cancel(&self, job_id: JobId) -> Result<Job, LifecycleError> {
        let job = self.store.get(job_id).await?;
        if job.status.is_terminal() {
            return Ok(job);
        }
        tracing::info!(%job_id, "Job canceled");
        self.transition(&job, JobStatus::Canceled, JobPatch::default())
            .await
    }

    // ---- internals ----

    /// Increment the attempt count, compute the next poll time, and arm
    /// exactly one callback.
    async fn rearm(&self, job: &Job, mut patch: JobPatch) -> Result<Job, LifecycleError> {
        let attempts = job.attempt_count + 1;
        let delay = self.config.backoff.delay_for_attempt(attempts);
        patch.attempt_count = Some(attempts);
        patch.next_poll_at = Some(Utc::now() + to_chrono(delay));
        let job = self.store.update(job.id, patch).await?;
        self.scheduler.schedule(job.id, delay).await?;
        Ok(job)
    }

    async fn succeed(&self, job: &Job, output: GeneratedOutput) -> Result<Job, LifecycleError> {
        let response = serde_json::to_value(&output)
            .unwrap_or_else(|_| serde_json::json!({"uri": output.uri}));
        tracing::info!(job_id = %job.id, uri = output.uri.as_deref().unwrap_or(""), "Job succeeded");
        self.transition(
            job,
            JobStatus::Succeeded,
            JobPatch {
                response: Some(response),
                ..JobPatch::default()
            },
        )
        .await
    }

    async fn fail(&self, job: &Job, error: &AdapterError) -> Result<Job, LifecycleError> {
        tracing::error!(job_id = %job.id, error = %error, "Job failed");
        self.transition(
            job,
            JobStatus::Failed,
            JobPatch {
                error: Some(JobError::new(error_code(error), error.to_string())),
                ..JobPatch::default()
            },
        )
        .await
    }

    /// Apply a status change through the pure state machine. An invalid
    /// transition (e.g. racing writes) is refused and logged rather than
    /// corrupting a terminal record.
    async fn transition(
        &self,
        job: &Job,
        to: JobStatus,
        mut patch: JobPatch,
    ) -> Result<Job, LifecycleError> {
        if let Err(error) = job::validate_transition(job.status, to) {
            tracing::error!(job_id = %job.id, %error, "Refusing invalid transition");
            return Ok(job.clone());
        }
        patch.status = Some(to);
        Ok(self.store.update(job.id, patch).await?)
    }
}

/// Stable machine-readable code for an adapter failure.
fn error_code(error: &AdapterError) -> &'static str {
    match error {
        AdapterError::UnknownTarget(_) => "unknown_target",
        AdapterError::Request(_) => "transport",
        AdapterError::Api { .. } => "api_error",
        AdapterError::Malformed(_) => "malformed_response",
        AdapterError::Unsupported(_) => "unsupported",
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(duration.as_millis() as i64)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
