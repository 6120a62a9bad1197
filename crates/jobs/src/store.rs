//! Durable job store contract and the in-memory implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use mediagen_core::job::{Job, JobError, JobStatus};
use mediagen_core::types::{JobId, Timestamp};
use tokio::sync::RwLock;

/// Errors from a job store backend.
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job already exists: {0}")]
    AlreadyExists(JobId),

    #[error("Job store backend error: {0}")]
    Backend(String),
}

/// Partial-field update for one job record.
///
/// `None` fields are left untouched; set fields are last-write-wins.
/// This is what lets creation metadata and poll-driven status writes for
/// the same job proceed without clobbering each other.
#[derive(Debug, Clone, Default)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub reasons: Option<Vec<String>>,
    pub response: Option<serde_json::Value>,
    pub error: Option<JobError>,
    pub ttl_deadline: Option<Timestamp>,
    pub attempt_count: Option<i32>,
    pub next_poll_at: Option<Timestamp>,
    pub operation_handle: Option<String>,
    pub last_error_at: Option<Timestamp>,
}

impl JobPatch {
    /// Patch that only moves the status.
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply this patch to a job record in place.
    ///
    /// Shared by every store implementation so patch semantics cannot
    /// drift between backends. The TTL deadline is monotonic: a patch
    /// can extend it but never pull it earlier.
    pub fn apply(&self, job: &mut Job) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(reasons) = &self.reasons {
            job.reasons = reasons.clone();
        }
        if let Some(response) = &self.response {
            job.response = Some(response.clone());
        }
        if let Some(error) = &self.error {
            job.error = Some(error.clone());
        }
        if let Some(deadline) = self.ttl_deadline {
            job.ttl_deadline = match job.ttl_deadline {
                Some(current) if current > deadline => Some(current),
                _ => Some(deadline),
            };
        }
        if let Some(count) = self.attempt_count {
            job.attempt_count = count;
        }
        if let Some(at) = self.next_poll_at {
            job.next_poll_at = Some(at);
        }
        if let Some(handle) = &self.operation_handle {
            job.operation_handle = Some(handle.clone());
        }
        if let Some(at) = self.last_error_at {
            job.last_error_at = Some(at);
        }
        job.updated_at = Utc::now();
    }
}

/// Durable job store: `create`, `get`, and partial-field `update`.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, job: Job) -> Result<(), JobStoreError>;

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError>;

    /// Apply a partial update and return the record after the write.
    async fn update(&self, id: JobId, patch: JobPatch) -> Result<Job, JobStoreError>;
}

/// Map-backed store for tests and single-node deployments.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: Job) -> Result<(), JobStoreError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(JobStoreError::AlreadyExists(job.id));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(JobStoreError::NotFound(id))
    }

    async fn update(&self, id: JobId, patch: JobPatch) -> Result<Job, JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(&id).ok_or(JobStoreError::NotFound(id))?;
        patch.apply(job);
        Ok(job.clone())
    }
}
