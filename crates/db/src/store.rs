//! [`JobStore`] implementation over Postgres.

use async_trait::async_trait;
use mediagen_core::job::Job;
use mediagen_core::types::JobId;
use mediagen_jobs::{JobPatch, JobStore, JobStoreError};
use sqlx::PgPool;

use crate::repositories::JobRepo;

/// Postgres-backed job store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_sqlx(e: sqlx::Error) -> JobStoreError {
    JobStoreError::Backend(e.to_string())
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(&self, job: Job) -> Result<(), JobStoreError> {
        match JobRepo::insert(&self.pool, &job).await {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(JobStoreError::AlreadyExists(job.id))
            }
            Err(e) => Err(map_sqlx(e)),
        }
    }

    async fn get(&self, id: JobId) -> Result<Job, JobStoreError> {
        let row = JobRepo::find_by_id(&self.pool, id)
            .await
            .map_err(map_sqlx)?
            .ok_or(JobStoreError::NotFound(id))?;
        Job::try_from(row).map_err(|e| JobStoreError::Backend(e.to_string()))
    }

    async fn update(&self, id: JobId, patch: JobPatch) -> Result<Job, JobStoreError> {
        let row = JobRepo::apply_patch(&self.pool, id, &patch)
            .await
            .map_err(map_sqlx)?
            .ok_or(JobStoreError::NotFound(id))?;
        Job::try_from(row).map_err(|e| JobStoreError::Backend(e.to_string()))
    }
}
