//! Repository for the `jobs` table.
//!
//! Every mutation after insert is a partial-field `UPDATE` keyed by job
//! id: unset patch fields `COALESCE` back to the stored column, so
//! concurrent writers touching disjoint fields never clobber each other.

use mediagen_core::job::{Job, JobStatus};
use mediagen_core::types::JobId;
use mediagen_jobs::JobPatch;
use sqlx::PgPool;

use crate::models::JobRow;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, owner, status, target, request, reasons, response, \
    error_code, error_message, ttl_deadline, attempt_count, \
    next_poll_at, operation_handle, last_error_at, \
    created_at, updated_at";

/// CRUD operations for job records.
pub struct JobRepo;

impl JobRepo {
    /// Insert a freshly created job.
    pub async fn insert(pool: &PgPool, job: &Job) -> Result<JobRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO jobs \
                 (id, owner, status, target, request, reasons, response, \
                  error_code, error_message, ttl_deadline, attempt_count, \
                  next_poll_at, operation_handle, last_error_at, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(job.id)
            .bind(&job.owner)
            .bind(job.status.as_str())
            .bind(&job.request.target)
            .bind(&job.request.fields)
            .bind(serde_json::json!(job.reasons))
            .bind(&job.response)
            .bind(job.error.as_ref().map(|e| e.code.as_str()))
            .bind(job.error.as_ref().map(|e| e.message.as_str()))
            .bind(job.ttl_deadline)
            .bind(job.attempt_count)
            .bind(job.next_poll_at)
            .bind(&job.operation_handle)
            .bind(job.last_error_at)
            .bind(job.created_at)
            .bind(job.updated_at)
            .fetch_one(pool)
            .await
    }

    /// Find a job by its ID.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Running jobs whose next poll time has passed, oldest first.
    ///
    /// The sweeper uses this to re-deliver polls whose in-process
    /// callbacks were lost to a restart; the store's `next_poll_at` is
    /// what makes scheduler delivery effectively at-least-once.
    pub async fn find_due(pool: &PgPool, limit: i64) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE status = $1 AND next_poll_at <= NOW() \
             ORDER BY next_poll_at ASC \
             LIMIT $2"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(JobStatus::Running.as_str())
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Apply a partial-field patch.
    ///
    /// `GREATEST` on `ttl_deadline` keeps the deadline monotonic even if
    /// a stale writer supplies an earlier one.
    pub async fn apply_patch(
        pool: &PgPool,
        id: JobId,
        patch: &JobPatch,
    ) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!(
            "UPDATE jobs SET \
                 status = COALESCE($2, status), \
                 reasons = COALESCE($3, reasons), \
                 response = COALESCE($4, response), \
                 error_code = COALESCE($5, error_code), \
                 error_message = COALESCE($6, error_message), \
                 ttl_deadline = GREATEST($7, ttl_deadline), \
                 attempt_count = COALESCE($8, attempt_count), \
                 next_poll_at = COALESCE($9, next_poll_at), \
                 operation_handle = COALESCE($10, operation_handle), \
                 last_error_at = COALESCE($11, last_error_at), \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .bind(patch.status.map(|s| s.as_str()))
            .bind(patch.reasons.as_ref().map(|r| serde_json::json!(r)))
            .bind(&patch.response)
            .bind(patch.error.as_ref().map(|e| e.code.as_str()))
            .bind(patch.error.as_ref().map(|e| e.message.as_str()))
            .bind(patch.ttl_deadline)
            .bind(patch.attempt_count)
            .bind(patch.next_poll_at)
            .bind(&patch.operation_handle)
            .bind(patch.last_error_at)
            .fetch_optional(pool)
            .await
    }
}
