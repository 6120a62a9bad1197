//! Row model for the `jobs` table and conversions to the domain record.

use mediagen_core::job::{Job, JobError, JobStatus};
use mediagen_core::schema::StructuredRequest;
use mediagen_core::types::Timestamp;
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: Uuid,
    pub owner: String,
    pub status: String,
    pub target: String,
    pub request: serde_json::Value,
    pub reasons: serde_json::Value,
    pub response: Option<serde_json::Value>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub ttl_deadline: Option<Timestamp>,
    pub attempt_count: i32,
    pub next_poll_at: Option<Timestamp>,
    pub operation_handle: Option<String>,
    pub last_error_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A stored status string that is not a known [`JobStatus`].
#[derive(Debug, thiserror::Error)]
#[error("Corrupt job row {id}: unknown status \"{status}\"")]
pub struct CorruptRow {
    pub id: Uuid,
    pub status: String,
}

impl TryFrom<JobRow> for Job {
    type Error = CorruptRow;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&row.status).ok_or_else(|| CorruptRow {
            id: row.id,
            status: row.status.clone(),
        })?;
        let error = match (row.error_code, row.error_message) {
            (Some(code), Some(message)) => Some(JobError { code, message }),
            (Some(code), None) => Some(JobError {
                code,
                message: String::new(),
            }),
            _ => None,
        };
        let reasons = serde_json::from_value(row.reasons).unwrap_or_default();
        Ok(Job {
            id: row.id,
            owner: row.owner,
            status,
            request: StructuredRequest {
                target: row.target,
                fields: row.request,
            },
            reasons,
            response: row.response,
            error,
            ttl_deadline: row.ttl_deadline,
            attempt_count: row.attempt_count,
            next_poll_at: row.next_poll_at,
            operation_handle: row.operation_handle,
            last_error_at: row.last_error_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_row() -> JobRow {
        JobRow {
            id: Uuid::now_v7(),
            owner: "user-1".into(),
            status: "running".into(),
            target: "veo".into(),
            request: serde_json::json!({"prompt": "a fox"}),
            reasons: serde_json::json!(["Exploration: video fits best"]),
            response: None,
            error_code: None,
            error_message: None,
            ttl_deadline: Some(Utc::now()),
            attempt_count: 2,
            next_poll_at: None,
            operation_handle: Some("operations/abc".into()),
            last_error_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn row_converts_to_domain_job() {
        let row = sample_row();
        let job = Job::try_from(row.clone()).unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.request.target, "veo");
        assert_eq!(job.request.fields["prompt"], "a fox");
        assert_eq!(job.reasons.len(), 1);
        assert_eq!(job.attempt_count, 2);
        assert!(job.error.is_none());
    }

    #[test]
    fn error_columns_become_job_error() {
        let mut row = sample_row();
        row.status = "failed".into();
        row.error_code = Some("api_error".into());
        row.error_message = Some("bad prompt".into());
        let job = Job::try_from(row).unwrap();
        let error = job.error.unwrap();
        assert_eq!(error.code, "api_error");
        assert_eq!(error.message, "bad prompt");
    }

    #[test]
    fn unknown_status_is_rejected() {
        let mut row = sample_row();
        row.status = "paused".into();
        assert!(Job::try_from(row).is_err());
    }
}
