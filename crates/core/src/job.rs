//! Job record and the pure status state machine.
//!
//! This module lives in `core` (zero internal deps) so it can be used by
//! the store implementations, the lifecycle driver, and the API layer
//! without pulling in any of them.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::schema::StructuredRequest;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a generation job.
///
/// `Requested` is the only initial state. The four result states are
/// terminal: no transition ever leaves them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Requested,
    Starting,
    Running,
    Succeeded,
    Failed,
    Expired,
    Canceled,
}

impl JobStatus {
    /// Stable string form used in the database and on the wire.
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Requested => "requested",
            JobStatus::Starting => "starting",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Expired => "expired",
            JobStatus::Canceled => "canceled",
        }
    }

    /// Parse the stable string form. Returns `None` for unknown input.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "requested" => Some(JobStatus::Requested),
            "starting" => Some(JobStatus::Starting),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            "expired" => Some(JobStatus::Expired),
            "canceled" => Some(JobStatus::Canceled),
            _ => None,
        }
    }

    /// Whether this status is terminal. Poll dispatch on a terminal job
    /// must be a no-op.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Expired | JobStatus::Canceled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Returns the set of statuses reachable from `from` in one transition.
///
/// Terminal states return an empty slice. `Starting -> Succeeded` and
/// `Starting -> Failed` are legal because synchronous targets complete
/// (or blow up) inside the start call, without ever reaching `Running`.
pub fn valid_transitions(from: JobStatus) -> &'static [JobStatus] {
    match from {
        JobStatus::Requested => &[JobStatus::Starting, JobStatus::Canceled],
        JobStatus::Starting => &[
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Canceled,
        ],
        JobStatus::Running => &[
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Expired,
            JobStatus::Canceled,
        ],
        JobStatus::Succeeded | JobStatus::Failed | JobStatus::Expired | JobStatus::Canceled => &[],
    }
}

/// Check whether a transition from `from` to `to` is valid.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    valid_transitions(from).contains(&to)
}

/// Validate a transition, returning a descriptive error for invalid ones.
pub fn validate_transition(from: JobStatus, to: JobStatus) -> Result<(), TransitionError> {
    if can_transition(from, to) {
        Ok(())
    } else {
        Err(TransitionError { from, to })
    }
}

/// An attempted transition the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid job transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

// ---------------------------------------------------------------------------
// Job record
// ---------------------------------------------------------------------------

/// Error kind and message recorded on a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    /// Stable machine-readable kind, e.g. `"unknown_target"`.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

impl JobError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// A generation job as stored in the job store.
///
/// The store is the single source of truth; every mutation after creation
/// is a partial-field update keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Opaque owner identifier supplied by the caller.
    pub owner: String,
    pub status: JobStatus,
    /// The validated payload this job executes.
    pub request: StructuredRequest,
    /// Reasoning trail from compilation, empty for structured submissions.
    pub reasons: Vec<String>,
    /// Final output once the job succeeds.
    pub response: Option<serde_json::Value>,
    /// Error recorded when the job fails.
    pub error: Option<JobError>,
    /// Wall-clock time after which a running job is unconditionally
    /// expired. Never decreases once set.
    pub ttl_deadline: Option<Timestamp>,
    /// Number of completed poll cycles. Increases by exactly 1 per cycle.
    pub attempt_count: i32,
    /// When the next poll callback is due.
    pub next_poll_at: Option<Timestamp>,
    /// Handle of the long-running operation at the generation target.
    pub operation_handle: Option<String>,
    /// When the most recent poll-time transport error occurred.
    pub last_error_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Create a fresh `Requested` job for a validated request.
    pub fn new(owner: impl Into<String>, request: StructuredRequest) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::now_v7(),
            owner: owner.into(),
            status: JobStatus::Requested,
            request,
            reasons: Vec::new(),
            response: None,
            error: None,
            ttl_deadline: None,
            attempt_count: 0,
            next_poll_at: None,
            operation_handle: None,
            last_error_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the compiler's reasoning trail.
    pub fn with_reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons = reasons;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_statuses() -> [JobStatus; 7] {
        [
            JobStatus::Requested,
            JobStatus::Starting,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Expired,
            JobStatus::Canceled,
        ]
    }

    #[test]
    fn requested_starts_or_cancels() {
        assert!(can_transition(JobStatus::Requested, JobStatus::Starting));
        assert!(can_transition(JobStatus::Requested, JobStatus::Canceled));
        assert!(!can_transition(JobStatus::Requested, JobStatus::Running));
        assert!(!can_transition(JobStatus::Requested, JobStatus::Succeeded));
    }

    #[test]
    fn starting_reaches_running_or_completes_synchronously() {
        assert!(can_transition(JobStatus::Starting, JobStatus::Running));
        assert!(can_transition(JobStatus::Starting, JobStatus::Succeeded));
        assert!(can_transition(JobStatus::Starting, JobStatus::Failed));
        assert!(!can_transition(JobStatus::Starting, JobStatus::Expired));
    }

    #[test]
    fn running_reaches_every_result_state() {
        for to in [
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::Expired,
            JobStatus::Canceled,
        ] {
            assert!(can_transition(JobStatus::Running, to), "running -> {to}");
        }
    }

    #[test]
    fn terminal_states_absorb() {
        for from in all_statuses().into_iter().filter(|s| s.is_terminal()) {
            assert!(valid_transitions(from).is_empty(), "{from} must be final");
        }
    }

    #[test]
    fn no_transition_is_backward() {
        // Forward-only: nothing ever returns to Requested or Starting.
        for from in all_statuses() {
            assert!(!can_transition(from, JobStatus::Requested));
            if from != JobStatus::Requested {
                assert!(!can_transition(from, JobStatus::Starting));
            }
        }
    }

    #[test]
    fn validate_transition_reports_endpoints() {
        let err = validate_transition(JobStatus::Succeeded, JobStatus::Running).unwrap_err();
        assert_eq!(err.from, JobStatus::Succeeded);
        assert_eq!(err.to, JobStatus::Running);
        assert!(err.to_string().contains("succeeded -> running"));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in all_statuses() {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("paused"), None);
    }
}
