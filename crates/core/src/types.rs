/// Primary key type for job records.
pub type JobId = uuid::Uuid;

/// UTC timestamp type used across the workspace.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
