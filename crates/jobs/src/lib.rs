//! Job lifecycle: durable store contract, poll scheduling, and the
//! start/poll/cancel driver.
//!
//! The job store is the single source of truth. Every mutation after
//! creation is a partial-field patch keyed by job id, so concurrent
//! unrelated writes never clobber each other. Poll callbacks are
//! re-armed single-shot per cycle; correctness rests on at-least-once
//! scheduler delivery plus the terminal-state no-op check, not on any
//! in-process lock.

pub mod lifecycle;
pub mod scheduler;
pub mod store;

pub use lifecycle::{JobLifecycle, LifecycleConfig, LifecycleError};
pub use scheduler::{PollBackoff, PollRequest, Scheduler, SchedulerError, TokioScheduler};
pub use store::{InMemoryJobStore, JobPatch, JobStore, JobStoreError};
