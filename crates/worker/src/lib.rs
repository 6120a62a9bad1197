//! Worker: drives poll cycles for running jobs.

pub mod sweeper;

pub use sweeper::PollSweeper;
