//! Single-flight collection runs: job state, the run itself, and the timer.

pub mod job;
pub mod runner;
pub mod scheduler;

pub use job::{CollectionJob, JobCounts, JobHandle, JobStatus, RunTicket, StartError};
pub use runner::{CollectError, Collector, CollectorSettings};
pub use scheduler::run_scheduler;
