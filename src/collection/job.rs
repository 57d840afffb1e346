use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::storage::{Storage, StorageError};

/// Error message recorded for a run that was cut short by a restart.
pub const INTERRUPTED_MESSAGE: &str = "interrupted: process restarted during run";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Idle,
    Running,
    Finished,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub files_scanned: u64,
    pub files_skipped: u64,
    pub lines_parsed: u64,
    pub lines_malformed: u64,
    pub entries_added: u64,
}

/// Run state of the (single) collection job, as reported by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionJob {
    pub status: JobStatus,
    pub run_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    #[serde(flatten)]
    pub counts: JobCounts,
}

impl Default for CollectionJob {
    fn default() -> Self {
        Self::idle()
    }
}

impl CollectionJob {
    pub fn idle() -> Self {
        Self {
            status: JobStatus::Idle,
            run_id: None,
            started_at: None,
            finished_at: None,
            error: None,
            counts: JobCounts::default(),
        }
    }

    /// Rewrite a record left in `running` by a previous process as failed.
    /// Returns true if the record changed.
    pub fn recover_stale(&mut self) -> bool {
        if self.status != JobStatus::Running {
            return false;
        }
        self.status = JobStatus::Error;
        self.finished_at = Some(Utc::now());
        self.error = Some(INTERRUPTED_MESSAGE.to_string());
        true
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StartError {
    #[error("a collection run is already in progress")]
    AlreadyRunning,
}

/// Proof of owning the run slot. Consumed when the run finishes or fails.
#[derive(Debug)]
pub struct RunTicket {
    run_id: Uuid,
}

impl RunTicket {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }
}

/// Shared handle to the process-wide job record.
#[derive(Debug, Clone, Default)]
pub struct JobHandle {
    state: Arc<Mutex<CollectionJob>>,
}

impl JobHandle {
    pub fn new(job: CollectionJob) -> Self {
        Self {
            state: Arc::new(Mutex::new(job)),
        }
    }

    /// Load the last persisted record, failing over a stale `running` one.
    pub async fn restore(storage: &dyn Storage) -> Result<Self, StorageError> {
        let mut job = storage.load_job().await?.unwrap_or_default();

        if job.recover_stale() {
            tracing::warn!(
                run_id = ?job.run_id,
                "Previous collection run was interrupted by a restart"
            );
            storage.save_job(&job).await?;
        }

        Ok(Self::new(job))
    }

    /// Claim the run slot. Only the `idle`/`finished`/`error` → `running`
    /// transition happens under the lock.
    pub async fn try_start(&self) -> Result<RunTicket, StartError> {
        let mut job = self.state.lock().await;
        if job.status == JobStatus::Running {
            return Err(StartError::AlreadyRunning);
        }

        let run_id = Uuid::new_v4();
        *job = CollectionJob {
            status: JobStatus::Running,
            run_id: Some(run_id),
            started_at: Some(Utc::now()),
            finished_at: None,
            error: None,
            counts: JobCounts::default(),
        };

        Ok(RunTicket { run_id })
    }

    /// Current state. Reading never changes it.
    pub async fn snapshot(&self) -> CollectionJob {
        self.state.lock().await.clone()
    }

    /// Publish progress of the run owning `ticket`.
    pub async fn update_counts(&self, ticket: &RunTicket, counts: &JobCounts) {
        let mut job = self.state.lock().await;
        if job.run_id == Some(ticket.run_id) {
            job.counts = counts.clone();
        }
    }

    pub async fn finish(&self, ticket: RunTicket, counts: JobCounts) -> CollectionJob {
        self.end(ticket, counts, None).await
    }

    pub async fn fail(&self, ticket: RunTicket, counts: JobCounts, message: String) -> CollectionJob {
        self.end(ticket, counts, Some(message)).await
    }

    /// Fail run `run_id` after its task died without reporting back.
    /// Returns the updated record, or None if that run is no longer current.
    pub async fn abandon(&self, run_id: Uuid, message: String) -> Option<CollectionJob> {
        let mut job = self.state.lock().await;
        if job.run_id != Some(run_id) || job.status != JobStatus::Running {
            return None;
        }
        job.status = JobStatus::Error;
        job.finished_at = Some(Utc::now());
        job.error = Some(message);
        Some(job.clone())
    }

    async fn end(&self, ticket: RunTicket, counts: JobCounts, error: Option<String>) -> CollectionJob {
        let mut job = self.state.lock().await;
        if job.run_id == Some(ticket.run_id) {
            job.status = if error.is_some() {
                JobStatus::Error
            } else {
                JobStatus::Finished
            };
            job.finished_at = Some(Utc::now());
            job.error = error;
            job.counts = counts;
        }
        job.clone()
    }
}
