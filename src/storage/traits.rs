use crate::collection::job::CollectionJob;
use crate::query::EntryQuery;
use crate::storage::checkpoint::ScanCheckpoint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage schema (tables, indexes, sequences)
    async fn init_schema(&self) -> Result<(), StorageError>;

    // Entries

    /// Append a batch atomically. Entries whose `(source_id, source_offset)`
    /// is already stored are skipped. Returns the number actually inserted.
    async fn append_entries(&self, entries: &[NewLogEntry]) -> Result<usize, StorageError>;

    /// One page of filtered, sorted entries plus the filtered total.
    async fn query_entries(
        &self,
        query: &EntryQuery,
    ) -> Result<(Vec<StoredLogEntry>, u64), StorageError>;

    /// Entry counts grouped by country, in no particular order.
    async fn summary_by_country(&self) -> Result<Vec<CountrySummary>, StorageError>;

    async fn entry_count(&self) -> Result<u64, StorageError>;

    // Scan checkpoints

    async fn load_checkpoint(&self, source_id: &str) -> Result<Option<ScanCheckpoint>, StorageError>;

    async fn save_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<(), StorageError>;

    // Collection job record

    async fn load_job(&self) -> Result<Option<CollectionJob>, StorageError>;

    async fn save_job(&self, job: &CollectionJob) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),
}

impl From<duckdb::Error> for StorageError {
    fn from(e: duckdb::Error) -> Self {
        StorageError::Database(e.to_string())
    }
}

/// An entry produced by a collection run, before insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub timestamp: DateTime<Utc>,
    pub ip_address: String,
    pub country: String,
    pub domain: Option<String>,
    pub method: Option<String>,
    pub scheme: Option<String>,
    pub request_path: Option<String>,
    pub status_code: Option<u16>,
    pub bytes_sent: Option<u64>,
    pub gzip: bool,
    pub upstream: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub raw_log: String,
    pub ingested_at: DateTime<Utc>,
    pub source_id: String,
    pub source_offset: u64,
}

/// A persisted entry as returned to API clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredLogEntry {
    #[serde(rename = "id")]
    pub entry_id: i64,
    pub timestamp: DateTime<Utc>,
    pub ip_address: String,
    pub country: String,
    pub domain: Option<String>,
    pub method: Option<String>,
    pub scheme: Option<String>,
    pub request_path: Option<String>,
    pub status_code: Option<u16>,
    pub bytes_sent: Option<u64>,
    pub gzip: bool,
    pub upstream: Option<String>,
    pub referrer: Option<String>,
    pub user_agent: Option<String>,
    pub raw_log: String,
    pub ingested_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountrySummary {
    pub country: String,
    pub count: u64,
}
