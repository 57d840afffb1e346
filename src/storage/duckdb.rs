use super::checkpoint::ScanCheckpoint;
use super::traits::{CountrySummary, NewLogEntry, Storage, StorageError, StoredLogEntry};
use crate::collection::job::CollectionJob;
use crate::query::EntryQuery;
use crate::source::FileKind;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use duckdb::types::Value;
use duckdb::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const ENTRY_COLUMNS: &str = "entry_id, epoch_us(timestamp), ip_address, country, domain, method, scheme,
     request_path, status_code, bytes_sent, gzip, upstream, referrer, user_agent, raw_log,
     epoch_us(ingested_at)";

fn timestamp_from_micros(idx: usize, micros: i64) -> duckdb::Result<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        duckdb::Error::FromSqlConversionFailure(
            idx,
            duckdb::types::Type::BigInt,
            Box::new(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "invalid timestamp",
            )),
        )
    })
}

fn entry_from_row(row: &duckdb::Row<'_>) -> duckdb::Result<StoredLogEntry> {
    Ok(StoredLogEntry {
        entry_id: row.get(0)?,
        timestamp: timestamp_from_micros(1, row.get(1)?)?,
        ip_address: row.get(2)?,
        country: row.get(3)?,
        domain: row.get(4)?,
        method: row.get(5)?,
        scheme: row.get(6)?,
        request_path: row.get(7)?,
        status_code: row
            .get::<_, Option<i32>>(8)?
            .and_then(|status| u16::try_from(status).ok()),
        bytes_sent: row.get(9)?,
        gzip: row.get(10)?,
        upstream: row.get(11)?,
        referrer: row.get(12)?,
        user_agent: row.get(13)?,
        raw_log: row.get(14)?,
        ingested_at: timestamp_from_micros(15, row.get(15)?)?,
    })
}

/// WHERE clause and its positional parameters for a filtered entry query.
fn filter_clause(query: &EntryQuery) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    let substring_filters = [
        ("ip_address", &query.filter.ip_address),
        ("country", &query.filter.country),
        ("domain", &query.filter.domain),
    ];
    for (column, value) in substring_filters {
        if let Some(value) = value {
            conditions.push(format!("contains(lower({}), lower(?))", column));
            params.push(Value::Text(value.clone()));
        }
    }

    if let Some(status) = query.filter.status_code {
        conditions.push("status_code = ?".to_string());
        params.push(Value::BigInt(status));
    }

    if conditions.is_empty() {
        (String::new(), params)
    } else {
        (format!("WHERE {}", conditions.join(" AND ")), params)
    }
}

/// DuckDB implementation of the Storage trait.
///
/// Holds two connections to one database: appends and state writes go
/// through `writer`, queries through `reader`, so a collection run never
/// holds up the query API for longer than a single statement.
pub struct DuckDbStorage {
    writer: Arc<Mutex<Connection>>,
    reader: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl DuckDbStorage {
    /// Open (or create) a database file.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Database(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        tracing::info!(path = %path.display(), "Opened database");
        Self::from_connection(conn, Some(path.to_path_buf()))
    }

    /// Create an in-memory DuckDB storage instance (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::from_connection(conn, None)
    }

    fn from_connection(conn: Connection, path: Option<PathBuf>) -> Result<Self, StorageError> {
        let reader = conn.try_clone()?;
        Ok(Self {
            writer: Arc::new(Mutex::new(conn)),
            reader: Arc::new(Mutex::new(reader)),
            path,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[async_trait]
impl Storage for DuckDbStorage {
    async fn init_schema(&self) -> Result<(), StorageError> {
        let conn = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            conn.execute_batch(
                "CREATE SEQUENCE IF NOT EXISTS log_entries_seq START 1;

                CREATE TABLE IF NOT EXISTS log_entries (
                    entry_id BIGINT PRIMARY KEY DEFAULT nextval('log_entries_seq'),
                    timestamp TIMESTAMPTZ NOT NULL,
                    ip_address VARCHAR NOT NULL,
                    country VARCHAR NOT NULL,
                    domain VARCHAR,
                    method VARCHAR,
                    scheme VARCHAR,
                    request_path VARCHAR,
                    status_code INTEGER,
                    bytes_sent UBIGINT,
                    gzip BOOLEAN NOT NULL,
                    upstream VARCHAR,
                    referrer VARCHAR,
                    user_agent VARCHAR,
                    raw_log VARCHAR NOT NULL,
                    ingested_at TIMESTAMPTZ NOT NULL,
                    source_id VARCHAR NOT NULL,
                    source_offset UBIGINT NOT NULL,
                    UNIQUE (source_id, source_offset)
                );

                CREATE INDEX IF NOT EXISTS idx_log_entries_timestamp ON log_entries(timestamp);
                CREATE INDEX IF NOT EXISTS idx_log_entries_status ON log_entries(status_code);
                CREATE INDEX IF NOT EXISTS idx_log_entries_country ON log_entries(country);

                CREATE TABLE IF NOT EXISTS scan_checkpoints (
                    source_id VARCHAR PRIMARY KEY,
                    path VARCHAR NOT NULL,
                    kind VARCHAR NOT NULL,
                    read_offset UBIGINT NOT NULL,
                    completed BOOLEAN NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );

                CREATE TABLE IF NOT EXISTS collection_job (
                    id INTEGER PRIMARY KEY DEFAULT 1,
                    job_data TEXT NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL,
                    CHECK (id = 1)
                );",
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn append_entries(&self, entries: &[NewLogEntry]) -> Result<usize, StorageError> {
        if entries.is_empty() {
            return Ok(0);
        }

        let conn = self.writer.clone();
        let entries = entries.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap();
            let tx = conn.transaction()?;
            let mut inserted = 0;

            {
                let mut stmt = tx.prepare(
                    "INSERT INTO log_entries (
                        timestamp, ip_address, country, domain, method, scheme, request_path,
                        status_code, bytes_sent, gzip, upstream, referrer, user_agent, raw_log,
                        ingested_at, source_id, source_offset
                     )
                     VALUES (to_timestamp(? / 1000000.0), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                             to_timestamp(? / 1000000.0), ?, ?)
                     ON CONFLICT DO NOTHING",
                )?;

                for entry in &entries {
                    inserted += stmt.execute(duckdb::params![
                        entry.timestamp.timestamp_micros(),
                        entry.ip_address,
                        entry.country,
                        entry.domain,
                        entry.method,
                        entry.scheme,
                        entry.request_path,
                        entry.status_code.map(i32::from),
                        entry.bytes_sent,
                        entry.gzip,
                        entry.upstream,
                        entry.referrer,
                        entry.user_agent,
                        entry.raw_log,
                        entry.ingested_at.timestamp_micros(),
                        entry.source_id,
                        entry.source_offset,
                    ])?;
                }
            }

            tx.commit()?;
            Ok::<usize, StorageError>(inserted)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn query_entries(
        &self,
        query: &EntryQuery,
    ) -> Result<(Vec<StoredLogEntry>, u64), StorageError> {
        let conn = self.reader.clone();
        let query = query.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let (where_clause, mut params) = filter_clause(&query);

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM log_entries {}", where_clause),
                duckdb::params_from_iter(params.iter()),
                |row| row.get(0),
            )?;

            // Sort column comes from the SortKey allow-list, never from input
            let sql = format!(
                "SELECT {} FROM log_entries {}
                 ORDER BY {} {} NULLS LAST, entry_id ASC
                 LIMIT ? OFFSET ?",
                ENTRY_COLUMNS,
                where_clause,
                query.sort_by.column(),
                query.sort_dir.sql(),
            );
            params.push(Value::BigInt(i64::from(query.limit)));
            params.push(Value::BigInt(i64::try_from(query.skip).unwrap_or(i64::MAX)));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(duckdb::params_from_iter(params.iter()), entry_from_row)?;

            let mut entries = Vec::new();
            for row in rows {
                entries.push(row?);
            }

            Ok::<(Vec<StoredLogEntry>, u64), StorageError>((entries, total.max(0) as u64))
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn summary_by_country(&self) -> Result<Vec<CountrySummary>, StorageError> {
        let conn = self.reader.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt =
                conn.prepare("SELECT country, COUNT(*) FROM log_entries GROUP BY country")?;

            let rows = stmt.query_map([], |row| {
                Ok(CountrySummary {
                    country: row.get(0)?,
                    count: row.get::<_, i64>(1)?.max(0) as u64,
                })
            })?;

            let mut summary = Vec::new();
            for row in rows {
                summary.push(row?);
            }

            Ok::<Vec<CountrySummary>, StorageError>(summary)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn entry_count(&self) -> Result<u64, StorageError> {
        let conn = self.reader.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM log_entries", [], |row| row.get(0))?;
            Ok::<u64, StorageError>(count.max(0) as u64)
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn load_checkpoint(&self, source_id: &str) -> Result<Option<ScanCheckpoint>, StorageError> {
        let conn = self.writer.clone();
        let source_id = source_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT source_id, path, kind, read_offset, completed, epoch_us(updated_at)
                 FROM scan_checkpoints WHERE source_id = ?",
            )?;

            let mut rows = stmt.query(duckdb::params![source_id])?;

            if let Some(row) = rows.next()? {
                let kind: String = row.get(2)?;
                let kind = FileKind::parse(&kind).ok_or_else(|| {
                    StorageError::InvalidData(format!("unknown checkpoint kind '{}'", kind))
                })?;

                Ok(Some(ScanCheckpoint {
                    source_id: row.get(0)?,
                    path: PathBuf::from(row.get::<_, String>(1)?),
                    kind,
                    offset: row.get(3)?,
                    completed: row.get(4)?,
                    updated_at: timestamp_from_micros(5, row.get(5)?)?,
                }))
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn save_checkpoint(&self, checkpoint: &ScanCheckpoint) -> Result<(), StorageError> {
        let conn = self.writer.clone();
        let checkpoint = checkpoint.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();

            conn.execute(
                "INSERT OR REPLACE INTO scan_checkpoints
                    (source_id, path, kind, read_offset, completed, updated_at)
                 VALUES (?, ?, ?, ?, ?, to_timestamp(? / 1000000.0))",
                duckdb::params![
                    checkpoint.source_id,
                    checkpoint.path.display().to_string(),
                    checkpoint.kind.as_str(),
                    checkpoint.offset,
                    checkpoint.completed,
                    checkpoint.updated_at.timestamp_micros(),
                ],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn load_job(&self) -> Result<Option<CollectionJob>, StorageError> {
        let conn = self.writer.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let mut stmt = conn.prepare("SELECT job_data FROM collection_job WHERE id = 1")?;

            let mut rows = stmt.query([])?;

            if let Some(row) = rows.next()? {
                let job_json: String = row.get(0)?;
                let job: CollectionJob = serde_json::from_str(&job_json).map_err(|e| {
                    StorageError::Serialization(format!("Failed to deserialize job record: {}", e))
                })?;
                Ok(Some(job))
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }

    async fn save_job(&self, job: &CollectionJob) -> Result<(), StorageError> {
        let conn = self.writer.clone();
        let job = job.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().unwrap();
            let job_json = serde_json::to_string(&job).map_err(|e| {
                StorageError::Serialization(format!("Failed to serialize job record: {}", e))
            })?;

            conn.execute(
                "INSERT OR REPLACE INTO collection_job (id, job_data, updated_at)
                 VALUES (1, ?, to_timestamp(? / 1000000.0))",
                duckdb::params![job_json, Utc::now().timestamp_micros()],
            )?;

            Ok::<(), StorageError>(())
        })
        .await
        .map_err(|e| StorageError::Database(format!("Task join error: {}", e)))?
    }
}
