use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use super::job::{CollectionJob, JobCounts, JobHandle, RunTicket, StartError};
use crate::geo::{CountryLookup, GeoResolver};
use crate::parser::{LineTemplate, ParseOutcome, ParsedLine};
use crate::source::{
    scan_directory, source_identity, FileKind, FilePatterns, LogFile, LogFileReader, RawLine,
    ReaderError, ScanError,
};
use crate::storage::{NewLogEntry, ScanCheckpoint, Storage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum CollectError {
    #[error("{0}")]
    Scan(#[from] ScanError),

    #[error("{0}")]
    Read(#[from] ReaderError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Where and how a collection run finds its input.
#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub log_dir: PathBuf,
    pub patterns: FilePatterns,
    pub batch_size: usize,
}

/// Drives collection runs: scan → parse → resolve → store.
///
/// Cheap to clone; the HTTP trigger and the scheduler share one instance so
/// they share one job record.
#[derive(Clone)]
pub struct Collector {
    storage: Arc<dyn Storage>,
    template: Arc<LineTemplate>,
    geo: Option<Arc<dyn CountryLookup>>,
    settings: Arc<CollectorSettings>,
    job: JobHandle,
}

impl Collector {
    pub fn new(
        storage: Arc<dyn Storage>,
        template: LineTemplate,
        geo: Option<Arc<dyn CountryLookup>>,
        settings: CollectorSettings,
        job: JobHandle,
    ) -> Self {
        Self {
            storage,
            template: Arc::new(template),
            geo,
            settings: Arc::new(settings),
            job,
        }
    }

    pub fn job(&self) -> &JobHandle {
        &self.job
    }

    /// Start a run in the background. Returns its run id, or `AlreadyRunning`
    /// without touching the current run.
    pub async fn trigger(&self) -> Result<Uuid, StartError> {
        let ticket = self.job.try_start().await?;
        let run_id = ticket.run_id();

        let collector = self.clone();
        let run = tokio::spawn(async move {
            collector.run(ticket).await;
        });

        // A panicking run never reaches finish/fail; record it here
        let job = self.job.clone();
        let storage = self.storage.clone();
        tokio::spawn(async move {
            let Err(e) = run.await else {
                return;
            };
            tracing::error!(%run_id, error = %e, "Collection run task died");
            if let Some(record) = job.abandon(run_id, format!("run aborted: {}", e)).await {
                if let Err(e) = storage.save_job(&record).await {
                    tracing::error!(%run_id, error = %e, "Failed to persist job record");
                }
            }
        });

        Ok(run_id)
    }

    /// Run one collection to completion in the current task.
    pub async fn collect_once(&self) -> Result<CollectionJob, StartError> {
        let ticket = self.job.try_start().await?;
        Ok(self.run(ticket).await)
    }

    /// Execute the run owning `ticket` and record its outcome.
    pub async fn run(&self, ticket: RunTicket) -> CollectionJob {
        let run_id = ticket.run_id();
        tracing::info!(%run_id, log_dir = %self.settings.log_dir.display(), "Collection run started");

        let mut counts = JobCounts::default();
        let result = self.execute(&ticket, &mut counts).await;

        let job = match result {
            Ok(()) => {
                tracing::info!(
                    %run_id,
                    files_scanned = counts.files_scanned,
                    files_skipped = counts.files_skipped,
                    lines_parsed = counts.lines_parsed,
                    lines_malformed = counts.lines_malformed,
                    entries_added = counts.entries_added,
                    "Collection run finished"
                );
                self.job.finish(ticket, counts).await
            }
            Err(e) => {
                tracing::error!(%run_id, error = %e, "Collection run failed");
                self.job.fail(ticket, counts, e.to_string()).await
            }
        };

        if let Err(e) = self.storage.save_job(&job).await {
            tracing::error!(%run_id, error = %e, "Failed to persist job record");
        }

        job
    }

    async fn execute(&self, ticket: &RunTicket, counts: &mut JobCounts) -> Result<(), CollectError> {
        self.storage.save_job(&self.job.snapshot().await).await?;

        let files = scan_directory(&self.settings.log_dir, &self.settings.patterns)?;
        let mut resolver = GeoResolver::new(self.geo.clone());

        for file in &files {
            counts.files_scanned += 1;

            match self.process_file(file, &mut resolver, ticket, counts).await {
                Ok(()) => {}
                Err(CollectError::Read(e)) => {
                    tracing::warn!(path = %file.path.display(), error = %e, "Skipping unreadable log file");
                    counts.files_skipped += 1;
                }
                Err(e) => return Err(e),
            }

            self.job.update_counts(ticket, counts).await;
        }

        tracing::debug!(
            addresses = resolver.cached_addresses(),
            cache_hits = resolver.cache_hits(),
            "Geo lookups for run"
        );

        Ok(())
    }

    async fn process_file(
        &self,
        file: &LogFile,
        resolver: &mut GeoResolver,
        ticket: &RunTicket,
        counts: &mut JobCounts,
    ) -> Result<(), CollectError> {
        let Some(source_id) = source_identity(&file.path, file.compressed, &file.stream)? else {
            tracing::debug!(path = %file.path.display(), "No complete first line yet, skipping");
            return Ok(());
        };

        let mut checkpoint = match self.storage.load_checkpoint(&source_id).await? {
            Some(checkpoint) => checkpoint,
            None => ScanCheckpoint::new(source_id.clone(), file.path.clone(), file.kind),
        };

        if checkpoint.completed {
            tracing::debug!(path = %file.path.display(), "Rotated file already collected");
            return Ok(());
        }

        // The same generation moves from the live name to rotated names
        checkpoint.path = file.path.clone();
        checkpoint.kind = file.kind;

        let file_len = if file.compressed {
            None
        } else {
            std::fs::metadata(&file.path).ok().map(|m| m.len())
        };
        let start = checkpoint.resume_offset(file_len);
        if start < checkpoint.offset {
            tracing::info!(path = %file.path.display(), "Log file was truncated, reading from start");
        }

        let closed = file.kind == FileKind::Rotated;
        let mut reader = LogFileReader::open(&file.path, file.compressed, start, closed)?;
        let mut batch = Vec::with_capacity(self.settings.batch_size);

        while let Some(line) = reader.next_line()? {
            if let Some(entry) = self.entry_for_line(&line, &source_id, resolver, counts) {
                batch.push(entry);
            }

            if batch.len() >= self.settings.batch_size {
                self.commit(&mut batch, &mut checkpoint, reader.position(), counts)
                    .await?;
                self.job.update_counts(ticket, counts).await;
            }
        }

        self.commit(&mut batch, &mut checkpoint, reader.position(), counts)
            .await?;
        if closed {
            checkpoint.complete(reader.position());
            self.storage.save_checkpoint(&checkpoint).await?;
        }

        tracing::debug!(
            path = %file.path.display(),
            kind = file.kind.as_str(),
            offset = checkpoint.offset,
            "Collected log file"
        );

        Ok(())
    }

    fn entry_for_line(
        &self,
        line: &RawLine,
        source_id: &str,
        resolver: &mut GeoResolver,
        counts: &mut JobCounts,
    ) -> Option<NewLogEntry> {
        if line.text.trim().is_empty() {
            return None;
        }

        match self.template.parse(&line.text) {
            ParseOutcome::Record(parsed) => {
                counts.lines_parsed += 1;
                let country = resolver.resolve(&parsed.client_ip);
                Some(new_entry(parsed, country, line, source_id))
            }
            ParseOutcome::Malformed(reason) => {
                counts.lines_malformed += 1;
                tracing::debug!(offset = line.offset, ?reason, "Malformed log line");
                None
            }
        }
    }

    /// Append the batch and move the checkpoint past it.
    async fn commit(
        &self,
        batch: &mut Vec<NewLogEntry>,
        checkpoint: &mut ScanCheckpoint,
        position: u64,
        counts: &mut JobCounts,
    ) -> Result<(), CollectError> {
        if !batch.is_empty() {
            let inserted = self.storage.append_entries(batch).await?;
            counts.entries_added += inserted as u64;
            batch.clear();
        }

        if position != checkpoint.offset {
            checkpoint.advance(position);
            self.storage.save_checkpoint(checkpoint).await?;
        }

        Ok(())
    }
}

fn new_entry(parsed: ParsedLine, country: String, line: &RawLine, source_id: &str) -> NewLogEntry {
    NewLogEntry {
        timestamp: parsed.timestamp,
        ip_address: parsed.client_ip,
        country,
        domain: parsed.domain,
        method: parsed.method,
        scheme: parsed.scheme,
        request_path: parsed.request_path,
        status_code: parsed.status_code,
        bytes_sent: parsed.bytes_sent,
        gzip: parsed.gzip,
        upstream: parsed.upstream,
        referrer: parsed.referrer,
        user_agent: parsed.user_agent,
        raw_log: line.text.clone(),
        ingested_at: Utc::now(),
        source_id: source_id.to_string(),
        source_offset: line.offset,
    }
}
