use crate::source::FileKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Persisted read position for one file generation, keyed by source identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanCheckpoint {
    pub source_id: String,
    /// Last path the generation was seen under (it moves on rotation)
    pub path: PathBuf,
    pub kind: FileKind,
    pub offset: u64,
    pub completed: bool,
    pub updated_at: DateTime<Utc>,
}

impl ScanCheckpoint {
    pub fn new(source_id: impl Into<String>, path: PathBuf, kind: FileKind) -> Self {
        Self {
            source_id: source_id.into(),
            path,
            kind,
            offset: 0,
            completed: false,
            updated_at: Utc::now(),
        }
    }

    /// Record progress after a committed batch.
    pub fn advance(&mut self, offset: u64) {
        self.offset = offset;
        self.updated_at = Utc::now();
    }

    /// Mark a rotated generation as fully read; it is never reopened.
    pub fn complete(&mut self, offset: u64) {
        self.advance(offset);
        self.completed = true;
    }

    /// Where reading should start for a file currently `file_len` bytes long.
    ///
    /// A file shorter than the saved offset was truncated in place and is read
    /// again from the start.
    pub fn resume_offset(&self, file_len: Option<u64>) -> u64 {
        match file_len {
            Some(len) if len < self.offset => 0,
            _ => self.offset,
        }
    }
}
