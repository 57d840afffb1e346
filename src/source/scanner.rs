use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot read log directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Whether a file is still being written or is a closed past generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Live,
    Rotated,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Live => "live",
            FileKind::Rotated => "rotated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "live" => Some(FileKind::Live),
            "rotated" => Some(FileKind::Rotated),
            _ => None,
        }
    }
}

/// Glob patterns (matched against file names) that classify directory entries.
#[derive(Debug, Clone)]
pub struct FilePatterns {
    pub live: Pattern,
    pub rotated: Pattern,
}

impl FilePatterns {
    pub fn new(live: &str, rotated: &str) -> Result<Self, glob::PatternError> {
        Ok(Self {
            live: Pattern::new(live)?,
            rotated: Pattern::new(rotated)?,
        })
    }

    /// Rotated wins when a name matches both, since it is the narrower pattern
    /// in any sane configuration.
    fn classify(&self, name: &str) -> Option<FileKind> {
        if self.rotated.matches(name) {
            Some(FileKind::Rotated)
        } else if self.live.matches(name) {
            Some(FileKind::Live)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogFile {
    pub path: PathBuf,
    pub name: String,
    pub kind: FileKind,
    pub compressed: bool,
    pub rotation_index: u64,
    /// Name shared by every generation of this log, e.g. `proxy-host-1_access.log`
    pub stream: String,
}

/// Last all-digit dot component of a file name: `access.log.3.gz` → 3.
pub fn rotation_index(name: &str) -> u64 {
    name.rsplit('.')
        .find(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|part| part.parse().ok())
        .unwrap_or(0)
}

/// File name without its rotation suffix: `access.log.3.gz` → `access.log`.
pub fn stream_name(name: &str) -> &str {
    let base = name.strip_suffix(".gz").unwrap_or(name);
    match base.rsplit_once('.') {
        Some((stem, suffix))
            if !stem.is_empty() && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) =>
        {
            stem
        }
        _ => base,
    }
}

/// List candidate log files in `dir` (non recursive).
///
/// Rotated files come first, oldest generation first, then live files by name.
pub fn scan_directory(dir: &Path, patterns: &FilePatterns) -> Result<Vec<LogFile>, ScanError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ScanError::Directory {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut rotated = Vec::new();
    let mut live = Vec::new();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "Skipping unreadable directory entry");
                continue;
            }
        };

        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            tracing::warn!(path = %path.display(), "Skipping file with non UTF-8 name");
            continue;
        };

        let Some(kind) = patterns.classify(&name) else {
            continue;
        };

        let file = LogFile {
            compressed: name.ends_with(".gz"),
            rotation_index: rotation_index(&name),
            stream: stream_name(&name).to_string(),
            path,
            name,
            kind,
        };

        match kind {
            FileKind::Rotated => rotated.push(file),
            FileKind::Live => live.push(file),
        }
    }

    rotated.sort_by(|a, b| {
        (Reverse(a.rotation_index), &a.name).cmp(&(Reverse(b.rotation_index), &b.name))
    });
    live.sort_by(|a, b| a.name.cmp(&b.name));

    tracing::debug!(
        dir = %dir.display(),
        rotated = rotated.len(),
        live = live.len(),
        "Scanned log directory"
    );

    rotated.extend(live);
    Ok(rotated)
}
