use flate2::read::MultiGzDecoder;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ReaderError {
    fn io(path: &Path, source: io::Error) -> Self {
        ReaderError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One line of a log file and the byte position where it starts
/// (in the decompressed stream for gzip files).
#[derive(Debug, Clone, PartialEq)]
pub struct RawLine {
    pub offset: u64,
    pub text: String,
}

/// Sequential line reader over a plain or gzip-compressed log file.
pub struct LogFileReader {
    path: PathBuf,
    reader: Box<dyn BufRead + Send>,
    current_offset: u64,
    // A live file may end in a line that is still being written
    consume_partial_tail: bool,
    eof_reached: bool,
}

impl LogFileReader {
    /// Open `path` and position it at `start_offset`.
    ///
    /// `consume_partial_tail` controls whether a final line without a
    /// trailing newline is returned (closed files) or left for a later run
    /// (the live file).
    pub fn open(
        path: &Path,
        compressed: bool,
        start_offset: u64,
        consume_partial_tail: bool,
    ) -> Result<Self, ReaderError> {
        let file = File::open(path).map_err(|e| ReaderError::io(path, e))?;

        let (reader, current_offset): (Box<dyn BufRead + Send>, u64) = if compressed {
            let mut decoder = BufReader::new(MultiGzDecoder::new(file));
            // gzip streams cannot seek; discard up to the offset instead
            let skipped = io::copy(&mut (&mut decoder).take(start_offset), &mut io::sink())
                .map_err(|e| ReaderError::io(path, e))?;
            (Box::new(decoder), skipped)
        } else {
            let mut buf_reader = BufReader::new(file);
            buf_reader
                .seek(SeekFrom::Start(start_offset))
                .map_err(|e| ReaderError::io(path, e))?;
            (Box::new(buf_reader), start_offset)
        };

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            current_offset,
            consume_partial_tail,
            eof_reached: false,
        })
    }

    /// Read the next line, or None at end of file.
    pub fn next_line(&mut self) -> Result<Option<RawLine>, ReaderError> {
        if self.eof_reached {
            return Ok(None);
        }

        let mut buf = Vec::new();
        let bytes_read = self
            .reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| ReaderError::io(&self.path, e))?;

        if bytes_read == 0 {
            self.eof_reached = true;
            return Ok(None);
        }

        if buf.last() != Some(&b'\n') && !self.consume_partial_tail {
            // Leave the offset before the unfinished line
            self.eof_reached = true;
            return Ok(None);
        }

        let line_start_offset = self.current_offset;
        self.current_offset += bytes_read as u64;

        while matches!(buf.last(), Some(b'\n') | Some(b'\r')) {
            buf.pop();
        }

        Ok(Some(RawLine {
            offset: line_start_offset,
            text: String::from_utf8_lossy(&buf).into_owned(),
        }))
    }

    /// Byte position just after the last line returned.
    pub fn position(&self) -> u64 {
        self.current_offset
    }
}

/// Identity of a file generation: hex SHA-256 over the stream name (the file
/// name without rotation suffix) and the first complete line.
///
/// Rotation and compression keep both, so a live file and its rotated copies
/// share an identity and line offsets, while sibling logs that happen to
/// start with the same line do not. Returns None while the file has no
/// newline-terminated first line.
pub fn source_identity(
    path: &Path,
    compressed: bool,
    stream: &str,
) -> Result<Option<String>, ReaderError> {
    let mut reader = LogFileReader::open(path, compressed, 0, false)?;
    let mut first = Vec::new();

    let bytes_read = reader
        .reader
        .read_until(b'\n', &mut first)
        .map_err(|e| ReaderError::io(path, e))?;

    if bytes_read == 0 || first.last() != Some(&b'\n') {
        return Ok(None);
    }

    let mut hasher = Sha256::new();
    hasher.update(stream.as_bytes());
    hasher.update([0u8]);
    hasher.update(&first);
    Ok(Some(format!("{:x}", hasher.finalize())))
}
