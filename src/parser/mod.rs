//! Access-log line parsing driven by an nginx-style `log_format` template.

pub mod template;
pub mod timestamp;

pub use template::{LineTemplate, TemplateError};
pub use timestamp::{TimestampError, TimestampFormat};

use chrono::{DateTime, Utc};

/// Structured fields extracted from one access-log line.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    pub timestamp: DateTime<Utc>,
    pub client_ip: String,
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
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    NoMatch,
    BadTimestamp,
    MissingClientAddress,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Record(ParsedLine),
    Malformed(MalformedReason),
}
