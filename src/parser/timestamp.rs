use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use thiserror::Error;

/// Default strptime format for nginx `$time_local`.
pub const TIME_LOCAL_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

#[derive(Debug, Error)]
pub enum TimestampError {
    #[error("failed to parse timestamp '{value}' with format '{format}': {source}")]
    ParseError {
        value: String,
        format: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimestampFormat {
    Strptime(String),
    Iso8601,
    Epoch,
    EpochMs,
}

impl TimestampFormat {
    /// Build a format from its config spelling: a strptime format string,
    /// 'iso8601', 'epoch' or 'epoch_ms'.
    pub fn from_spec(spec: &str) -> Self {
        match spec {
            "iso8601" => TimestampFormat::Iso8601,
            "epoch" => TimestampFormat::Epoch,
            "epoch_ms" => TimestampFormat::EpochMs,
            other => TimestampFormat::Strptime(other.to_string()),
        }
    }

    /// Parse a captured timestamp value into UTC.
    pub fn parse(&self, value: &str) -> Result<DateTime<Utc>, TimestampError> {
        match self {
            TimestampFormat::Iso8601 => parse_iso8601(value),
            TimestampFormat::Epoch => parse_epoch(value),
            TimestampFormat::EpochMs => parse_epoch_ms(value),
            TimestampFormat::Strptime(fmt) => parse_strptime(value, fmt),
        }
    }
}

fn parse_error(
    value: &str,
    format: &str,
    source: impl std::error::Error + Send + Sync + 'static,
) -> TimestampError {
    TimestampError::ParseError {
        value: value.to_string(),
        format: format.to_string(),
        source: Box::new(source),
    }
}

fn out_of_range(value: &str, format: &str) -> TimestampError {
    parse_error(
        value,
        format,
        std::io::Error::new(std::io::ErrorKind::InvalidData, "timestamp out of range"),
    )
}

fn parse_iso8601(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| parse_error(value, "iso8601", e))
}

fn parse_epoch(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let seconds: i64 = value
        .parse()
        .map_err(|e: std::num::ParseIntError| parse_error(value, "epoch", e))?;

    Utc.timestamp_opt(seconds, 0)
        .single()
        .ok_or_else(|| out_of_range(value, "epoch"))
}

fn parse_epoch_ms(value: &str) -> Result<DateTime<Utc>, TimestampError> {
    let millis: i64 = value
        .parse()
        .map_err(|e: std::num::ParseIntError| parse_error(value, "epoch_ms", e))?;

    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| out_of_range(value, "epoch_ms"))
}

fn parse_strptime(value: &str, format: &str) -> Result<DateTime<Utc>, TimestampError> {
    if format.contains("%z") || format.contains("%Z") || format.contains("%:z") {
        DateTime::parse_from_str(value, format)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| parse_error(value, format, e))
    } else {
        // No zone in the format: the value is taken as UTC
        NaiveDateTime::parse_from_str(value, format)
            .map(|ndt| Utc.from_utc_datetime(&ndt))
            .map_err(|e| parse_error(value, format, e))
    }
}
