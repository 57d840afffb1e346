//! Validation of entry queries and the per-country summary.

use crate::storage::{CountrySummary, Storage, StorageError};
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

fn invalid(name: &'static str, reason: impl Into<String>) -> QueryError {
    QueryError::InvalidParameter {
        name,
        reason: reason.into(),
    }
}

/// Raw query-string parameters of `GET /api/entries`.
///
/// Everything arrives as text so that validation errors can name the
/// offending parameter instead of failing in the extractor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntryParams {
    pub limit: Option<String>,
    pub skip: Option<String>,
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub domain: Option<String>,
    pub status_code: Option<String>,
    pub sort_by: Option<String>,
    pub sort_dir: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Timestamp,
    IpAddress,
    StatusCode,
    Country,
    Domain,
    RequestPath,
}

impl SortKey {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "timestamp" => Some(SortKey::Timestamp),
            "ip_address" => Some(SortKey::IpAddress),
            "status_code" => Some(SortKey::StatusCode),
            "country" => Some(SortKey::Country),
            "domain" => Some(SortKey::Domain),
            "request_path" => Some(SortKey::RequestPath),
            _ => None,
        }
    }

    /// Column name; only ever one of the allow-listed identifiers.
    pub fn column(&self) -> &'static str {
        match self {
            SortKey::Timestamp => "timestamp",
            SortKey::IpAddress => "ip_address",
            SortKey::StatusCode => "status_code",
            SortKey::Country => "country",
            SortKey::Domain => "domain",
            SortKey::RequestPath => "request_path",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn sql(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Filters combined with AND. Text filters are case-insensitive substrings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub ip_address: Option<String>,
    pub country: Option<String>,
    pub domain: Option<String>,
    pub status_code: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryQuery {
    pub filter: EntryFilter,
    pub sort_by: SortKey,
    pub sort_dir: SortDirection,
    pub limit: u32,
    pub skip: u64,
}

impl Default for EntryQuery {
    fn default() -> Self {
        Self {
            filter: EntryFilter::default(),
            sort_by: SortKey::Timestamp,
            sort_dir: SortDirection::Desc,
            limit: DEFAULT_LIMIT,
            skip: 0,
        }
    }
}

/// Treat empty and whitespace-only parameters as not given.
fn given(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl EntryQuery {
    /// Validate raw parameters. Out-of-range values are rejected, never clamped.
    pub fn from_params(params: &EntryParams) -> Result<Self, QueryError> {
        let mut query = EntryQuery::default();

        if let Some(limit) = given(&params.limit) {
            let limit: u32 = limit
                .parse()
                .map_err(|_| invalid("limit", format!("'{}' is not a positive integer", limit)))?;
            if !(1..=MAX_LIMIT).contains(&limit) {
                return Err(invalid("limit", format!("must be between 1 and {}", MAX_LIMIT)));
            }
            query.limit = limit;
        }

        if let Some(skip) = given(&params.skip) {
            query.skip = skip
                .parse()
                .map_err(|_| invalid("skip", format!("'{}' is not a non-negative integer", skip)))?;
        }

        if let Some(status) = given(&params.status_code) {
            let status: i64 = status
                .parse()
                .map_err(|_| invalid("status_code", format!("'{}' is not an integer", status)))?;
            query.filter.status_code = Some(status);
        }

        query.filter.ip_address = given(&params.ip_address).map(str::to_string);
        query.filter.country = given(&params.country).map(str::to_string);
        query.filter.domain = given(&params.domain).map(str::to_string);

        if let Some(sort_by) = given(&params.sort_by) {
            query.sort_by = SortKey::parse(sort_by).ok_or_else(|| {
                invalid(
                    "sort_by",
                    format!(
                        "'{}' is not one of timestamp, ip_address, status_code, country, domain, request_path",
                        sort_by
                    ),
                )
            })?;
        }

        if let Some(sort_dir) = given(&params.sort_dir) {
            query.sort_dir = match sort_dir.to_ascii_lowercase().as_str() {
                "asc" => SortDirection::Asc,
                "desc" => SortDirection::Desc,
                _ => return Err(invalid("sort_dir", format!("'{}' is not asc or desc", sort_dir))),
            };
        }

        Ok(query)
    }
}

/// Per-country entry counts, largest first, ties by country name.
pub async fn country_summary(storage: &dyn Storage) -> Result<Vec<CountrySummary>, StorageError> {
    let mut summary = storage.summary_by_country().await?;
    summary.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.country.cmp(&b.country)));
    Ok(summary)
}
