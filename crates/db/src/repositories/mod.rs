//! SQLite implementations of the core store contracts. Each store maps
//! `sqlx` failures into the driver-agnostic `StoreError` the engine
//! consumes.

use chrono::{DateTime, SecondsFormat, Utc};

use tripflow_core::errors::StoreError;

pub mod chain;
pub mod directory;
pub mod request;
pub mod rule;

pub use chain::SqlChainStore;
pub use directory::SqlDirectoryStore;
pub use request::SqlRequestStore;
pub use rule::SqlRuleStore;

pub(crate) fn db_err(error: sqlx::Error) -> StoreError {
    StoreError::Backend(error.to_string())
}

pub(crate) fn decode_err(detail: impl Into<String>) -> StoreError {
    StoreError::Decode(detail.into())
}

/// Timestamps are stored as fixed-width RFC 3339 text so lexicographic
/// ordering in SQL matches chronological ordering.
pub(crate) fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|error| decode_err(format!("column `{column}`: {error}")))
}

pub(crate) fn parse_opt_ts(
    raw: Option<String>,
    column: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    raw.map(|value| parse_ts(&value, column)).transpose()
}
