#![forbid(unsafe_code)]

use super::error::StoreError;
use orc_core::clock::{format_timestamp, parse_timestamp};
use orc_core::model::{Pagination, ParseEnumError, Usage};
use rusqlite::Row;
use rusqlite::types::Type;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use time::OffsetDateTime;

fn conversion_failure(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

/// Closed string enum column; NULL maps to the enum's default.
pub(crate) fn enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ParseEnumError> + Default,
{
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(T::default()),
        Some(raw) => raw.parse().map_err(|err| conversion_failure(idx, err)),
    }
}

pub(crate) fn opt_enum_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<T>>
where
    T: FromStr<Err = ParseEnumError>,
{
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|err| conversion_failure(idx, err)),
    }
}

pub(crate) fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let raw: String = row.get(idx)?;
    parse_timestamp(&raw).map_err(|err| conversion_failure(idx, err))
}

pub(crate) fn opt_ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<OffsetDateTime>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .map_err(|err| conversion_failure(idx, err)),
    }
}

/// JSON column; NULL or empty text maps to `T::default()`.
pub(crate) fn json_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: DeserializeOwned + Default,
{
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(T::default()),
        Some(raw) if raw.trim().is_empty() => Ok(T::default()),
        Some(raw) => serde_json::from_str(&raw).map_err(|err| conversion_failure(idx, err)),
    }
}

pub(crate) fn opt_json_col<T: DeserializeOwned>(
    row: &Row<'_>,
    idx: usize,
) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|err| conversion_failure(idx, err)),
    }
}

pub(crate) fn u32_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<u32> {
    let value: i64 = row.get(idx)?;
    u32::try_from(value).map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value))
}

/// Three consecutive columns: input tokens, output tokens, cost.
pub(crate) fn usage_cols(row: &Row<'_>, first: usize) -> rusqlite::Result<Usage> {
    Ok(Usage {
        input_tokens: row.get(first)?,
        output_tokens: row.get(first + 1)?,
        cost_usd: row.get(first + 2)?,
    })
}

pub(crate) fn to_json<T: Serialize + ?Sized>(
    what: &'static str,
    value: &T,
) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Json { what, source })
}

pub(crate) fn ts_text(at: OffsetDateTime) -> String {
    format_timestamp(at)
}

pub(crate) fn opt_ts_text(at: Option<OffsetDateTime>) -> Option<String> {
    at.map(format_timestamp)
}

/// `LIMIT`/`OFFSET` values; SQLite treats a negative limit as unbounded.
pub(crate) fn limit_offset(page: Pagination) -> (i64, i64) {
    let limit = page.limit.map(i64::from).unwrap_or(-1);
    (limit, i64::from(page.offset))
}

/// Empty strings are stored as NULL.
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.trim().is_empty())
}

pub(crate) fn opt_u32_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<u32>> {
    match row.get::<_, Option<i64>>(idx)? {
        None => Ok(None),
        Some(value) => u32::try_from(value)
            .map(Some)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(idx, value)),
    }
}
