use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

/// Fixed-width RFC 3339 so that text comparison in SQL matches time order.
pub fn format_timestamp(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn encode_list(items: &[String]) -> Result<String> {
    serde_json::to_string(items).context("failed to encode list column")
}

pub fn decode_list(value: Option<String>, field: &str) -> Result<Option<Vec<String>>> {
    match value {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .with_context(|| format!("failed to parse {field}")),
        None => Ok(None),
    }
}
