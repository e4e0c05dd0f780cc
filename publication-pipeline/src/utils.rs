use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

use crate::types::{PipelineError, Result};

/// Fixed-width UTC timestamps, so lexical order in the database matches
/// chronological order.
pub fn encode_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_time(column: &str, raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| PipelineError::CorruptRecord(format!("{} holds invalid timestamp {:?}: {}", column, raw, e)))
}

pub fn decode_optional_time(column: &str, raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|raw| decode_time(column, &raw)).transpose()
}

pub fn decode_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| PipelineError::CorruptRecord(format!("invalid publication id {:?}: {}", raw, e)))
}

/// Trim `text` to at most `limit` characters for log lines.
pub fn preview(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        format!("{}...", text.chars().take(limit).collect::<String>())
    }
}
