use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::error::CliError;
use crate::storage::EntryInfo;

/// User supplied bounds, already converted to microseconds since the Unix epoch.
/// A missing bound falls back to the entry's own range when resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Option<i64>,
    pub stop: Option<i64>,
}

/// A window with both bounds known, for one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub start: i64,
    pub stop: i64,
}

impl TimeWindow {
    pub fn parse(start: Option<&str>, stop: Option<&str>) -> Result<Self, CliError> {
        Ok(Self {
            start: start.map(parse_timestamp).transpose()?,
            stop: stop.map(parse_timestamp).transpose()?,
        })
    }

    /// Fill missing bounds from `(oldest, latest)`. Bounds are never reordered.
    pub fn resolve(&self, defaults: (i64, i64)) -> ResolvedWindow {
        ResolvedWindow {
            start: self.start.unwrap_or(defaults.0),
            stop: self.stop.unwrap_or(defaults.1),
        }
    }

    pub fn resolve_for(&self, entry: &EntryInfo) -> ResolvedWindow {
        self.resolve((entry.oldest_record, entry.latest_record))
    }
}

pub fn normalize(
    raw_start: Option<&str>,
    raw_stop: Option<&str>,
    defaults: (i64, i64),
) -> Result<ResolvedWindow, CliError> {
    Ok(TimeWindow::parse(raw_start, raw_stop)?.resolve(defaults))
}

/// Parse an integer microsecond timestamp or an ISO 8601 date-time.
///
/// Date-times without an offset are taken as UTC.
pub fn parse_timestamp(value: &str) -> Result<i64, CliError> {
    let trimmed = value.trim();
    if let Ok(micros) = trimmed.parse::<i64>() {
        return Ok(micros);
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(datetime.timestamp_micros());
    }

    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Ok(naive.and_utc().timestamp_micros());
        }
    }

    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_micros())
        .ok_or_else(|| CliError::TimeParse(value.to_string()))
}
