use chrono::{DateTime, NaiveDate, NaiveDateTime};

use crate::models::{ClientRecord, MonthKey, RowType};

pub const UNKNOWN_KEY: &str = "Unknown";

const DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y, %H:%M:%S",
];

const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%Y/%m/%d",
    "%d %b %Y",
    "%b %d, %Y",
];

/// Parse the date formats the studio spreadsheets produce. Unrecognised
/// values yield `None` and the record is left out of date-based grouping.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let value = raw.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Some(timestamp.date_naive());
    }

    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|timestamp| timestamp.date())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|format| NaiveDate::parse_from_str(value, format).ok())
        })
}

/// `isNew` is free text; anything mentioning "new" counts.
pub fn is_new_status(value: Option<&str>) -> bool {
    value
        .map(|status| status.to_lowercase().contains("new"))
        .unwrap_or(false)
}

pub fn status_matches(value: Option<&str>, expected: &str) -> bool {
    value.map(|status| status.trim() == expected).unwrap_or(false)
}

/// Grouping key for `row_type`: surrounding whitespace trimmed, case kept,
/// blank or absent values bucketed as `Unknown`.
pub fn row_key(record: &ClientRecord, row_type: RowType) -> String {
    let raw = match row_type {
        RowType::ClientType => record.is_new.as_deref(),
        RowType::Membership => record.membership_used.as_deref(),
        RowType::Trainer => record.trainer_name.as_deref(),
        RowType::Location => record.first_visit_location.as_deref(),
    };

    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_KEY)
        .to_string()
}

/// A client record coerced into the shape aggregation works with.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedClient {
    /// Position of the source record in the input slice.
    pub index: usize,
    pub visit_date: Option<NaiveDate>,
    pub is_new: bool,
    pub converted: bool,
    pub retained: bool,
    pub ltv: f64,
    pub conversion_span: Option<f64>,
    pub visits_post_trial: Option<u32>,
}

impl NormalizedClient {
    pub fn visit_month(&self) -> Option<MonthKey> {
        self.visit_date.map(MonthKey::from_date)
    }
}

/// Conversion and retention only count for new members, so both are always
/// a subset of the new-member count.
pub fn normalize(index: usize, record: &ClientRecord) -> NormalizedClient {
    let is_new = is_new_status(record.is_new.as_deref());

    NormalizedClient {
        index,
        visit_date: record.first_visit_date.as_deref().and_then(parse_date),
        is_new,
        converted: is_new && status_matches(record.conversion_status.as_deref(), "Converted"),
        retained: is_new && status_matches(record.retention_status.as_deref(), "Retained"),
        ltv: record
            .ltv
            .filter(|value| value.is_finite())
            .unwrap_or(0.0)
            .max(0.0),
        conversion_span: record.conversion_span.filter(|value| value.is_finite()),
        visits_post_trial: record.visits_post_trial,
    }
}
