use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::models::ClientRecord;
use crate::normalize::{is_new_status, parse_date};

/// Quick filters applied to the client list before it is pivoted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientFilter {
    pub location: Option<String>,
    pub trainer: Option<String>,
    pub membership: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub new_only: bool,
}

impl ClientFilter {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn matches(&self, record: &ClientRecord) -> bool {
        if !field_matches(self.location.as_deref(), record.first_visit_location.as_deref())
            || !field_matches(self.trainer.as_deref(), record.trainer_name.as_deref())
            || !field_matches(self.membership.as_deref(), record.membership_used.as_deref())
        {
            return false;
        }

        if self.new_only && !is_new_status(record.is_new.as_deref()) {
            return false;
        }

        if self.from.is_none() && self.to.is_none() {
            return true;
        }

        match record.first_visit_date.as_deref().and_then(parse_date) {
            Some(date) => {
                self.from.map_or(true, |from| date >= from) && self.to.map_or(true, |to| date <= to)
            }
            None => false,
        }
    }

    pub fn apply(&self, records: Vec<ClientRecord>) -> Vec<ClientRecord> {
        if self.is_empty() {
            return records;
        }
        records
            .into_iter()
            .filter(|record| self.matches(record))
            .collect()
    }

    /// Active filters as label/value pairs.
    pub fn describe(&self) -> BTreeMap<String, String> {
        let mut active = BTreeMap::new();
        let text = [
            ("location", &self.location),
            ("trainer", &self.trainer),
            ("membership", &self.membership),
        ];
        for (label, value) in text {
            if let Some(value) = value {
                active.insert(label.to_string(), value.clone());
            }
        }
        if let Some(from) = self.from {
            active.insert("from".to_string(), from.to_string());
        }
        if let Some(to) = self.to {
            active.insert("to".to_string(), to.to_string());
        }
        if self.new_only {
            active.insert("newOnly".to_string(), "true".to_string());
        }
        active
    }
}

fn field_matches(expected: Option<&str>, actual: Option<&str>) -> bool {
    match expected.map(str::trim).filter(|value| !value.is_empty()) {
        None => true,
        Some(expected) => actual
            .map(|value| value.trim().eq_ignore_ascii_case(expected))
            .unwrap_or(false),
    }
}
