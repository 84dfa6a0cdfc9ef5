use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};
use thiserror::Error;

pub const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// One client/trial row as exported from the studio spreadsheet.
///
/// Every field is optional; consumers treat absence as zero or unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientRecord {
    #[serde(alias = "first_name")]
    pub first_name: Option<String>,
    #[serde(alias = "last_name")]
    pub last_name: Option<String>,
    pub email: Option<String>,
    #[serde(alias = "first_visit_date")]
    pub first_visit_date: Option<String>,
    #[serde(alias = "first_visit_location")]
    pub first_visit_location: Option<String>,
    #[serde(alias = "is_new")]
    pub is_new: Option<String>,
    #[serde(alias = "conversion_status")]
    pub conversion_status: Option<String>,
    #[serde(alias = "retention_status")]
    pub retention_status: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option")]
    pub ltv: Option<f64>,
    #[serde(alias = "conversion_span", deserialize_with = "csv::invalid_option")]
    pub conversion_span: Option<f64>,
    #[serde(alias = "visits_post_trial", deserialize_with = "csv::invalid_option")]
    pub visits_post_trial: Option<u32>,
    #[serde(alias = "membership_used")]
    pub membership_used: Option<String>,
    #[serde(alias = "trainer_name")]
    pub trainer_name: Option<String>,
}

impl ClientRecord {
    pub const COLUMNS: [&'static str; 13] = [
        "firstName",
        "lastName",
        "email",
        "firstVisitDate",
        "firstVisitLocation",
        "isNew",
        "conversionStatus",
        "retentionStatus",
        "ltv",
        "conversionSpan",
        "visitsPostTrial",
        "membershipUsed",
        "trainerName",
    ];

    pub fn display_name(&self) -> String {
        let name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !name.is_empty() {
            return name;
        }

        self.email
            .as_deref()
            .map(str::trim)
            .filter(|email| !email.is_empty())
            .unwrap_or("Unknown")
            .to_string()
    }

    /// Stable key used to make imports idempotent.
    pub fn source_key(&self) -> String {
        let identity = self
            .email
            .as_deref()
            .map(|email| email.trim().to_lowercase())
            .filter(|email| !email.is_empty())
            .unwrap_or_else(|| self.display_name().to_lowercase());

        format!(
            "{}|{}|{}",
            identity,
            self.first_visit_date.as_deref().unwrap_or("").trim(),
            self.first_visit_location.as_deref().unwrap_or("").trim()
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MonthKeyError {
    #[error("month key must look like YYYY-MM, got {0:?}")]
    Format(String),
    #[error("month {0} is outside 1..=12")]
    Month(u32),
}

/// Calendar month bucket, rendered as `YYYY-MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl MonthKey {
    pub fn new(year: i32, month: u32) -> Result<Self, MonthKeyError> {
        if !(1..=12).contains(&month) {
            return Err(MonthKeyError::Month(month));
        }
        Ok(Self { year, month })
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    pub fn month_name(&self) -> &'static str {
        MONTH_NAMES[(self.month as usize).saturating_sub(1) % 12]
    }

    /// Human label such as `Mar 2025`.
    pub fn label(&self) -> String {
        format!("{} {}", self.month_name(), self.year)
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = MonthKeyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (year, month) = value
            .trim()
            .split_once('-')
            .ok_or_else(|| MonthKeyError::Format(value.to_string()))?;
        let year = year
            .parse::<i32>()
            .map_err(|_| MonthKeyError::Format(value.to_string()))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| MonthKeyError::Format(value.to_string()))?;
        Self::new(year, month)
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Dimension used for pivot rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum RowType {
    ClientType,
    Membership,
    Trainer,
    Location,
}

impl RowType {
    pub fn label(&self) -> &'static str {
        match self {
            RowType::ClientType => "Client Type",
            RowType::Membership => "Membership",
            RowType::Trainer => "Trainer",
            RowType::Location => "Location",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFormat {
    Count,
    Percent,
    Currency,
    Days,
    Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    Trials,
    NewMembers,
    Converted,
    Retained,
    ConversionRate,
    RetentionRate,
    AvgLtv,
    TotalLtv,
    AvgConversionDays,
    AvgVisits,
}

impl Metric {
    pub const ALL: [Metric; 10] = [
        Metric::Trials,
        Metric::NewMembers,
        Metric::Converted,
        Metric::Retained,
        Metric::ConversionRate,
        Metric::RetentionRate,
        Metric::AvgLtv,
        Metric::TotalLtv,
        Metric::AvgConversionDays,
        Metric::AvgVisits,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Metric::Trials => "Trials",
            Metric::NewMembers => "New Members",
            Metric::Converted => "Converted",
            Metric::Retained => "Retained",
            Metric::ConversionRate => "Conversion Rate",
            Metric::RetentionRate => "Retention Rate",
            Metric::AvgLtv => "Average LTV",
            Metric::TotalLtv => "Total LTV",
            Metric::AvgConversionDays => "Avg Conversion Days",
            Metric::AvgVisits => "Avg Visits Post Trial",
        }
    }

    pub fn format(&self) -> MetricFormat {
        match self {
            Metric::Trials | Metric::NewMembers | Metric::Converted | Metric::Retained => {
                MetricFormat::Count
            }
            Metric::ConversionRate | Metric::RetentionRate => MetricFormat::Percent,
            Metric::AvgLtv | Metric::TotalLtv => MetricFormat::Currency,
            Metric::AvgConversionDays => MetricFormat::Days,
            Metric::AvgVisits => MetricFormat::Decimal,
        }
    }
}

/// The two years compared side by side, January through `last_month`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonPeriod {
    pub previous_year: i32,
    pub current_year: i32,
    pub last_month: u32,
}

impl ComparisonPeriod {
    /// Compare `year` against the year before it. Months stop at `today`'s
    /// month when `year` has not finished yet.
    pub fn for_year(year: i32, today: NaiveDate) -> Self {
        let last_month = if year >= today.year() {
            today.month()
        } else {
            12
        };

        Self {
            previous_year: year - 1,
            current_year: year,
            last_month,
        }
    }

    pub fn current(today: NaiveDate) -> Self {
        Self::for_year(today.year(), today)
    }

    pub fn years(&self) -> [i32; 2] {
        [self.previous_year, self.current_year]
    }

    pub fn months(&self) -> std::ops::RangeInclusive<u32> {
        1..=self.last_month
    }

    pub fn previous(&self, month: u32) -> MonthKey {
        MonthKey {
            year: self.previous_year,
            month,
        }
    }

    pub fn current_key(&self, month: u32) -> MonthKey {
        MonthKey {
            year: self.current_year,
            month,
        }
    }

    /// Every bucket in chronological order.
    pub fn month_keys(&self) -> Vec<MonthKey> {
        self.years()
            .into_iter()
            .flat_map(|year| self.months().map(move |month| MonthKey { year, month }))
            .collect()
    }

    pub fn contains(&self, key: MonthKey) -> bool {
        self.years().contains(&key.year) && self.months().contains(&key.month)
    }
}
