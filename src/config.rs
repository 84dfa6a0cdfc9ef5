use std::path::PathBuf;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::Args;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::db;
use crate::filter::ClientFilter;
use crate::ingest::{self, LoadReport};
use crate::insights::{SummaryClient, SummaryError};
use crate::models::{ClientRecord, ComparisonPeriod};

const DEFAULT_LOG_FILTER: &str = "warn,studio_retention_analytics=info";

/// Logs go to stderr so exported tables on stdout stay clean.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug, Clone, Args)]
pub struct DatabaseArgs {
    /// Postgres connection string
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    pub database_url: Option<String>,
}

impl DatabaseArgs {
    pub async fn connect(&self) -> anyhow::Result<PgPool> {
        let database_url = self
            .database_url
            .as_deref()
            .context("DATABASE_URL must be set to a Postgres instance")?;

        PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")
    }
}

#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Read clients from a spreadsheet CSV export instead of the database
    #[arg(long)]
    pub csv: Option<PathBuf>,
    #[command(flatten)]
    pub database: DatabaseArgs,
}

impl SourceArgs {
    pub async fn load(&self, filter: &ClientFilter) -> anyhow::Result<Vec<ClientRecord>> {
        let (records, report) = match &self.csv {
            Some(path) => ingest::load_csv(path)?,
            None => {
                let pool = self.database.connect().await?;
                let records = db::fetch_clients(&pool, filter.location.as_deref()).await?;
                let report = LoadReport {
                    loaded: records.len(),
                    skipped: 0,
                };
                (records, report)
            }
        };

        let records = filter.apply(records);
        info!(
            loaded = report.loaded,
            skipped = report.skipped,
            matched = records.len(),
            "client data ready"
        );
        Ok(records)
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Only clients whose first visit was at this location
    #[arg(long)]
    pub location: Option<String>,
    #[arg(long)]
    pub trainer: Option<String>,
    #[arg(long)]
    pub membership: Option<String>,
    /// First visit on or after this date (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,
    /// First visit on or before this date (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<NaiveDate>,
    /// Only clients flagged as new
    #[arg(long)]
    pub new_only: bool,
}

impl FilterArgs {
    pub fn to_filter(&self) -> ClientFilter {
        ClientFilter {
            location: self.location.clone(),
            trainer: self.trainer.clone(),
            membership: self.membership.clone(),
            from: self.from,
            to: self.to,
            new_only: self.new_only,
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct PeriodArgs {
    /// Current comparison year; the previous year is compared against it
    #[arg(long)]
    pub year: Option<i32>,
}

impl PeriodArgs {
    pub fn resolve(&self, today: NaiveDate) -> ComparisonPeriod {
        match self.year {
            Some(year) => ComparisonPeriod::for_year(year, today),
            None => ComparisonPeriod::current(today),
        }
    }

    pub fn resolve_now(&self) -> ComparisonPeriod {
        self.resolve(Utc::now().date_naive())
    }
}

#[derive(Debug, Clone, Args)]
pub struct AiArgs {
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub base_url: String,
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o-mini")]
    pub model: String,
}

impl AiArgs {
    pub fn client(&self) -> Result<SummaryClient, SummaryError> {
        SummaryClient::new(self.api_key.clone(), &self.base_url, &self.model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        period: PeriodArgs,
    }

    #[test]
    fn filter_flags_map_onto_client_filter() {
        let harness = Harness::parse_from([
            "test",
            "--location",
            "Kwality House",
            "--from",
            "2025-01-01",
            "--new-only",
        ]);
        let filter = harness.filters.to_filter();
        assert_eq!(filter.location.as_deref(), Some("Kwality House"));
        assert_eq!(filter.from, NaiveDate::from_ymd_opt(2025, 1, 1));
        assert!(filter.new_only);
        assert!(filter.trainer.is_none());
    }

    #[test]
    fn year_flag_sets_the_comparison_pair() {
        let today = NaiveDate::from_ymd_opt(2025, 5, 2).unwrap();
        let harness = Harness::parse_from(["test", "--year", "2024"]);
        let period = harness.period.resolve(today);
        assert_eq!(period.years(), [2023, 2024]);
        assert_eq!(period.last_month, 12);

        let default = PeriodArgs::default().resolve(today);
        assert_eq!(default.years(), [2024, 2025]);
        assert_eq!(default.last_month, 5);
    }
}
