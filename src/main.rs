use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, error, info, warn};

mod config;
mod db;
mod drilldown;
mod export;
mod filter;
mod ingest;
mod insights;
mod models;
mod normalize;
mod pivot;
mod report;
mod view;

use config::{AiArgs, DatabaseArgs, FilterArgs, PeriodArgs, SourceArgs};
use drilldown::CellColumn;
use export::{ExportFormat, TabularExport};
use insights::SummaryRequest;
use models::{Metric, MonthKey, RowType};
use pivot::PivotGrid;
use view::{DisplayMode, PivotView, SortColumn, SortDirection};

#[derive(Parser)]
#[command(name = "studio-retention")]
#[command(about = "Retention and conversion analytics for studios", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb {
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Import clients from a spreadsheet CSV export
    Import {
        #[arg(long)]
        csv: PathBuf,
        #[command(flatten)]
        database: DatabaseArgs,
    },
    /// Show one metric as a year-on-year pivot table
    Pivot {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        period: PeriodArgs,
        #[arg(long, value_enum, default_value = "client-type")]
        rows: RowType,
        #[arg(long, value_enum, default_value = "trials")]
        metric: Metric,
        #[arg(long, value_enum, default_value = "values")]
        mode: DisplayMode,
        /// Column to sort by: label, total, or a month (jan..dec, 1-12)
        #[arg(long)]
        sort: Option<SortColumn>,
        /// Overrides the column's default direction (labels asc, numbers desc)
        #[arg(long, value_enum, requires = "sort")]
        direction: Option<SortDirection>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Export every metric of the pivot
    Export {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        period: PeriodArgs,
        #[arg(long, value_enum, default_value = "client-type")]
        rows: RowType,
        #[arg(long, value_enum, default_value = "tsv")]
        format: ExportFormat,
        #[arg(long, default_value = "Client Retention")]
        title: String,
        /// Defaults to a file name derived from the title
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Summarise the clients behind one pivot cell or metric
    Drilldown {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        period: PeriodArgs,
        #[arg(long, value_enum, default_value = "client-type")]
        rows: RowType,
        /// Pivot row to open; TOTALS selects the totals row
        #[arg(long, required_unless_present_any = ["metric", "payload"])]
        row_key: Option<String>,
        /// Open a metric's headline figure instead of a cell
        #[arg(long, value_enum, conflicts_with = "row_key")]
        metric: Option<Metric>,
        /// Month column; the year's Total column when omitted
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=12))]
        month: Option<u32>,
        /// Use the previous comparison year instead of the current one
        #[arg(long)]
        previous: bool,
        /// Summarise a saved drill-down payload (JSON) instead of the pivot
        #[arg(long, conflicts_with_all = ["row_key", "metric", "month"])]
        payload: Option<PathBuf>,
    },
    /// Generate (or reuse) an AI narrative summary
    Summarize {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        filters: FilterArgs,
        #[command(flatten)]
        ai: AiArgs,
        #[arg(long, default_value = "client-retention")]
        context: String,
        /// Defaults to the location filter, or "all"
        #[arg(long)]
        location_id: Option<String>,
        /// Ignore any cached summary
        #[arg(long)]
        refresh: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    config::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::InitDb { database } => {
            let pool = database.connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Import { csv, database } => {
            let (records, report) = ingest::load_csv(&csv)?;
            let pool = database.connect().await?;
            let inserted = db::import_clients(&pool, &records).await?;
            println!(
                "Inserted {inserted} of {} clients from {} ({} rows skipped).",
                report.loaded,
                csv.display(),
                report.skipped
            );
        }
        Commands::Pivot {
            source,
            filters,
            period,
            rows,
            metric,
            mode,
            sort,
            direction,
            out,
        } => {
            let records = source.load(&filters.to_filter()).await?;
            let grid = PivotGrid::build(&records, rows, period.resolve_now());
            if grid.is_empty() {
                println!("No data available.");
                return Ok(());
            }

            let mut view = PivotView::new(&grid, metric).with_mode(mode);
            if let Some(column) = sort {
                view.sort_by(column, direction);
            }

            debug!(metric = view.metric().label(), "rendering pivot view");
            write_or_print(out.as_deref(), &view.to_tsv())?;
        }
        Commands::Export {
            source,
            filters,
            period,
            rows,
            format,
            title,
            out,
        } => {
            let records = source.load(&filters.to_filter()).await?;
            let grid = PivotGrid::build(&records, rows, period.resolve_now());
            let body = match format {
                ExportFormat::Tsv => export::export_all_metrics(&grid),
                ExportFormat::Json => export::export_json(&title, &grid)?,
            };
            let out =
                out.unwrap_or_else(|| PathBuf::from(export::default_file_name(&title, format)));
            std::fs::write(&out, body)
                .with_context(|| format!("failed to write export to {}", out.display()))?;
            println!("Export written to {}.", out.display());
        }
        Commands::Drilldown {
            source,
            filters,
            period,
            rows,
            row_key,
            metric,
            month,
            previous,
            payload,
        } => {
            let payload = match payload {
                Some(path) => drilldown::load_payload(&path)?,
                None => {
                    let records = source.load(&filters.to_filter()).await?;
                    let period = period.resolve_now();
                    let grid = PivotGrid::build(&records, rows, period);
                    let year = if previous {
                        period.previous_year
                    } else {
                        period.current_year
                    };
                    match (metric, row_key) {
                        (Some(metric), _) => {
                            drilldown::payload_for_metric(&grid, &records, metric, year)?
                        }
                        (None, Some(row_key)) => {
                            let column = match month {
                                Some(month) => CellColumn::Month(MonthKey::new(year, month)?),
                                None => CellColumn::Year(year),
                            };
                            drilldown::payload_for_cell(&grid, &records, &row_key, column)?
                        }
                        (None, None) => anyhow::bail!("pass --row-key, --metric or --payload"),
                    }
                }
            };
            debug!(kind = %payload.kind(), "drill-down resolved");
            print!("{}", report::build_drilldown_report(&payload));
        }
        Commands::Summarize {
            source,
            filters,
            ai,
            context,
            location_id,
            refresh,
        } => {
            let filter = filters.to_filter();
            let records = source.load(&filter).await?;
            let location_id = location_id
                .or_else(|| filter.location.clone())
                .unwrap_or_else(|| "all".to_string());
            let request = SummaryRequest::from_records(
                &context,
                &location_id,
                &records,
                filter.describe(),
                None,
            );
            let data_hash = request.data_hash();

            let pool = match source.database.connect().await {
                Ok(pool) => Some(pool),
                Err(err) => {
                    warn!(error = %err, "summary cache unavailable");
                    None
                }
            };

            if let (Some(pool), false) = (&pool, refresh) {
                match db::find_summary(pool, &context, &location_id, &data_hash).await {
                    Ok(Some(summary)) => {
                        info!(%data_hash, "using cached summary");
                        print!(
                            "{}",
                            report::build_summary_report(&context, &location_id, &summary, true)
                        );
                        return Ok(());
                    }
                    Ok(None) => debug!(%data_hash, "no cached summary"),
                    Err(err) => warn!(error = %err, "summary cache lookup failed"),
                }
            }

            let summary = match ai.client() {
                Ok(client) => client.generate(&request).await,
                Err(err) => Err(err),
            };

            match summary {
                Ok(summary) => {
                    if let Some(pool) = &pool {
                        if let Err(err) =
                            db::save_summary(pool, &context, &location_id, &data_hash, &summary)
                                .await
                        {
                            warn!(error = %err, "failed to store summary");
                        }
                    }
                    print!(
                        "{}",
                        report::build_summary_report(&context, &location_id, &summary, false)
                    );
                }
                Err(err) => {
                    error!(error = %err, "AI summary failed");
                    println!("AI summary unavailable: {err}");
                }
            }
        }
    }

    Ok(())
}

fn write_or_print(out: Option<&Path>, body: &str) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(path, body)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Written to {}.", path.display());
        }
        None => print!("{body}"),
    }
    Ok(())
}
