use std::collections::BTreeMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{ComparisonPeriod, Metric, MonthKey, RowType};
use crate::pivot::{PivotCell, PivotGrid};
use crate::view::{format_value, TOTALS_LABEL};

/// Anything that can be copied out as a plain table.
pub trait TabularExport {
    fn headers(&self) -> Vec<String>;

    fn rows(&self) -> Vec<Vec<String>>;

    fn to_tsv(&self) -> String {
        let mut output = String::new();
        push_tsv_line(&mut output, &self.headers());
        for row in self.rows() {
            push_tsv_line(&mut output, &row);
        }
        output
    }
}

fn push_tsv_line(output: &mut String, cells: &[String]) {
    let line = cells
        .iter()
        .map(|cell| cell.replace(['\t', '\n', '\r'], " "))
        .collect::<Vec<_>>()
        .join("\t");
    let _ = writeln!(output, "{line}");
}

/// One metric across every row, both comparison years side by side.
pub struct MetricSection<'g> {
    grid: &'g PivotGrid,
    metric: Metric,
}

impl<'g> MetricSection<'g> {
    pub fn new(grid: &'g PivotGrid, metric: Metric) -> Self {
        Self { grid, metric }
    }

    fn paired_values(
        &self,
        label: String,
        month_value: impl Fn(MonthKey) -> f64,
        year_value: impl Fn(i32) -> f64,
    ) -> Vec<String> {
        let period = self.grid.period;
        let mut cells = vec![label];
        for month in period.months() {
            cells.push(format_value(self.metric, month_value(period.previous(month))));
            cells.push(format_value(self.metric, month_value(period.current_key(month))));
        }
        for year in period.years() {
            cells.push(format_value(self.metric, year_value(year)));
        }
        cells
    }
}

impl TabularExport for MetricSection<'_> {
    fn headers(&self) -> Vec<String> {
        let period = self.grid.period;
        let mut headers = vec![self.grid.row_type.label().to_string()];
        for month in period.months() {
            headers.push(period.previous(month).label());
            headers.push(period.current_key(month).label());
        }
        for year in period.years() {
            headers.push(format!("Total {year}"));
        }
        headers
    }

    fn rows(&self) -> Vec<Vec<String>> {
        let metric = self.metric;
        let mut rows: Vec<Vec<String>> = self
            .grid
            .rows
            .iter()
            .map(|row| {
                self.paired_values(
                    row.key.clone(),
                    |month| row.value(month, metric),
                    |year| row.total_value(year, metric),
                )
            })
            .collect();
        rows.push(self.paired_values(
            TOTALS_LABEL.to_string(),
            |month| self.grid.month_total(month, metric),
            |year| self.grid.grand_total(year, metric),
        ));
        rows
    }
}

/// Every metric as its own tab-separated block: title, header, dashes,
/// one line per row key, then the totals line.
pub fn export_all_metrics(grid: &PivotGrid) -> String {
    let mut output = String::new();

    for (position, metric) in Metric::ALL.into_iter().enumerate() {
        if position > 0 {
            let _ = writeln!(output);
        }
        let section = MetricSection::new(grid, metric);
        let headers = section.headers();
        let dashes: Vec<String> = headers
            .iter()
            .map(|header| "-".repeat(header.chars().count().max(3)))
            .collect();

        let _ = writeln!(output, "{}", metric.label());
        push_tsv_line(&mut output, &headers);
        push_tsv_line(&mut output, &dashes);
        for row in section.rows() {
            push_tsv_line(&mut output, &row);
        }
    }

    output
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ExportFormat {
    Tsv,
    Json,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Tsv => "tsv",
            ExportFormat::Json => "json",
        }
    }
}

pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "report".to_string()
    } else {
        slug.to_string()
    }
}

pub fn default_file_name(title: &str, format: ExportFormat) -> String {
    format!("{}-pivot.{}", slugify(title), format.extension())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellSnapshot {
    pub trials: u32,
    pub new_members: u32,
    pub converted: u32,
    pub retained: u32,
    pub total_ltv: f64,
    pub avg_ltv: f64,
    pub conversion_rate: f64,
    pub retention_rate: f64,
    pub avg_conversion_days: f64,
    pub avg_visits: f64,
}

impl From<&PivotCell> for CellSnapshot {
    fn from(cell: &PivotCell) -> Self {
        Self {
            trials: cell.trials,
            new_members: cell.new_members,
            converted: cell.converted,
            retained: cell.retained,
            total_ltv: cell.total_ltv,
            avg_ltv: cell.avg_ltv(),
            conversion_rate: cell.conversion_rate(),
            retention_rate: cell.retention_rate(),
            avg_conversion_days: cell.avg_conversion_days(),
            avg_visits: cell.avg_visits(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowExport {
    pub key: String,
    pub cells: BTreeMap<MonthKey, CellSnapshot>,
    pub totals: BTreeMap<i32, CellSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridExport {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub row_type: RowType,
    pub period: ComparisonPeriod,
    pub rows: Vec<RowExport>,
    pub month_totals: BTreeMap<MonthKey, CellSnapshot>,
    pub grand_totals: BTreeMap<i32, CellSnapshot>,
    pub unparsed_records: usize,
    pub out_of_period_records: usize,
}

impl GridExport {
    pub fn new(title: &str, grid: &PivotGrid) -> Self {
        fn snapshots<K: Ord + Copy>(cells: &BTreeMap<K, PivotCell>) -> BTreeMap<K, CellSnapshot> {
            cells
                .iter()
                .map(|(key, cell)| (*key, CellSnapshot::from(cell)))
                .collect()
        }

        Self {
            title: title.to_string(),
            generated_at: Utc::now(),
            row_type: grid.row_type,
            period: grid.period,
            rows: grid
                .rows
                .iter()
                .map(|row| RowExport {
                    key: row.key.clone(),
                    cells: snapshots(&row.cells),
                    totals: snapshots(&row.totals),
                })
                .collect(),
            month_totals: snapshots(&grid.month_totals),
            grand_totals: snapshots(&grid.grand_totals),
            unparsed_records: grid.unparsed,
            out_of_period_records: grid.out_of_period,
        }
    }
}

pub fn export_json(title: &str, grid: &PivotGrid) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&GridExport::new(title, grid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ClientRecord;
    use chrono::NaiveDate;

    fn grid() -> PivotGrid {
        let client = |is_new: &str, date: &str, ltv: f64| ClientRecord {
            is_new: Some(is_new.to_string()),
            first_visit_date: Some(date.to_string()),
            conversion_status: Some("Converted".to_string()),
            ltv: Some(ltv),
            ..Default::default()
        };
        let records = vec![
            client("New", "2025-01-04", 1200.0),
            client("New", "2024-02-04", 800.0),
            client("Existing", "2025-02-14", 300.0),
        ];
        let period =
            ComparisonPeriod::for_year(2025, NaiveDate::from_ymd_opt(2025, 2, 28).unwrap());
        PivotGrid::build(&records, RowType::ClientType, period)
    }

    #[test]
    fn all_metric_export_splits_back_into_the_grid_shape() {
        let grid = grid();
        let export = export_all_metrics(&grid);
        let sections: Vec<&str> = export.split("\n\n").collect();
        assert_eq!(sections.len(), Metric::ALL.len());

        let expected_headers = MetricSection::new(&grid, Metric::Trials).headers();
        for (section, metric) in sections.iter().zip(Metric::ALL) {
            let lines: Vec<&str> = section.trim_end_matches('\n').split('\n').collect();
            assert_eq!(lines[0], metric.label());
            let headers: Vec<&str> = lines[1].split('\t').collect();
            assert_eq!(headers, expected_headers);
            assert!(lines[2].split('\t').all(|cell| cell.chars().all(|c| c == '-')));
            // title, header, dashes, one line per row, totals
            assert_eq!(lines.len(), grid.rows.len() + 4);
            assert!(lines.last().unwrap().starts_with(TOTALS_LABEL));
            for line in &lines[1..] {
                assert_eq!(line.split('\t').count(), expected_headers.len());
            }
        }
    }

    #[test]
    fn section_headers_pair_years_per_month() {
        let grid = grid();
        let headers = MetricSection::new(&grid, Metric::Trials).headers();
        assert_eq!(
            headers,
            vec![
                "Client Type",
                "Jan 2024",
                "Jan 2025",
                "Feb 2024",
                "Feb 2025",
                "Total 2024",
                "Total 2025"
            ]
        );
        let rows = MetricSection::new(&grid, Metric::TotalLtv).rows();
        assert_eq!(rows[0], vec!["New", "₹0", "₹1,200", "₹800", "₹0", "₹800", "₹1,200"]);
        assert_eq!(rows[2][0], TOTALS_LABEL);
        assert_eq!(rows[2][6], "₹1,500");
    }

    #[test]
    fn tsv_cells_never_carry_separators() {
        struct Notes;
        impl TabularExport for Notes {
            fn headers(&self) -> Vec<String> {
                vec!["Note".to_string()]
            }
            fn rows(&self) -> Vec<Vec<String>> {
                vec![vec!["line one\nline\ttwo".to_string()]]
            }
        }
        assert_eq!(Notes.to_tsv(), "Note\nline one line two\n");
    }

    #[test]
    fn json_export_uses_month_keys() {
        let json = export_json("Kwality House", &grid()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["rowType"], "clientType");
        assert_eq!(value["rows"][0]["cells"]["2025-01"]["trials"], 1);
        assert_eq!(value["grandTotals"]["2025"]["conversionRate"], 100.0);
        assert!(json.contains("\n  \"title\": \"Kwality House\""));
    }

    #[test]
    fn file_names_are_slugged() {
        assert_eq!(slugify("Kwality House: Retention!"), "kwality-house-retention");
        assert_eq!(slugify("  "), "report");
        assert_eq!(
            default_file_name("Client Retention", ExportFormat::Json),
            "client-retention-pivot.json"
        );
    }
}
