use std::fmt;
use std::fs::File;
use std::io;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ClientRecord, Metric, MonthKey, RowType};
use crate::normalize::{normalize, status_matches};
use crate::pivot::{mean, percentage, PivotCell, PivotGrid};
use crate::view::TOTALS_LABEL;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrillDownKind {
    Month,
    Year,
    Class,
    Membership,
    Metric,
    Ranking,
}

impl fmt::Display for DrillDownKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DrillDownKind::Month => "month",
            DrillDownKind::Year => "year",
            DrillDownKind::Class => "class",
            DrillDownKind::Membership => "membership",
            DrillDownKind::Metric => "metric",
            DrillDownKind::Ranking => "ranking",
        };
        f.write_str(name)
    }
}

/// Scope of a row-shaped drill-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowScope {
    Month,
    Year,
    Class,
    Membership,
}

impl From<RowScope> for DrillDownKind {
    fn from(scope: RowScope) -> Self {
        match scope {
            RowScope::Month => DrillDownKind::Month,
            RowScope::Year => DrillDownKind::Year,
            RowScope::Class => DrillDownKind::Class,
            RowScope::Membership => DrillDownKind::Membership,
        }
    }
}

/// What a drill-down modal is opened with. The `payload` tag names the
/// shape, so the client list is always found in one known place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "payload", rename_all = "snake_case")]
pub enum DrillDownPayload {
    Ranking {
        label: String,
        clients: Vec<ClientRecord>,
    },
    Metric {
        metric: Metric,
        related_clients: Vec<ClientRecord>,
    },
    Row {
        scope: RowScope,
        label: String,
        clients: Vec<ClientRecord>,
    },
    Raw {
        kind: DrillDownKind,
        clients: Vec<ClientRecord>,
    },
}

impl DrillDownPayload {
    pub fn kind(&self) -> DrillDownKind {
        match self {
            DrillDownPayload::Ranking { .. } => DrillDownKind::Ranking,
            DrillDownPayload::Metric { .. } => DrillDownKind::Metric,
            DrillDownPayload::Row { scope, .. } => (*scope).into(),
            DrillDownPayload::Raw { kind, .. } => *kind,
        }
    }

    pub fn clients(&self) -> &[ClientRecord] {
        match self {
            DrillDownPayload::Ranking { clients, .. }
            | DrillDownPayload::Row { clients, .. }
            | DrillDownPayload::Raw { clients, .. } => clients,
            DrillDownPayload::Metric {
                related_clients, ..
            } => related_clients,
        }
    }

    pub fn title(&self) -> String {
        match self {
            DrillDownPayload::Ranking { label, .. } | DrillDownPayload::Row { label, .. } => {
                label.clone()
            }
            DrillDownPayload::Metric { metric, .. } => metric.label().to_string(),
            DrillDownPayload::Raw { .. } => "Clients".to_string(),
        }
    }

    pub fn summarize(&self) -> DrillDownSummary {
        DrillDownSummary::from_clients(self.clients())
    }
}

/// Load a drill-down payload saved as JSON.
pub fn load_payload(path: &Path) -> anyhow::Result<DrillDownPayload> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    read_payload(file)
        .with_context(|| format!("invalid drill-down payload in {}", path.display()))
}

pub fn read_payload<R: io::Read>(input: R) -> serde_json::Result<DrillDownPayload> {
    serde_json::from_reader(input)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrillDownSummary {
    pub total: usize,
    pub new_members: usize,
    pub converted: usize,
    pub retained: usize,
    /// Status matches regardless of client type.
    pub marked_converted: usize,
    pub marked_retained: usize,
    /// Percent of new members, like the pivot cells.
    pub conversion_rate: f64,
    pub retention_rate: f64,
    pub avg_ltv: f64,
    pub total_ltv: f64,
    /// Mean over clients with a positive conversion span.
    pub avg_conversion_days: f64,
}

impl DrillDownSummary {
    pub fn from_clients(clients: &[ClientRecord]) -> Self {
        let normalized: Vec<_> = clients
            .iter()
            .enumerate()
            .map(|(index, record)| normalize(index, record))
            .collect();

        let total = normalized.len();
        let new_members = normalized.iter().filter(|client| client.is_new).count();
        let converted = normalized.iter().filter(|client| client.converted).count();
        let retained = normalized.iter().filter(|client| client.retained).count();
        let total_ltv: f64 = normalized.iter().map(|client| client.ltv).sum();
        let marked_converted = clients
            .iter()
            .filter(|record| status_matches(record.conversion_status.as_deref(), "Converted"))
            .count();
        let marked_retained = clients
            .iter()
            .filter(|record| status_matches(record.retention_status.as_deref(), "Retained"))
            .count();

        Self {
            total,
            new_members,
            converted,
            retained,
            marked_converted,
            marked_retained,
            conversion_rate: percentage(converted as u32, new_members as u32),
            retention_rate: percentage(retained as u32, new_members as u32),
            avg_ltv: if total == 0 {
                0.0
            } else {
                total_ltv / total as f64
            },
            total_ltv,
            avg_conversion_days: mean(
                normalized
                    .iter()
                    .filter_map(|client| client.conversion_span)
                    .filter(|span| *span > 0.0),
            ),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrillDownError {
    #[error("no pivot row named {0:?}")]
    UnknownRow(String),
    #[error("{0} is outside the comparison period")]
    OutOfPeriod(String),
}

/// A drillable pivot column: one month, or a year's Total column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellColumn {
    Month(MonthKey),
    Year(i32),
}

impl CellColumn {
    pub fn label(&self) -> String {
        match self {
            CellColumn::Month(month) => month.label(),
            CellColumn::Year(year) => format!("Total {year}"),
        }
    }
}

/// Resolve one pivot cell back to the records that fed it. `TOTALS` selects
/// the totals row.
pub fn payload_for_cell(
    grid: &PivotGrid,
    records: &[ClientRecord],
    row_key: &str,
    column: CellColumn,
) -> Result<DrillDownPayload, DrillDownError> {
    let in_period = match column {
        CellColumn::Month(month) => grid.period.contains(month),
        CellColumn::Year(year) => grid.period.years().contains(&year),
    };
    if !in_period {
        return Err(DrillDownError::OutOfPeriod(column.label()));
    }

    let (label, cell) = if row_key == TOTALS_LABEL {
        let cell = match column {
            CellColumn::Month(month) => grid.month_totals.get(&month),
            CellColumn::Year(year) => grid.grand_totals.get(&year),
        };
        (TOTALS_LABEL, cell)
    } else {
        let row = grid
            .row(row_key)
            .ok_or_else(|| DrillDownError::UnknownRow(row_key.to_string()))?;
        let cell = match column {
            CellColumn::Month(month) => row.cell(month),
            CellColumn::Year(year) => row.totals.get(&year),
        };
        (row.key.as_str(), cell)
    };

    let scope = match (column, grid.row_type) {
        (CellColumn::Year(_), _) => RowScope::Year,
        (CellColumn::Month(_), RowType::Membership) => RowScope::Membership,
        (CellColumn::Month(_), _) => RowScope::Month,
    };

    Ok(DrillDownPayload::Row {
        scope,
        label: format!("{label} · {}", column.label()),
        clients: contributing(cell, records),
    })
}

/// Every client behind a metric's headline figure for `year`.
pub fn payload_for_metric(
    grid: &PivotGrid,
    records: &[ClientRecord],
    metric: Metric,
    year: i32,
) -> Result<DrillDownPayload, DrillDownError> {
    if !grid.period.years().contains(&year) {
        return Err(DrillDownError::OutOfPeriod(year.to_string()));
    }
    Ok(DrillDownPayload::Metric {
        metric,
        related_clients: contributing(grid.grand_totals.get(&year), records),
    })
}

fn contributing(cell: Option<&PivotCell>, records: &[ClientRecord]) -> Vec<ClientRecord> {
    cell.map(|cell| {
        cell.clients
            .iter()
            .filter_map(|index| records.get(*index).cloned())
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ComparisonPeriod;
    use chrono::NaiveDate;

    fn client(is_new: &str, conversion: &str, ltv: f64, span: Option<f64>) -> ClientRecord {
        ClientRecord {
            first_name: Some("Ria".to_string()),
            is_new: Some(is_new.to_string()),
            conversion_status: Some(conversion.to_string()),
            first_visit_date: Some("2025-03-03".to_string()),
            ltv: Some(ltv),
            conversion_span: span,
            ..Default::default()
        }
    }

    #[test]
    fn summary_uses_new_members_as_the_rate_base() {
        let clients = vec![
            client("New", "Converted", 1000.0, Some(12.0)),
            client("New", "", 500.0, Some(0.0)),
            client("Existing", "Converted", 300.0, Some(4.0)),
            client("New", "Converted", 200.0, None),
        ];
        let summary = DrillDownSummary::from_clients(&clients);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.new_members, 3);
        assert_eq!(summary.converted, 2);
        assert_eq!(summary.marked_converted, 3);
        assert_eq!(summary.marked_retained, 0);
        assert!((summary.conversion_rate - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.retention_rate, 0.0);
        assert_eq!(summary.total_ltv, 2000.0);
        assert_eq!(summary.avg_ltv, 500.0);
        assert_eq!(summary.avg_conversion_days, 8.0);
    }

    #[test]
    fn empty_subset_summarizes_to_zero() {
        assert_eq!(DrillDownSummary::from_clients(&[]), DrillDownSummary::default());
    }

    #[test]
    fn payload_tag_selects_the_client_list() {
        let json = r#"{
            "payload": "metric",
            "metric": "conversionRate",
            "related_clients": [{"firstName": "Ria", "isNew": "New"}]
        }"#;
        let payload: DrillDownPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.kind(), DrillDownKind::Metric);
        assert_eq!(payload.clients().len(), 1);
        assert_eq!(payload.title(), "Conversion Rate");

        let raw: DrillDownPayload =
            serde_json::from_str(r#"{"payload": "raw", "kind": "class", "clients": []}"#).unwrap();
        assert_eq!(raw.kind(), DrillDownKind::Class);
        assert!(raw.clients().is_empty());
    }

    fn month(year: i32, month: u32) -> CellColumn {
        CellColumn::Month(MonthKey::new(year, month).unwrap())
    }

    fn march_grid(records: &[ClientRecord]) -> PivotGrid {
        let period =
            ComparisonPeriod::for_year(2025, NaiveDate::from_ymd_opt(2025, 3, 31).unwrap());
        PivotGrid::build(records, RowType::ClientType, period)
    }

    fn mixed_records() -> Vec<ClientRecord> {
        vec![
            client("New", "Converted", 100.0, None),
            client("Existing", "", 50.0, None),
            ClientRecord {
                is_new: Some("New".to_string()),
                first_visit_date: Some("2025-02-01".to_string()),
                ..Default::default()
            },
            ClientRecord {
                is_new: Some("New".to_string()),
                first_visit_date: Some("2024-03-09".to_string()),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn saved_ranking_payload_reads_from_json() {
        let json = r#"{
            "payload": "ranking",
            "label": "Top trainers",
            "clients": [
                {"firstName": "Ria", "isNew": "New", "conversionStatus": "Converted"},
                {"firstName": "Dev", "isNew": "New"}
            ]
        }"#;
        let payload = read_payload(json.as_bytes()).unwrap();
        assert_eq!(payload.kind(), DrillDownKind::Ranking);
        assert_eq!(payload.title(), "Top trainers");
        assert_eq!(payload.summarize().conversion_rate, 50.0);

        assert!(read_payload(r#"{"payload": "unknown"}"#.as_bytes()).is_err());
    }

    #[test]
    fn cell_payload_carries_the_contributing_records() {
        let records = mixed_records();
        let grid = march_grid(&records);
        let march = month(2025, 3);

        let payload = payload_for_cell(&grid, &records, "New", march).unwrap();
        assert_eq!(payload.kind(), DrillDownKind::Month);
        assert_eq!(payload.title(), "New · Mar 2025");
        assert_eq!(payload.clients(), &records[..1]);
        assert_eq!(payload.summarize().conversion_rate, 100.0);

        let january = month(2024, 1);
        let empty = payload_for_cell(&grid, &records, "Existing", january).unwrap();
        assert!(empty.clients().is_empty());

        assert_eq!(
            payload_for_cell(&grid, &records, "Lapsed", march),
            Err(DrillDownError::UnknownRow("Lapsed".to_string()))
        );
        let april = month(2025, 4);
        assert_eq!(
            payload_for_cell(&grid, &records, "New", april),
            Err(DrillDownError::OutOfPeriod("Apr 2025".to_string()))
        );
    }

    #[test]
    fn year_column_resolves_the_row_total() {
        let records = mixed_records();
        let grid = march_grid(&records);

        let payload = payload_for_cell(&grid, &records, "New", CellColumn::Year(2025)).unwrap();
        assert_eq!(payload.kind(), DrillDownKind::Year);
        assert_eq!(payload.title(), "New · Total 2025");
        assert_eq!(payload.clients(), &[records[2].clone(), records[0].clone()]);

        let previous = payload_for_cell(&grid, &records, "New", CellColumn::Year(2024)).unwrap();
        assert_eq!(previous.clients(), &records[3..]);

        assert_eq!(
            payload_for_cell(&grid, &records, "New", CellColumn::Year(2023)),
            Err(DrillDownError::OutOfPeriod("Total 2023".to_string()))
        );
    }

    #[test]
    fn totals_row_spans_every_row() {
        let records = mixed_records();
        let grid = march_grid(&records);
        let march = month(2025, 3);

        let month = payload_for_cell(&grid, &records, TOTALS_LABEL, march).unwrap();
        assert_eq!(month.title(), "TOTALS · Mar 2025");
        assert_eq!(month.clients().len(), 2);
        assert_eq!(month.summarize().new_members, 1);

        let year = payload_for_cell(&grid, &records, TOTALS_LABEL, CellColumn::Year(2025)).unwrap();
        assert_eq!(year.kind(), DrillDownKind::Year);
        assert_eq!(year.clients().len(), 3);
    }

    #[test]
    fn metric_payload_lists_the_year_clients() {
        let records = mixed_records();
        let grid = march_grid(&records);

        let payload = payload_for_metric(&grid, &records, Metric::ConversionRate, 2025).unwrap();
        assert_eq!(payload.kind(), DrillDownKind::Metric);
        assert_eq!(payload.title(), "Conversion Rate");
        assert_eq!(payload.clients().len(), 3);
        assert_eq!(
            payload_for_metric(&grid, &records, Metric::Trials, 2022),
            Err(DrillDownError::OutOfPeriod("2022".to_string()))
        );
    }
}
