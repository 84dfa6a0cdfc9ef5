use std::collections::BTreeMap;

use tracing::debug;

use crate::models::{ClientRecord, ComparisonPeriod, Metric, MonthKey, RowType};
use crate::normalize::{normalize, row_key, NormalizedClient};

/// Raw sums for one (row, month) bucket. Rates are derived on read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PivotCell {
    pub trials: u32,
    pub new_members: u32,
    pub converted: u32,
    pub retained: u32,
    pub total_ltv: f64,
    pub conversion_spans: Vec<f64>,
    pub visit_counts: Vec<u32>,
    /// Indices of the contributing records in the source slice.
    pub clients: Vec<usize>,
}

impl PivotCell {
    pub fn add(&mut self, client: &NormalizedClient) {
        self.trials += 1;
        if client.is_new {
            self.new_members += 1;
        }
        if client.converted {
            self.converted += 1;
        }
        if client.retained {
            self.retained += 1;
        }
        self.total_ltv += client.ltv;
        if let Some(span) = client.conversion_span {
            self.conversion_spans.push(span);
        }
        if let Some(visits) = client.visits_post_trial {
            self.visit_counts.push(visits);
        }
        self.clients.push(client.index);
    }

    pub fn merge(&mut self, other: &PivotCell) {
        self.trials += other.trials;
        self.new_members += other.new_members;
        self.converted += other.converted;
        self.retained += other.retained;
        self.total_ltv += other.total_ltv;
        self.conversion_spans
            .extend_from_slice(&other.conversion_spans);
        self.visit_counts.extend_from_slice(&other.visit_counts);
        self.clients.extend_from_slice(&other.clients);
    }

    pub fn avg_ltv(&self) -> f64 {
        if self.trials == 0 {
            0.0
        } else {
            self.total_ltv / self.trials as f64
        }
    }

    pub fn conversion_rate(&self) -> f64 {
        percentage(self.converted, self.new_members)
    }

    pub fn retention_rate(&self) -> f64 {
        percentage(self.retained, self.new_members)
    }

    pub fn avg_conversion_days(&self) -> f64 {
        mean(self.conversion_spans.iter().copied())
    }

    pub fn avg_visits(&self) -> f64 {
        mean(self.visit_counts.iter().map(|visits| *visits as f64))
    }

    pub fn value(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Trials => self.trials as f64,
            Metric::NewMembers => self.new_members as f64,
            Metric::Converted => self.converted as f64,
            Metric::Retained => self.retained as f64,
            Metric::ConversionRate => self.conversion_rate(),
            Metric::RetentionRate => self.retention_rate(),
            Metric::AvgLtv => self.avg_ltv(),
            Metric::TotalLtv => self.total_ltv,
            Metric::AvgConversionDays => self.avg_conversion_days(),
            Metric::AvgVisits => self.avg_visits(),
        }
    }
}

pub fn percentage(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

pub fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PivotRow {
    pub key: String,
    pub cells: BTreeMap<MonthKey, PivotCell>,
    /// One total per comparison year.
    pub totals: BTreeMap<i32, PivotCell>,
}

impl PivotRow {
    pub fn cell(&self, month: MonthKey) -> Option<&PivotCell> {
        self.cells.get(&month)
    }

    pub fn value(&self, month: MonthKey, metric: Metric) -> f64 {
        self.cell(month).map_or(0.0, |cell| cell.value(metric))
    }

    pub fn total_value(&self, year: i32, metric: Metric) -> f64 {
        self.totals.get(&year).map_or(0.0, |cell| cell.value(metric))
    }
}

/// Row key x month grid for the two comparison years.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotGrid {
    pub row_type: RowType,
    pub period: ComparisonPeriod,
    /// Default order: lexicographic, new-member segments first for client types.
    pub rows: Vec<PivotRow>,
    pub month_totals: BTreeMap<MonthKey, PivotCell>,
    pub grand_totals: BTreeMap<i32, PivotCell>,
    /// Records dropped because their first visit date did not parse.
    pub unparsed: usize,
    /// Records dated outside the comparison months.
    pub out_of_period: usize,
}

impl PivotGrid {
    pub fn build(records: &[ClientRecord], row_type: RowType, period: ComparisonPeriod) -> Self {
        let mut grouped: BTreeMap<String, BTreeMap<MonthKey, PivotCell>> = BTreeMap::new();
        let mut unparsed = 0usize;
        let mut out_of_period = 0usize;

        for (index, record) in records.iter().enumerate() {
            let client = normalize(index, record);
            let Some(month) = client.visit_month() else {
                unparsed += 1;
                continue;
            };
            if !period.contains(month) {
                out_of_period += 1;
                continue;
            }

            grouped
                .entry(row_key(record, row_type))
                .or_default()
                .entry(month)
                .or_default()
                .add(&client);
        }

        let empty_years = || -> BTreeMap<i32, PivotCell> {
            period
                .years()
                .into_iter()
                .map(|year| (year, PivotCell::default()))
                .collect()
        };

        let mut month_totals: BTreeMap<MonthKey, PivotCell> = period
            .month_keys()
            .into_iter()
            .map(|month| (month, PivotCell::default()))
            .collect();
        let mut grand_totals = empty_years();

        let mut rows: Vec<PivotRow> = grouped
            .into_iter()
            .map(|(key, cells)| {
                let mut totals = empty_years();
                for (month, cell) in &cells {
                    totals.entry(month.year).or_default().merge(cell);
                    month_totals.entry(*month).or_default().merge(cell);
                    grand_totals.entry(month.year).or_default().merge(cell);
                }
                PivotRow { key, cells, totals }
            })
            .collect();

        if row_type == RowType::ClientType {
            rows.sort_by_key(|row| !is_new_segment(&row.key));
        }

        debug!(
            rows = rows.len(),
            unparsed,
            out_of_period,
            "built {} pivot",
            row_type.label()
        );

        Self {
            row_type,
            period,
            rows,
            month_totals,
            grand_totals,
            unparsed,
            out_of_period,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn row(&self, key: &str) -> Option<&PivotRow> {
        self.rows.iter().find(|row| row.key == key)
    }

    pub fn month_total(&self, month: MonthKey, metric: Metric) -> f64 {
        self.month_totals
            .get(&month)
            .map_or(0.0, |cell| cell.value(metric))
    }

    pub fn grand_total(&self, year: i32, metric: Metric) -> f64 {
        self.grand_totals
            .get(&year)
            .map_or(0.0, |cell| cell.value(metric))
    }
}

fn is_new_segment(key: &str) -> bool {
    key.to_lowercase().contains("new")
}
