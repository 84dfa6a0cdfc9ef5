use std::str::FromStr;

use thiserror::Error;

use crate::export::TabularExport;
use crate::models::{Metric, MetricFormat, MONTH_NAMES};
use crate::pivot::{PivotGrid, PivotRow};

pub const TOTALS_LABEL: &str = "TOTALS";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum DisplayMode {
    /// Previous-year value next to the current-year value.
    #[default]
    Values,
    /// Year-on-year change for the same calendar month.
    Growth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortColumn {
    Label,
    Month(u32),
    Total,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown sort column {0:?}; expected label, total, a month name or 1-12")]
pub struct SortColumnError(String);

impl FromStr for SortColumn {
    type Err = SortColumnError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let value = raw.trim().to_lowercase();
        match value.as_str() {
            "label" | "name" => return Ok(SortColumn::Label),
            "total" => return Ok(SortColumn::Total),
            _ => {}
        }

        if let Ok(month) = value.parse::<u32>() {
            if (1..=12).contains(&month) {
                return Ok(SortColumn::Month(month));
            }
        }

        value
            .get(..3)
            .and_then(|prefix| {
                MONTH_NAMES
                    .iter()
                    .position(|name| name.eq_ignore_ascii_case(prefix))
            })
            .map(|index| SortColumn::Month(index as u32 + 1))
            .ok_or_else(|| SortColumnError(raw.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortDirection {
    #[value(name = "asc")]
    Ascending,
    #[value(name = "desc")]
    Descending,
}

impl SortDirection {
    pub fn toggled(self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortState {
    pub column: SortColumn,
    pub direction: SortDirection,
}

impl SortState {
    /// Labels start A to Z, metric columns start highest first.
    pub fn new(column: SortColumn) -> Self {
        let direction = match column {
            SortColumn::Label => SortDirection::Ascending,
            SortColumn::Month(_) | SortColumn::Total => SortDirection::Descending,
        };
        Self { column, direction }
    }
}

/// Year-on-year change in percent. Zero when there is no previous value.
pub fn growth(previous: f64, current: f64) -> f64 {
    if previous == 0.0 {
        return 0.0;
    }
    let change = (current - previous) / previous * 100.0;
    if change.is_finite() {
        change
    } else {
        0.0
    }
}

pub fn format_value(metric: Metric, value: f64) -> String {
    match metric.format() {
        MetricFormat::Count => group_thousands(value.round() as i64),
        MetricFormat::Percent => format!("{value:.1}%"),
        MetricFormat::Currency => format!("₹{}", group_thousands(value.round() as i64)),
        MetricFormat::Days => format!("{} days", value.round() as i64),
        MetricFormat::Decimal => format!("{value:.1}"),
    }
}

pub fn format_growth(change: f64) -> String {
    if change > 0.0 {
        format!("▲ {change:.1}%")
    } else if change < 0.0 {
        format!("▼ {:.1}%", change.abs())
    } else {
        "• 0.0%".to_string()
    }
}

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (position, digit) in digits.chars().enumerate() {
        if position > 0 && (digits.len() - position) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if value < 0 {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// The single-metric table a user is looking at: one metric, one display
/// mode, an optional column sort.
#[derive(Debug, Clone)]
pub struct PivotView<'g> {
    grid: &'g PivotGrid,
    metric: Metric,
    mode: DisplayMode,
    sort: Option<SortState>,
}

impl<'g> PivotView<'g> {
    pub fn new(grid: &'g PivotGrid, metric: Metric) -> Self {
        Self {
            grid,
            metric,
            mode: DisplayMode::default(),
            sort: None,
        }
    }

    pub fn with_mode(mut self, mode: DisplayMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn sort(&self) -> Option<SortState> {
        self.sort
    }

    /// Header click: the same column flips direction, a new column starts
    /// from its default direction.
    pub fn click(&mut self, column: SortColumn) {
        self.sort = Some(match self.sort {
            Some(state) if state.column == column => SortState {
                column,
                direction: state.direction.toggled(),
            },
            _ => SortState::new(column),
        });
    }

    /// Sort by `column`, in `direction` when given and the column's default
    /// direction otherwise.
    pub fn sort_by(&mut self, column: SortColumn, direction: Option<SortDirection>) {
        self.click(column);
        let requested = direction.unwrap_or(SortState::new(column).direction);
        if self.sort.is_some_and(|state| state.direction != requested) {
            self.click(column);
        }
    }

    /// Rows in display order.
    pub fn sorted_rows(&self) -> Vec<&'g PivotRow> {
        let mut rows: Vec<&'g PivotRow> = self.grid.rows.iter().collect();
        let Some(sort) = self.sort else {
            return rows;
        };

        rows.sort_by(|a, b| {
            let ordering = match sort.column {
                SortColumn::Label => a.key.cmp(&b.key),
                column => self
                    .sort_value(a, column)
                    .total_cmp(&self.sort_value(b, column)),
            };
            match sort.direction {
                SortDirection::Ascending => ordering,
                SortDirection::Descending => ordering.reverse(),
            }
        });
        rows
    }

    fn month_pair(&self, row: &PivotRow, month: u32) -> (f64, f64) {
        let period = self.grid.period;
        (
            row.value(period.previous(month), self.metric),
            row.value(period.current_key(month), self.metric),
        )
    }

    fn total_pair(&self, row: &PivotRow) -> (f64, f64) {
        let period = self.grid.period;
        (
            row.total_value(period.previous_year, self.metric),
            row.total_value(period.current_year, self.metric),
        )
    }

    fn sort_value(&self, row: &PivotRow, column: SortColumn) -> f64 {
        let (previous, current) = match column {
            SortColumn::Label => return 0.0,
            SortColumn::Month(month) => self.month_pair(row, month),
            SortColumn::Total => self.total_pair(row),
        };
        match self.mode {
            DisplayMode::Values => current,
            DisplayMode::Growth => growth(previous, current),
        }
    }

    /// Display lines for one cell: two stacked values, or one growth figure.
    pub fn cell_lines(&self, previous: f64, current: f64) -> Vec<String> {
        match self.mode {
            DisplayMode::Values => vec![
                format_value(self.metric, previous),
                format_value(self.metric, current),
            ],
            DisplayMode::Growth => vec![format_growth(growth(previous, current))],
        }
    }

    fn cell_text(&self, (previous, current): (f64, f64)) -> String {
        self.cell_lines(previous, current).join(" / ")
    }
}

impl TabularExport for PivotView<'_> {
    fn headers(&self) -> Vec<String> {
        std::iter::once(self.grid.row_type.label().to_string())
            .chain(
                self.grid
                    .period
                    .months()
                    .map(|month| MONTH_NAMES[month as usize - 1].to_string()),
            )
            .chain(std::iter::once("Total".to_string()))
            .collect()
    }

    fn rows(&self) -> Vec<Vec<String>> {
        let period = self.grid.period;
        let mut lines: Vec<Vec<String>> = self
            .sorted_rows()
            .into_iter()
            .map(|row| {
                std::iter::once(row.key.clone())
                    .chain(
                        period
                            .months()
                            .map(|month| self.cell_text(self.month_pair(row, month))),
                    )
                    .chain(std::iter::once(self.cell_text(self.total_pair(row))))
                    .collect()
            })
            .collect();

        let totals = std::iter::once(TOTALS_LABEL.to_string())
            .chain(period.months().map(|month| {
                self.cell_text((
                    self.grid.month_total(period.previous(month), self.metric),
                    self.grid.month_total(period.current_key(month), self.metric),
                ))
            }))
            .chain(std::iter::once(self.cell_text((
                self.grid.grand_total(period.previous_year, self.metric),
                self.grid.grand_total(period.current_year, self.metric),
            ))))
            .collect();
        lines.push(totals);
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClientRecord, ComparisonPeriod, RowType};
    use chrono::NaiveDate;

    fn memberships(entries: &[(&str, &str)], today: NaiveDate) -> PivotGrid {
        let records: Vec<ClientRecord> = entries
            .iter()
            .map(|(membership, date)| ClientRecord {
                membership_used: Some(membership.to_string()),
                first_visit_date: Some(date.to_string()),
                ..Default::default()
            })
            .collect();
        PivotGrid::build(
            &records,
            RowType::Membership,
            ComparisonPeriod::for_year(2025, today),
        )
    }

    fn january() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 31).unwrap()
    }

    fn keys(view: &PivotView<'_>) -> Vec<String> {
        view.sorted_rows()
            .into_iter()
            .map(|row| row.key.clone())
            .collect()
    }

    #[test]
    fn growth_is_zero_without_a_previous_value() {
        assert_eq!(growth(0.0, 25.0), 0.0);
        assert_eq!(growth(0.0, 0.0), 0.0);
        assert_eq!(growth(4.0, 5.0), 25.0);
        assert_eq!(growth(4.0, 2.0), -50.0);
    }

    #[test]
    fn formats_each_metric_kind() {
        assert_eq!(format_value(Metric::Trials, 1234.0), "1,234");
        assert_eq!(format_value(Metric::ConversionRate, 66.666), "66.7%");
        assert_eq!(format_value(Metric::AvgLtv, 1234567.4), "₹1,234,567");
        assert_eq!(format_value(Metric::AvgConversionDays, 12.4), "12 days");
        assert_eq!(format_value(Metric::AvgVisits, 3.26), "3.3");
        assert_eq!(format_growth(12.5), "▲ 12.5%");
        assert_eq!(format_growth(-3.0), "▼ 3.0%");
        assert_eq!(format_growth(0.0), "• 0.0%");
    }

    #[test]
    fn parses_sort_columns() {
        assert_eq!("label".parse::<SortColumn>(), Ok(SortColumn::Label));
        assert_eq!("Total".parse::<SortColumn>(), Ok(SortColumn::Total));
        assert_eq!("march".parse::<SortColumn>(), Ok(SortColumn::Month(3)));
        assert_eq!("12".parse::<SortColumn>(), Ok(SortColumn::Month(12)));
        assert!("13".parse::<SortColumn>().is_err());
        assert!("someday".parse::<SortColumn>().is_err());
    }

    #[test]
    fn month_click_sorts_descending_then_toggles() {
        let grid = memberships(
            &[
                ("Alpha", "2025-01-10"),
                ("Beta", "2025-01-10"),
                ("Beta", "2025-01-11"),
                ("Beta", "2025-01-12"),
                ("Gamma", "2025-01-10"),
                ("Gamma", "2025-01-11"),
            ],
            january(),
        );
        let mut view = PivotView::new(&grid, Metric::Trials);
        assert_eq!(keys(&view), vec!["Alpha", "Beta", "Gamma"]);

        view.click(SortColumn::Month(1));
        assert_eq!(keys(&view), vec!["Beta", "Gamma", "Alpha"]);
        view.click(SortColumn::Month(1));
        assert_eq!(keys(&view), vec!["Alpha", "Gamma", "Beta"]);

        view.click(SortColumn::Label);
        assert_eq!(
            view.sort(),
            Some(SortState {
                column: SortColumn::Label,
                direction: SortDirection::Ascending
            })
        );
        assert_eq!(keys(&view), vec!["Alpha", "Beta", "Gamma"]);
        view.click(SortColumn::Label);
        assert_eq!(keys(&view), vec!["Gamma", "Beta", "Alpha"]);
    }

    #[test]
    fn sort_by_uses_the_column_default_unless_told_otherwise() {
        let grid = memberships(
            &[
                ("Gamma", "2025-01-10"),
                ("Alpha", "2025-01-10"),
                ("Alpha", "2025-01-11"),
                ("Beta", "2025-01-10"),
                ("Beta", "2025-01-11"),
                ("Beta", "2025-01-12"),
            ],
            january(),
        );

        let mut view = PivotView::new(&grid, Metric::Trials);
        view.sort_by(SortColumn::Label, None);
        assert_eq!(keys(&view), vec!["Alpha", "Beta", "Gamma"]);
        view.sort_by(SortColumn::Label, Some(SortDirection::Descending));
        assert_eq!(keys(&view), vec!["Gamma", "Beta", "Alpha"]);

        let mut view = PivotView::new(&grid, Metric::Trials);
        view.sort_by(SortColumn::Month(1), None);
        assert_eq!(keys(&view), vec!["Beta", "Alpha", "Gamma"]);
        view.sort_by(SortColumn::Month(1), Some(SortDirection::Ascending));
        assert_eq!(keys(&view), vec!["Gamma", "Alpha", "Beta"]);
        assert_eq!(
            view.sort().map(|state| state.direction),
            Some(SortDirection::Ascending)
        );

        let mut view = PivotView::new(&grid, Metric::Trials);
        view.sort_by(SortColumn::Total, Some(SortDirection::Descending));
        assert_eq!(keys(&view), vec!["Beta", "Alpha", "Gamma"]);
    }

    #[test]
    fn growth_mode_sorts_by_change() {
        let grid = memberships(
            &[
                ("Flat", "2024-01-10"),
                ("Flat", "2025-01-10"),
                ("Up", "2024-01-10"),
                ("Up", "2025-01-10"),
                ("Up", "2025-01-11"),
                ("Fresh", "2025-01-10"),
            ],
            january(),
        );
        let mut view = PivotView::new(&grid, Metric::Trials).with_mode(DisplayMode::Growth);
        view.click(SortColumn::Month(1));
        assert_eq!(keys(&view), vec!["Up", "Flat", "Fresh"]);
        assert_eq!(view.cell_lines(0.0, 1.0), vec!["• 0.0%".to_string()]);
    }

    #[test]
    fn tabular_rows_end_with_totals() {
        let grid = memberships(
            &[("Unlimited", "2024-02-01"), ("Unlimited", "2025-02-01")],
            NaiveDate::from_ymd_opt(2025, 2, 20).unwrap(),
        );
        let view = PivotView::new(&grid, Metric::Trials);

        assert_eq!(view.headers(), vec!["Membership", "Jan", "Feb", "Total"]);
        let rows = TabularExport::rows(&view);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec!["Unlimited", "0 / 0", "1 / 1", "1 / 1"]);
        assert_eq!(rows[1][0], TOTALS_LABEL);
    }
}
