// 📊 Growth Calculator - QoQ, YoY and rolling averages
//
// QoQ compares against the previous ROW (position), YoY against the row
// labelled one calendar year earlier. Missing previous values and zero
// denominators give null, never an error.

use crate::error::{PipelineError, Result};
use crate::period::{Frequency, PeriodKey};
use crate::registry::MetricDefinition;
use crate::stats::{mean_of_present, pct_change};
use crate::table::UnifiedTable;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

pub const DEFAULT_MOVING_AVERAGE_WINDOW: usize = 3;

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthRecord {
    pub period_key: PeriodKey,
    pub period_label: String,
    pub metric_name: String,
    pub current_value: Option<f64>,
    pub previous_value: Option<f64>,
    pub pct_change: Option<f64>,
}

impl GrowthRecord {
    fn new(
        period_key: PeriodKey,
        period_label: String,
        metric_name: &str,
        current_value: Option<f64>,
        previous_value: Option<f64>,
    ) -> Self {
        GrowthRecord {
            period_key,
            period_label,
            metric_name: metric_name.to_string(),
            current_value,
            previous_value,
            pct_change: pct_change(current_value, previous_value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovingAverageRecord {
    pub period_key: PeriodKey,
    pub timestamp: NaiveDate,
    pub raw_value: Option<f64>,
    pub window_average: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrowthKind {
    QuarterOverQuarter,
    YearOverYear,
}

impl GrowthKind {
    /// Column suffix: `permits_qoq_pct`
    pub fn suffix(&self) -> &'static str {
        match self {
            GrowthKind::QuarterOverQuarter => "qoq",
            GrowthKind::YearOverYear => "yoy",
        }
    }

    pub fn frequency(&self) -> Frequency {
        match self {
            GrowthKind::QuarterOverQuarter => Frequency::Quarterly,
            GrowthKind::YearOverYear => Frequency::Yearly,
        }
    }
}

/// One metric in a growth table: source column and its short prefix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthColumn {
    pub metric: String,
    pub short_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthRow {
    pub period_key: PeriodKey,
    pub period_label: String,
    /// Same order as `GrowthTable::columns`
    pub records: Vec<GrowthRecord>,
}

/// Wide growth table: one row per period, one record per metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthTable {
    pub kind: GrowthKind,
    pub columns: Vec<GrowthColumn>,
    pub rows: Vec<GrowthRow>,
}

// ============================================================================
// CALCULATOR
// ============================================================================

pub struct GrowthCalculator;

impl GrowthCalculator {
    /// Quarter-over-quarter change of `metric` against the preceding row
    pub fn qoq(table: &UnifiedTable, metric: &str) -> Result<Vec<GrowthRecord>> {
        require_frequency(table, Frequency::Quarterly, "quarter-over-quarter growth")?;
        let values = table.column(metric)?;

        let records = table
            .rows()
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let previous = if i == 0 { None } else { values[i - 1] };
                GrowthRecord::new(row.period_key, row.period_label.clone(), metric, values[i], previous)
            })
            .collect();
        Ok(records)
    }

    /// Year-over-year change of `metric` against the row for year Y-1
    pub fn yoy(table: &UnifiedTable, metric: &str) -> Result<Vec<GrowthRecord>> {
        require_frequency(table, Frequency::Yearly, "year-over-year growth")?;
        let values = table.column(metric)?;

        let by_year: HashMap<i32, Option<f64>> = table
            .rows()
            .iter()
            .zip(values.iter())
            .map(|(row, value)| (row.period_key.year(), *value))
            .collect();

        let records = table
            .rows()
            .iter()
            .zip(values.iter())
            .map(|(row, current)| {
                let previous = by_year.get(&(row.period_key.year() - 1)).copied().flatten();
                GrowthRecord::new(row.period_key, row.period_label.clone(), metric, *current, previous)
            })
            .collect();
        Ok(records)
    }

    /// Build the wide QoQ or YoY table for `metrics` (in the given order)
    pub fn growth_table(
        table: &UnifiedTable,
        kind: GrowthKind,
        metrics: &[&MetricDefinition],
    ) -> Result<GrowthTable> {
        let mut per_metric = Vec::with_capacity(metrics.len());
        for def in metrics {
            let records = match kind {
                GrowthKind::QuarterOverQuarter => Self::qoq(table, def.name())?,
                GrowthKind::YearOverYear => Self::yoy(table, def.name())?,
            };
            per_metric.push(records);
        }

        let rows = table
            .rows()
            .iter()
            .enumerate()
            .map(|(i, row)| GrowthRow {
                period_key: row.period_key,
                period_label: row.period_label.clone(),
                records: per_metric.iter().map(|records| records[i].clone()).collect(),
            })
            .collect();

        let columns = metrics
            .iter()
            .map(|def| GrowthColumn {
                metric: def.name().to_string(),
                short_name: def.short_name.clone(),
            })
            .collect();

        debug!(kind = kind.suffix(), rows = table.len(), "computed growth table");

        Ok(GrowthTable { kind, columns, rows })
    }

    /// Trailing mean over `window` rows with a partial window at the start.
    /// Nulls are skipped, not treated as zero.
    pub fn moving_average(
        table: &UnifiedTable,
        metric: &str,
        window: usize,
    ) -> Result<Vec<MovingAverageRecord>> {
        if window == 0 {
            return Err(PipelineError::invalid("moving average", "window must be at least 1"));
        }
        let values = table.column(metric)?;
        let averages = rolling_mean(&values, window);

        Ok(table
            .rows()
            .iter()
            .zip(values.into_iter().zip(averages))
            .map(|(row, (raw_value, window_average))| MovingAverageRecord {
                period_key: row.period_key,
                timestamp: row.timestamp,
                raw_value,
                window_average,
            })
            .collect())
    }
}

/// `out[i]` = mean of the present values in `values[i+1-window ..= i]`
pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let start = (i + 1).saturating_sub(window);
            mean_of_present(values[start..=i].iter().copied())
        })
        .collect()
}

fn require_frequency(table: &UnifiedTable, expected: Frequency, context: &str) -> Result<()> {
    if table.frequency() != expected {
        return Err(PipelineError::FrequencyMismatch {
            context: context.to_string(),
            expected,
            found: table.frequency(),
        });
    }
    Ok(())
}
