// 🧾 UnifiedTable - several metrics aligned on one calendar frequency

use crate::error::{PipelineError, Result};
use crate::period::{Frequency, PeriodKey};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRow {
    pub period_key: PeriodKey,
    pub period_label: String,

    /// Start of the period
    pub timestamp: NaiveDate,

    /// Every column of the table is present; absent data is `None`
    pub values: BTreeMap<String, Option<f64>>,
}

impl UnifiedRow {
    pub fn value(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied().flatten()
    }
}

/// Rows are unique per period key and sorted ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedTable {
    frequency: Frequency,
    columns: Vec<String>,
    rows: Vec<UnifiedRow>,
}

impl UnifiedTable {
    pub fn empty(frequency: Frequency) -> Self {
        UnifiedTable {
            frequency,
            columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    /// Assemble from keyed cells. Missing cells become `None`.
    pub fn from_cells(
        frequency: Frequency,
        columns: Vec<String>,
        cells: BTreeMap<PeriodKey, BTreeMap<String, Option<f64>>>,
    ) -> Result<Self> {
        let mut rows = Vec::with_capacity(cells.len());
        for (key, mut values) in cells {
            if key.frequency() != frequency {
                return Err(PipelineError::FrequencyMismatch {
                    context: format!("row {}", key),
                    expected: frequency,
                    found: key.frequency(),
                });
            }
            for column in &columns {
                values.entry(column.clone()).or_insert(None);
            }
            rows.push(UnifiedRow {
                period_key: key,
                period_label: frequency.row_label(key),
                timestamp: key.start(),
                values,
            });
        }

        Ok(UnifiedTable {
            frequency,
            columns,
            rows,
        })
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[UnifiedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Values of one column in row order
    pub fn column(&self, column: &str) -> Result<Vec<Option<f64>>> {
        if !self.has_column(column) {
            return Err(PipelineError::invalid(
                format!("{} table", self.frequency),
                format!("unknown column '{}'", column),
            ));
        }
        Ok(self.rows.iter().map(|r| r.value(column)).collect())
    }

    pub fn row(&self, key: PeriodKey) -> Option<&UnifiedRow> {
        self.rows
            .binary_search_by(|r| r.period_key.cmp(&key))
            .ok()
            .map(|idx| &self.rows[idx])
    }

    /// Append all-null columns for any of `names` the table lacks
    pub fn ensure_columns(&mut self, names: &[&str]) {
        for name in names {
            if self.has_column(name) {
                continue;
            }
            self.columns.push(name.to_string());
            for row in &mut self.rows {
                row.values.insert(name.to_string(), None);
            }
        }
    }

    /// Reorder columns to follow `order`; unknown names are ignored,
    /// columns not named keep their relative order at the end.
    pub fn reorder_columns(&mut self, order: &[&str]) {
        let mut reordered: Vec<String> = order
            .iter()
            .filter(|name| self.has_column(name))
            .map(|name| name.to_string())
            .collect();
        for column in &self.columns {
            if !reordered.contains(column) {
                reordered.push(column.clone());
            }
        }
        self.columns = reordered;
    }
}
