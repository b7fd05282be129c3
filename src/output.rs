// 📤 Output Tables - flat, named, column-ordered views of pipeline results
//
// Every published SQLite table is built here from a domain type, so the
// column layout lives in one place. Storage only knows about FlatTable.

use crate::forecast::Forecast;
use crate::growth::{GrowthTable, MovingAverageRecord};
use crate::predictor::PredictionRecord;
use crate::table::UnifiedTable;
use rusqlite::types::{ToSql, ToSqlOutput, Value};
use serde::Serialize;

pub const UNIFIED_MONTHLY: &str = "unified_monthly";
pub const UNIFIED_QUARTERLY: &str = "unified_quarterly";
pub const UNIFIED_YEARLY: &str = "unified_yearly";
pub const GROWTH_QOQ: &str = "growth_qoq";
pub const GROWTH_YOY: &str = "growth_yoy";
pub const MOVING_AVERAGE: &str = "moving_average";
pub const PREDICTIONS: &str = "predictions";
pub const FORECAST: &str = "forecast";
pub const PIPELINE_RUNS: &str = "pipeline_runs";

/// Closed list of tables consumers may query
pub const PUBLISHED_TABLES: [&str; 9] = [
    UNIFIED_MONTHLY,
    UNIFIED_QUARTERLY,
    UNIFIED_YEARLY,
    GROWTH_QOQ,
    GROWTH_YOY,
    MOVING_AVERAGE,
    PREDICTIONS,
    FORECAST,
    PIPELINE_RUNS,
];

pub fn is_published_table(name: &str) -> bool {
    PUBLISHED_TABLES.contains(&name)
}

/// SQLite table name for a unified table of `frequency`
pub fn unified_table_name(frequency: crate::period::Frequency) -> &'static str {
    use crate::period::Frequency;
    match frequency {
        Frequency::Monthly => UNIFIED_MONTHLY,
        Frequency::Quarterly => UNIFIED_QUARTERLY,
        Frequency::Yearly => UNIFIED_YEARLY,
    }
}

// ============================================================================
// CELLS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Cell {
    Text(String),
    Real(Option<f64>),
    Integer(Option<i64>),
}

impl Cell {
    fn sql_type(&self) -> &'static str {
        match self {
            Cell::Text(_) => "TEXT",
            Cell::Real(_) => "REAL",
            Cell::Integer(_) => "INTEGER",
        }
    }
}

impl ToSql for Cell {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let value = match self {
            Cell::Text(text) => Value::Text(text.clone()),
            Cell::Real(Some(v)) => Value::Real(*v),
            Cell::Integer(Some(v)) => Value::Integer(*v),
            Cell::Real(None) | Cell::Integer(None) => Value::Null,
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

// ============================================================================
// FLAT TABLE
// ============================================================================

/// A fully materialized table, ready to replace its SQLite counterpart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
    types: Vec<&'static str>,
}

impl FlatTable {
    pub fn new(name: &str, columns: Vec<String>) -> Self {
        FlatTable {
            name: name.to_string(),
            types: vec!["REAL"; columns.len()],
            columns,
            rows: Vec::new(),
        }
    }

    /// Builder: declared SQL types, used when the table has no rows
    pub fn with_types(mut self, types: &[&'static str]) -> Self {
        self.types = types.to_vec();
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// SQL type per column, taken from the first row (declared types if empty)
    pub fn column_types(&self) -> Vec<&'static str> {
        match self.rows.first() {
            Some(row) => row.iter().map(Cell::sql_type).collect(),
            None => self.types.clone(),
        }
    }

    /// `datetime, <metric columns...>, quarter|year`
    pub fn from_unified(table: &UnifiedTable) -> Self {
        let label_column = table.frequency().label_column();
        let mut columns = vec!["datetime".to_string()];
        columns.extend(table.columns().iter().cloned());
        columns.push(label_column.to_string());

        let mut flat = FlatTable::new(unified_table_name(table.frequency()), columns);
        for row in table.rows() {
            let mut cells = vec![Cell::Text(row.timestamp.format("%Y-%m-%d").to_string())];
            cells.extend(table.columns().iter().map(|c| Cell::Real(row.value(c))));
            cells.push(Cell::Text(row.period_label.clone()));
            flat.rows.push(cells);
        }
        flat
    }

    /// `quarter|year, current_<s>, previous_<s>, <s>_<qoq|yoy>_pct, ...`
    pub fn from_growth(table: &GrowthTable) -> Self {
        use crate::growth::GrowthKind;

        let (name, label_column) = match table.kind {
            GrowthKind::QuarterOverQuarter => (GROWTH_QOQ, "quarter"),
            GrowthKind::YearOverYear => (GROWTH_YOY, "year"),
        };
        let suffix = table.kind.suffix();

        let mut columns = vec![label_column.to_string()];
        for column in &table.columns {
            let short = &column.short_name;
            columns.push(format!("current_{}", short));
            columns.push(format!("previous_{}", short));
            columns.push(format!("{}_{}_pct", short, suffix));
        }

        let mut flat = FlatTable::new(name, columns);
        for row in &table.rows {
            let mut cells = vec![Cell::Text(row.period_label.clone())];
            for record in &row.records {
                cells.push(Cell::Real(record.current_value));
                cells.push(Cell::Real(record.previous_value));
                cells.push(Cell::Real(record.pct_change));
            }
            flat.rows.push(cells);
        }
        flat
    }

    /// `date, current_<short>, <short>_3mo_avg`
    ///
    /// The column name is part of the published layout and does not follow
    /// the configured window.
    pub fn from_moving_average(short_name: &str, records: &[MovingAverageRecord]) -> Self {
        let columns = vec![
            "date".to_string(),
            format!("current_{}", short_name),
            format!("{}_3mo_avg", short_name),
        ];
        let mut flat = FlatTable::new(MOVING_AVERAGE, columns);
        for record in records {
            flat.rows.push(vec![
                Cell::Text(record.timestamp.format("%Y-%m-%d").to_string()),
                Cell::Real(record.raw_value),
                Cell::Real(record.window_average),
            ]);
        }
        flat
    }

    pub fn from_predictions(records: &[PredictionRecord]) -> Self {
        let columns = ["current_quarter", "residential_price", "predicted_permits", "actual_permits"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        let mut flat = FlatTable::new(PREDICTIONS, columns);
        for record in records {
            flat.rows.push(vec![
                Cell::Text(record.as_of_label.clone()),
                Cell::Real(Some(record.feature_value)),
                Cell::Integer(Some(record.predicted_value)),
                Cell::Real(record.actual_value),
            ]);
        }
        flat
    }

    /// Forecast layout with no rows, published when no forecaster is available
    pub fn empty_forecast() -> Self {
        let columns = ["datetime", "segment", "actual", "value", "lower", "upper"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        FlatTable::new(FORECAST, columns).with_types(&["TEXT", "TEXT", "REAL", "REAL", "REAL", "REAL"])
    }

    pub fn from_forecast(forecast: &Forecast) -> Self {
        let mut flat = FlatTable::empty_forecast();
        for point in &forecast.points {
            flat.rows.push(vec![
                Cell::Text(point.timestamp.format("%Y-%m-%d").to_string()),
                Cell::Text(point.segment.as_str().to_string()),
                Cell::Real(point.actual),
                Cell::Real(Some(point.value)),
                Cell::Real(Some(point.lower)),
                Cell::Real(Some(point.upper)),
            ]);
        }
        flat
    }
}
