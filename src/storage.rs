// 🗄️ Storage - published tables in SQLite
//
// Derived tables are replaced wholesale (DROP + CREATE + INSERT in one
// transaction). `pipeline_runs` is the only append-only table.

use crate::error::{PipelineError, Result};
use crate::output::{is_published_table, FlatTable, PIPELINE_RUNS, PUBLISHED_TABLES};
use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Serialize;
use tracing::debug;

/// Create the run history table if it does not exist yet
pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS pipeline_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT UNIQUE NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            report TEXT NOT NULL
        )",
        [],
    )
    .map_err(|e| PipelineError::storage(PIPELINE_RUNS, e))?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_runs_started ON pipeline_runs(started_at)",
        [],
    )
    .map_err(|e| PipelineError::storage(PIPELINE_RUNS, e))?;

    Ok(())
}

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Replace `table` with exactly the rows of `flat`. Returns the row count.
pub fn replace_table(conn: &mut Connection, flat: &FlatTable) -> Result<usize> {
    let table = flat.name.as_str();
    let wrap = |e: rusqlite::Error| PipelineError::storage(table, e);

    if let Some(bad) = flat.rows.iter().find(|row| row.len() != flat.columns.len()) {
        return Err(PipelineError::invalid(
            format!("table {}", table),
            format!("row has {} cells, expected {}", bad.len(), flat.columns.len()),
        ));
    }

    let column_defs: Vec<String> = flat
        .columns
        .iter()
        .zip(flat.column_types())
        .map(|(name, sql_type)| format!("{} {}", quote(name), sql_type))
        .collect();
    let placeholders: Vec<String> = (1..=flat.columns.len()).map(|i| format!("?{}", i)).collect();
    let insert = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        quote(table),
        flat.columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(", "),
        placeholders.join(", ")
    );

    let tx = conn.transaction().map_err(wrap)?;
    tx.execute(&format!("DROP TABLE IF EXISTS {}", quote(table)), [])
        .map_err(wrap)?;
    tx.execute(
        &format!("CREATE TABLE {} ({})", quote(table), column_defs.join(", ")),
        [],
    )
    .map_err(wrap)?;
    {
        let mut stmt = tx.prepare(&insert).map_err(wrap)?;
        for row in &flat.rows {
            stmt.execute(params_from_iter(row.iter())).map_err(wrap)?;
        }
    }
    tx.commit().map_err(wrap)?;

    debug!(table, rows = flat.len(), "replaced table");
    Ok(flat.len())
}

// ============================================================================
// RUN HISTORY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunHistoryEntry {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// sha256 over the raw inputs of the run
    pub fingerprint: String,
    /// Full run report as JSON
    pub report: String,
}

pub fn record_run(conn: &Connection, entry: &RunHistoryEntry) -> Result<()> {
    setup_database(conn)?;
    conn.execute(
        "INSERT INTO pipeline_runs (run_id, started_at, finished_at, fingerprint, report)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            entry.run_id,
            entry.started_at.to_rfc3339(),
            entry.finished_at.to_rfc3339(),
            entry.fingerprint,
            entry.report,
        ],
    )
    .map_err(|e| PipelineError::storage(PIPELINE_RUNS, e))?;
    Ok(())
}

/// Most recent run, if any run was ever recorded
pub fn latest_run(conn: &Connection) -> Result<Option<RunHistoryEntry>> {
    if !table_exists(conn, PIPELINE_RUNS)? {
        return Ok(None);
    }

    let row = conn
        .query_row(
            "SELECT run_id, started_at, finished_at, fingerprint, report
             FROM pipeline_runs
             ORDER BY id DESC
             LIMIT 1",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()
        .map_err(|e| PipelineError::storage(PIPELINE_RUNS, e))?;

    let Some((run_id, started_at, finished_at, fingerprint, report)) = row else {
        return Ok(None);
    };

    let parse = |raw: &str| {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| PipelineError::invalid(PIPELINE_RUNS, format!("bad timestamp '{}': {}", raw, e)))
    };

    Ok(Some(RunHistoryEntry {
        run_id,
        started_at: parse(&started_at)?,
        finished_at: parse(&finished_at)?,
        fingerprint,
        report,
    }))
}

// ============================================================================
// CONSUMER QUERIES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSummary {
    pub name: String,
    pub rows: i64,
    pub columns: Vec<String>,
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |row| row.get(0),
        )
        .map_err(|e| PipelineError::storage(table, e))?;
    Ok(count > 0)
}

pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let wrap = |e: rusqlite::Error| PipelineError::storage(table, e);
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({})", quote(table)))
        .map_err(wrap)?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(wrap)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(wrap)?;
    Ok(columns)
}

pub fn row_count(conn: &Connection, table: &str) -> Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", quote(table)), [], |row| row.get(0))
        .map_err(|e| PipelineError::storage(table, e))
}

/// Row counts of every published table present in the database
pub fn table_summaries(conn: &Connection) -> Result<Vec<TableSummary>> {
    let mut summaries = Vec::new();
    for table in PUBLISHED_TABLES {
        if !table_exists(conn, table)? {
            continue;
        }
        summaries.push(TableSummary {
            name: table.to_string(),
            rows: row_count(conn, table)?,
            columns: table_columns(conn, table)?,
        });
    }
    Ok(summaries)
}

fn check_published(conn: &Connection, table: &str) -> Result<Vec<String>> {
    if !is_published_table(table) {
        return Err(PipelineError::invalid(
            "table lookup",
            format!("'{}' is not a published table", table),
        ));
    }
    if !table_exists(conn, table)? {
        return Err(PipelineError::invalid(
            "table lookup",
            format!("table '{}' has not been published yet", table),
        ));
    }
    table_columns(conn, table)
}

/// All values of one column, in insertion order
pub fn read_column(conn: &Connection, table: &str, column: &str) -> Result<Vec<Value>> {
    let columns = check_published(conn, table)?;
    if !columns.iter().any(|c| c == column) {
        return Err(PipelineError::invalid(
            format!("table {}", table),
            format!("unknown column '{}'", column),
        ));
    }

    let wrap = |e: rusqlite::Error| PipelineError::storage(table, e);
    let mut stmt = conn
        .prepare(&format!("SELECT {} FROM {} ORDER BY rowid", quote(column), quote(table)))
        .map_err(wrap)?;
    let values = stmt
        .query_map([], |row| row.get::<_, Value>(0))
        .map_err(wrap)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(wrap)?;
    Ok(values)
}

/// Whole table: column names and rows in insertion order
pub fn read_table(conn: &Connection, table: &str) -> Result<(Vec<String>, Vec<Vec<Value>>)> {
    let columns = check_published(conn, table)?;
    let wrap = |e: rusqlite::Error| PipelineError::storage(table, e);

    let mut stmt = conn
        .prepare(&format!("SELECT * FROM {} ORDER BY rowid", quote(table)))
        .map_err(wrap)?;
    let width = columns.len();
    let rows = stmt
        .query_map([], |row| {
            (0..width)
                .map(|i| row.get::<_, Value>(i))
                .collect::<rusqlite::Result<Vec<Value>>>()
        })
        .map_err(wrap)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(wrap)?;
    Ok((columns, rows))
}
