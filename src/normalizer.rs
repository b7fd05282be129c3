// 🧹 Normalizer - raw indicator tables → canonical MetricSeries
// Sources arrive with arbitrary header casing, mixed date formats and
// the occasional header row repeated as data.

use crate::error::{PipelineError, Result};
use crate::period::Frequency;
use crate::registry::MetricDefinition;
use crate::series::{MetricSeries, Observation};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ============================================================================
// RAW TABLE
// ============================================================================

/// RawTable - a source exactly as read, before any interpretation
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,

    /// Where the table came from (file name or "memory")
    pub origin: String,

    /// SHA-256 of the raw bytes, hex encoded
    pub digest: String,
}

impl RawTable {
    /// Build from in-memory cells; digest covers the joined cells
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let mut hasher = Sha256::new();
        for line in std::iter::once(&headers).chain(rows.iter()) {
            hasher.update(line.join(","));
            hasher.update(b"\n");
        }
        RawTable {
            headers,
            rows,
            origin: "memory".to_string(),
            digest: format!("{:x}", hasher.finalize()),
        }
    }

    /// Parse CSV bytes. The first record is the header.
    pub fn from_csv_bytes(bytes: &[u8], origin: &str) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(bytes);

        let mut records = Vec::new();
        for result in reader.records() {
            let record = result?;
            if record.iter().all(|cell| cell.is_empty()) {
                continue;
            }
            records.push(record.iter().map(str::to_string).collect::<Vec<_>>());
        }

        let mut records = records.into_iter();
        let headers = records.next().unwrap_or_default();

        Ok(RawTable {
            headers,
            rows: records.collect(),
            origin: origin.to_string(),
            digest: format!("{:x}", Sha256::digest(bytes)),
        })
    }
}

// ============================================================================
// SOURCES
// ============================================================================

/// IndicatorSource - anything that can hand the pipeline a raw table
pub trait IndicatorSource {
    fn load(&self) -> Result<RawTable>;

    /// Human-readable location for logs and reports
    fn describe(&self) -> String;
}

/// CSV file on disk
#[derive(Debug, Clone)]
pub struct CsvSource {
    path: PathBuf,
}

impl CsvSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvSource { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl IndicatorSource for CsvSource {
    fn load(&self) -> Result<RawTable> {
        let bytes = std::fs::read(&self.path)?;
        let origin = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown.csv");
        RawTable::from_csv_bytes(&bytes, origin)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

impl IndicatorSource for RawTable {
    fn load(&self) -> Result<RawTable> {
        Ok(self.clone())
    }

    fn describe(&self) -> String {
        self.origin.clone()
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

const TIMESTAMP_COLUMNS: &[&str] = &["datetime", "lastupdate", "last_update"];
const VALUE_COLUMN: &str = "value";
const NULL_TOKENS: &[&str] = &["", "nan", "null", "na", "n/a", "none", "-"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y", "%Y/%m/%d"];

/// Counters describing what normalization did to a source
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizationStats {
    pub rows_read: usize,
    pub dropped_timestamps: usize,
    pub duplicates_replaced: usize,
    pub promoted_header: bool,
}

#[derive(Debug, Clone)]
pub struct Normalized {
    pub series: MetricSeries,
    pub stats: NormalizationStats,
}

/// `  Last Update ` → `last_update`
pub fn canonical_column(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

/// Parse any of the accepted timestamp layouts, keeping the date part
pub fn parse_timestamp(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.date_naive());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.date());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Some(d);
        }
    }
    None
}

/// Numeric cell or null. Unparseable text is null, not an error.
pub fn parse_value(raw: &str) -> Option<f64> {
    let s = raw.trim();
    if NULL_TOKENS.contains(&s.to_lowercase().as_str()) {
        return None;
    }
    s.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Index of the (timestamp, value) columns in a canonical header
fn locate_columns(header: &[String]) -> (Option<usize>, Option<usize>) {
    let timestamp = TIMESTAMP_COLUMNS
        .iter()
        .find_map(|wanted| header.iter().position(|h| h == wanted));
    let value = header.iter().position(|h| h == VALUE_COLUMN);
    (timestamp, value)
}

pub struct Normalizer;

impl Normalizer {
    /// Normalize one raw table into the series described by `definition`
    pub fn normalize(raw: &RawTable, definition: &MetricDefinition) -> Result<Normalized> {
        Self::normalize_as(raw, definition.name(), &definition.unit, definition.native_frequency)
    }

    pub fn normalize_as(
        raw: &RawTable,
        name: &str,
        unit: &str,
        frequency: Frequency,
    ) -> Result<Normalized> {
        let mut stats = NormalizationStats::default();
        let mut header: Vec<String> = raw.headers.iter().map(|h| canonical_column(h)).collect();
        let mut rows: &[Vec<String>] = &raw.rows;

        // Header repeated as the first data row, or the real header sitting one row down
        if let Some(first) = rows.first() {
            let first_canonical: Vec<String> = first.iter().map(|c| canonical_column(c)).collect();
            let header_usable = matches!(locate_columns(&header), (Some(_), Some(_)));
            let first_usable = matches!(locate_columns(&first_canonical), (Some(_), Some(_)));

            if first_canonical == header || (!header_usable && first_usable) {
                debug!(indicator = name, origin = %raw.origin, "promoting first data row to header");
                header = first_canonical;
                rows = &rows[1..];
                stats.promoted_header = true;
            }
        }

        let (ts_idx, value_idx) = match locate_columns(&header) {
            (Some(ts), Some(v)) => (ts, v),
            (None, _) => {
                return Err(PipelineError::malformed(
                    name,
                    format!(
                        "no timestamp column (expected one of {:?}) in {:?}",
                        TIMESTAMP_COLUMNS, header
                    ),
                ))
            }
            (_, None) => {
                return Err(PipelineError::malformed(
                    name,
                    format!("no '{}' column in {:?}", VALUE_COLUMN, header),
                ))
            }
        };

        let mut by_timestamp: BTreeMap<NaiveDate, Observation> = BTreeMap::new();

        for (line, row) in rows.iter().enumerate() {
            stats.rows_read += 1;

            let raw_ts = row.get(ts_idx).map(String::as_str).unwrap_or("");
            let Some(timestamp) = parse_timestamp(raw_ts) else {
                debug!(indicator = name, line = line + 2, raw = raw_ts, "dropping row with unparseable timestamp");
                stats.dropped_timestamps += 1;
                continue;
            };

            let value = row.get(value_idx).and_then(|cell| parse_value(cell));

            let mut observation = Observation::new(timestamp, value);
            for (idx, cell) in row.iter().enumerate() {
                if idx == ts_idx || idx == value_idx || cell.is_empty() {
                    continue;
                }
                if let Some(column) = header.get(idx) {
                    observation.labels.insert(column.clone(), cell.clone());
                }
            }

            // Last occurrence wins
            if by_timestamp.insert(timestamp, observation).is_some() {
                stats.duplicates_replaced += 1;
            }
        }

        let observations: Vec<Observation> = by_timestamp.into_values().collect();
        if observations.is_empty() {
            warn!(indicator = name, origin = %raw.origin, "source produced no observations");
        }

        let series = MetricSeries::new(name, unit, frequency, observations)?;

        info!(
            indicator = name,
            origin = %raw.origin,
            observations = series.len(),
            dropped = stats.dropped_timestamps,
            duplicates = stats.duplicates_replaced,
            "normalized indicator"
        );

        Ok(Normalized { series, stats })
    }
}
