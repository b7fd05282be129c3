// 🚦 Pipeline Runner - one full batch rebuild
//
// Normalizer → Resampler → Merger → GrowthCalculator → Predictor → Forecaster
//
// Every published table is built and persisted in isolation: a failing stage
// records its reason and the table keeps its previously published contents.
// Only a failed *required* indicator aborts the run, before anything is staged.

use crate::config::PipelineConfig;
use crate::context::PipelineContext;
use crate::error::{PipelineError, Result};
use crate::forecast::{forecaster, Capability, Forecaster};
use crate::growth::{GrowthCalculator, GrowthKind};
use crate::merger::join_series;
use crate::normalizer::{CsvSource, IndicatorSource, NormalizationStats, Normalizer};
use crate::output::{
    unified_table_name, FlatTable, FORECAST, GROWTH_QOQ, GROWTH_YOY, MOVING_AVERAGE, PREDICTIONS,
    UNIFIED_QUARTERLY, UNIFIED_YEARLY, UNIFIED_MONTHLY,
};
use crate::period::Frequency;
use crate::predictor::{FitReport, Predictor};
use crate::registry::{Metric, MetricRegistry};
use crate::resampler::resample;
use crate::series::MetricSeries;
use crate::storage::{self, RunHistoryEntry};
use crate::table::UnifiedTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// RUN REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestionStatus {
    Loaded {
        observations: usize,
        dropped_timestamps: usize,
        duplicates_replaced: usize,
        promoted_header: bool,
    },
    Failed {
        kind: String,
        reason: String,
    },
    NotConfigured,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionOutcome {
    pub metric: String,
    pub source: Option<String>,
    #[serde(flatten)]
    pub status: IngestionStatus,
}

impl IngestionOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self.status, IngestionStatus::Loaded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableStatus {
    Published { rows: usize },
    /// Published empty, so no stale rows outlive a missing capability
    Unavailable { reason: String },
    Skipped { reason: String },
    Failed { kind: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableOutcome {
    pub table: String,
    #[serde(flatten)]
    pub status: TableStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// sha256 over `metric:digest` of every ingested source
    pub fingerprint: String,

    pub ingestion: Vec<IngestionOutcome>,
    pub tables: Vec<TableOutcome>,
    pub prediction: Option<FitReport>,

    /// Window behind the `moving_average` table
    pub moving_average_window: usize,
}

impl RunReport {
    pub fn table(&self, name: &str) -> Option<&TableStatus> {
        self.tables.iter().find(|t| t.table == name).map(|t| &t.status)
    }

    pub fn published_count(&self) -> usize {
        self.tables
            .iter()
            .filter(|t| matches!(t.status, TableStatus::Published { .. }))
            .count()
    }
}

// ============================================================================
// STAGES
// ============================================================================

/// Result of building one output table, before persistence
enum Built {
    Ready(FlatTable),
    Unavailable(FlatTable, String),
    Skipped(String),
    Failed(PipelineError),
}

impl Built {
    fn from_result(result: Result<FlatTable>) -> Self {
        match result {
            Ok(flat) => Built::Ready(flat),
            Err(e) => Built::Failed(e),
        }
    }
}

/// Build a table derived from an upstream unified table, or skip it
fn derive<F>(upstream: Option<&UnifiedTable>, upstream_name: &str, build: F) -> Built
where
    F: FnOnce(&UnifiedTable) -> Result<FlatTable>,
{
    match upstream {
        Some(table) => Built::from_result(build(table)),
        None => Built::Skipped(format!("{} was not built", upstream_name)),
    }
}

struct Ingestion {
    series: Vec<MetricSeries>,
    outcomes: Vec<IngestionOutcome>,
    digests: Vec<(String, String)>,
}

// ============================================================================
// RUNNER
// ============================================================================

pub struct PipelineRunner {
    config: PipelineConfig,
    registry: MetricRegistry,
    sources: BTreeMap<String, Box<dyn IndicatorSource>>,
    forecaster: Box<dyn Forecaster>,
}

impl PipelineRunner {
    /// Runner reading every configured source from CSV
    pub fn new(config: PipelineConfig) -> Self {
        let sources = config
            .sources
            .iter()
            .map(|(metric, path)| {
                let source: Box<dyn IndicatorSource> = Box::new(CsvSource::new(path));
                (metric.clone(), source)
            })
            .collect();
        let forecaster = forecaster(config.forecast.enabled);

        PipelineRunner {
            config,
            registry: MetricRegistry::standard(),
            sources,
            forecaster,
        }
    }

    /// Builder: replace the source of one indicator
    pub fn with_source(mut self, metric: &str, source: impl IndicatorSource + 'static) -> Self {
        self.sources.insert(metric.to_string(), Box::new(source));
        self
    }

    /// Builder: use a specific forecaster instead of the configured one
    pub fn with_forecaster(mut self, forecaster: Box<dyn Forecaster>) -> Self {
        self.forecaster = forecaster;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Rebuild and publish every table
    pub fn run(&self) -> Result<RunReport> {
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(run_id = %run_id, sources = self.sources.len(), "pipeline run started");

        let ingestion = self.ingest()?;
        let (stages, prediction) = self.build_tables(&ingestion.series);

        let mut context = PipelineContext::open(&self.config.database_path, &run_id)?;
        let mut tables = Vec::with_capacity(stages.len());
        for (table, built) in stages {
            let status = match built {
                Built::Ready(flat) => match storage::replace_table(context.connection()?, &flat) {
                    Ok(rows) => {
                        info!(table, rows, "published table");
                        TableStatus::Published { rows }
                    }
                    Err(e) => failed_table(table, e),
                },
                Built::Unavailable(empty, reason) => match storage::replace_table(context.connection()?, &empty) {
                    Ok(_) => {
                        info!(table, reason = %reason, "table unavailable, cleared");
                        TableStatus::Unavailable { reason }
                    }
                    Err(e) => failed_table(table, e),
                },
                Built::Skipped(reason) => {
                    info!(table, reason = %reason, "skipped table");
                    TableStatus::Skipped { reason }
                }
                Built::Failed(e) => failed_table(table, e),
            };
            tables.push(TableOutcome {
                table: table.to_string(),
                status,
            });
        }

        let report = RunReport {
            run_id: run_id.clone(),
            started_at,
            finished_at: Utc::now(),
            fingerprint: fingerprint(&ingestion.digests),
            ingestion: ingestion.outcomes,
            tables,
            prediction,
            moving_average_window: self.config.moving_average_window,
        };

        storage::record_run(
            context.connection()?,
            &RunHistoryEntry {
                run_id,
                started_at: report.started_at,
                finished_at: report.finished_at,
                fingerprint: report.fingerprint.clone(),
                report: serde_json::to_string(&report)?,
            },
        )?;
        context.publish()?;

        info!(
            run_id = %report.run_id,
            published = report.published_count(),
            tables = report.tables.len(),
            "pipeline run finished"
        );
        Ok(report)
    }

    fn ingest(&self) -> Result<Ingestion> {
        let mut ingestion = Ingestion {
            series: Vec::new(),
            outcomes: Vec::new(),
            digests: Vec::new(),
        };

        for definition in self.registry.iter() {
            let metric = definition.name();
            let Some(source) = self.sources.get(metric) else {
                ingestion.outcomes.push(IngestionOutcome {
                    metric: metric.to_string(),
                    source: None,
                    status: IngestionStatus::NotConfigured,
                });
                continue;
            };

            let loaded = source.load().and_then(|raw| {
                let normalized = Normalizer::normalize(&raw, definition)?;
                Ok((normalized, raw.digest))
            });

            match loaded {
                Ok((normalized, digest)) => {
                    let NormalizationStats {
                        dropped_timestamps,
                        duplicates_replaced,
                        promoted_header,
                        ..
                    } = normalized.stats;
                    ingestion.outcomes.push(IngestionOutcome {
                        metric: metric.to_string(),
                        source: Some(source.describe()),
                        status: IngestionStatus::Loaded {
                            observations: normalized.series.len(),
                            dropped_timestamps,
                            duplicates_replaced,
                            promoted_header,
                        },
                    });
                    ingestion.digests.push((metric.to_string(), digest));
                    ingestion.series.push(normalized.series);
                }
                Err(e) if self.is_required(metric) => {
                    error!(indicator = metric, source = %source.describe(), error = %e, "required indicator failed, aborting run");
                    return Err(e);
                }
                Err(e) => {
                    warn!(indicator = metric, source = %source.describe(), error = %e, "indicator skipped");
                    ingestion.outcomes.push(IngestionOutcome {
                        metric: metric.to_string(),
                        source: Some(source.describe()),
                        status: IngestionStatus::Failed {
                            kind: e.kind().to_string(),
                            reason: e.to_string(),
                        },
                    });
                }
            }
        }

        Ok(ingestion)
    }

    fn is_required(&self, metric: &str) -> bool {
        self.config.required_metrics.iter().any(|m| m == metric)
    }

    fn build_tables(&self, series: &[MetricSeries]) -> (Vec<(&'static str, Built)>, Option<FitReport>) {
        let mut stages = Vec::new();

        let mut unified = |frequency: Frequency| -> Option<UnifiedTable> {
            match self.unify(series, frequency) {
                Ok(table) => {
                    stages.push((unified_table_name(frequency), Built::Ready(FlatTable::from_unified(&table))));
                    Some(table)
                }
                Err(e) => {
                    stages.push((unified_table_name(frequency), Built::Failed(e)));
                    None
                }
            }
        };
        let monthly = unified(Frequency::Monthly);
        let quarterly = unified(Frequency::Quarterly);
        let yearly = unified(Frequency::Yearly);

        let growth_metrics = self.registry.growth_order();
        stages.push((
            GROWTH_QOQ,
            derive(quarterly.as_ref(), UNIFIED_QUARTERLY, |table| {
                GrowthCalculator::growth_table(table, GrowthKind::QuarterOverQuarter, &growth_metrics)
                    .map(|growth| FlatTable::from_growth(&growth))
            }),
        ));
        stages.push((
            GROWTH_YOY,
            derive(yearly.as_ref(), UNIFIED_YEARLY, |table| {
                GrowthCalculator::growth_table(table, GrowthKind::YearOverYear, &growth_metrics)
                    .map(|growth| FlatTable::from_growth(&growth))
            }),
        ));

        let window = self.config.moving_average_window;
        stages.push((
            MOVING_AVERAGE,
            derive(monthly.as_ref(), UNIFIED_MONTHLY, |table| {
                let output = Metric::ConstructionOutput;
                let short_name = self
                    .registry
                    .get(output)
                    .map(|d| d.short_name.as_str())
                    .unwrap_or("output");
                GrowthCalculator::moving_average(table, output.name(), window)
                    .map(|records| FlatTable::from_moving_average(short_name, &records))
            }),
        ));

        let mut prediction = None;
        stages.push((
            PREDICTIONS,
            derive(quarterly.as_ref(), UNIFIED_QUARTERLY, |table| {
                let predictor = Predictor::new(self.config.prediction.predictor_config());
                let outcome = predictor.predict_next(table)?;
                prediction = Some(outcome.report);
                Ok(FlatTable::from_predictions(&[outcome.record]))
            }),
        ));

        stages.push((FORECAST, self.build_forecast(series)));

        (stages, prediction)
    }

    /// Every registered metric available at `frequency`, as columns in registry order
    fn unify(&self, series: &[MetricSeries], frequency: Frequency) -> Result<UnifiedTable> {
        let names: Vec<&str> = self
            .registry
            .available_at(frequency)
            .iter()
            .map(|d| d.name())
            .collect();

        let mut resampled = Vec::new();
        for s in series.iter().filter(|s| names.contains(&s.name())) {
            resampled.push(resample(s, frequency)?);
        }

        let mut table = join_series(frequency, &resampled)?;
        table.ensure_columns(&names);
        table.reorder_columns(&names);
        Ok(table)
    }

    fn build_forecast(&self, series: &[MetricSeries]) -> Built {
        if let Capability::Unavailable { reason } = self.forecaster.capability() {
            return Built::Unavailable(FlatTable::empty_forecast(), format!("forecasting unavailable: {}", reason));
        }

        let metric = self.config.forecast.metric.as_str();
        let Some(source) = series.iter().find(|s| s.name() == metric) else {
            return Built::Skipped(format!("{} was not ingested", metric));
        };

        Built::from_result(
            resample(source, Frequency::Monthly)
                .and_then(|monthly| self.forecaster.forecast(&monthly.drop_nulls(), self.config.forecast.horizon))
                .map(|forecast| FlatTable::from_forecast(&forecast)),
        )
    }
}

fn failed_table(table: &str, e: PipelineError) -> TableStatus {
    warn!(table, kind = e.kind(), error = %e, "table not rebuilt, previous contents kept");
    TableStatus::Failed {
        kind: e.kind().to_string(),
        reason: e.to_string(),
    }
}

/// Hex sha256 over the `(metric, digest)` pairs in order
pub fn fingerprint(digests: &[(String, String)]) -> String {
    let mut hasher = Sha256::new();
    for (metric, digest) in digests {
        hasher.update(format!("{}:{}\n", metric, digest));
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::UnavailableForecaster;
    use crate::normalizer::RawTable;
    use crate::output::PIPELINE_RUNS;
    use rusqlite::types::Value;
    use rusqlite::Connection;

    fn raw(rows: &[(&str, &str)]) -> RawTable {
        RawTable::new(
            vec!["datetime".to_string(), "value".to_string()],
            rows.iter()
                .map(|(d, v)| vec![d.to_string(), v.to_string()])
                .collect(),
        )
    }

    fn quarters(values: &[f64]) -> RawTable {
        let rows: Vec<(String, String)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let year = 2022 + i / 4;
                let month = (i % 4) * 3 + 1;
                (format!("{}-{:02}-01", year, month), v.to_string())
            })
            .collect();
        let borrowed: Vec<(&str, &str)> = rows.iter().map(|(d, v)| (d.as_str(), v.as_str())).collect();
        raw(&borrowed)
    }

    fn months(values: &[f64]) -> RawTable {
        let rows: Vec<(String, String)> = values
            .iter()
            .enumerate()
            .map(|(i, v)| (format!("{}-{:02}-15", 2022 + i / 12, i % 12 + 1), v.to_string()))
            .collect();
        let borrowed: Vec<(&str, &str)> = rows.iter().map(|(d, v)| (d.as_str(), v.as_str())).collect();
        raw(&borrowed)
    }

    fn config(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            database_path: dir.join("market.db"),
            sources: BTreeMap::new(),
            ..PipelineConfig::default()
        }
    }

    fn runner(dir: &std::path::Path) -> PipelineRunner {
        let permits: Vec<f64> = (0..12).map(|i| 100.0 + 10.0 * i as f64).collect();
        let output: Vec<f64> = (0..12).map(|i| (i % 3) as f64).collect();
        PipelineRunner::new(config(dir))
            .with_source("building_permits", months(&permits))
            .with_source("construction_output", months(&output))
            .with_source("residential_prices", quarters(&[1.0, 2.0, 3.0, 4.0]))
            .with_source("price_to_rent_ratio", quarters(&[90.0, 91.0, 92.0, 93.0]))
    }

    #[test]
    fn test_full_run_publishes_every_table() {
        let dir = tempfile::tempdir().unwrap();
        let report = runner(dir.path()).run().unwrap();

        assert!(report.ingestion.iter().all(|o| o.is_loaded()));
        assert_eq!(report.table(UNIFIED_MONTHLY), Some(&TableStatus::Published { rows: 12 }));
        assert_eq!(report.table(UNIFIED_QUARTERLY), Some(&TableStatus::Published { rows: 4 }));
        assert_eq!(report.table(UNIFIED_YEARLY), Some(&TableStatus::Published { rows: 1 }));
        assert_eq!(report.table(PREDICTIONS), Some(&TableStatus::Published { rows: 1 }));
        assert_eq!(report.fingerprint.len(), 64);
        assert!(report.prediction.is_some());

        let conn = Connection::open(dir.path().join("market.db")).unwrap();
        // Jan, Feb, Mar 2022 = 100, 110, 120
        let permits = storage::read_column(&conn, UNIFIED_QUARTERLY, "building_permits").unwrap();
        assert_eq!(permits[0], Value::Real(110.0));
        let quarter = storage::read_column(&conn, UNIFIED_MONTHLY, "quarter").unwrap();
        assert_eq!(quarter[3], Value::Text("2022Q2".to_string()));
        assert_eq!(storage::row_count(&conn, PIPELINE_RUNS).unwrap(), 1);
    }

    #[test]
    fn test_stub_forecaster_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let report = runner(dir.path())
            .with_forecaster(Box::new(UnavailableForecaster::new("not installed")))
            .run()
            .unwrap();

        match report.table(FORECAST) {
            Some(TableStatus::Unavailable { reason }) => assert!(reason.contains("not installed")),
            other => panic!("unexpected forecast status {:?}", other),
        }

        let conn = Connection::open(dir.path().join("market.db")).unwrap();
        let columns = storage::table_columns(&conn, FORECAST).unwrap();
        assert_eq!(columns, vec!["datetime", "segment", "actual", "value", "lower", "upper"]);
        assert_eq!(storage::row_count(&conn, FORECAST).unwrap(), 0);
    }

    #[cfg(feature = "forecast")]
    #[test]
    fn test_unavailable_forecaster_clears_previous_forecast() {
        let dir = tempfile::tempdir().unwrap();
        let first = runner(dir.path()).run().unwrap();
        assert!(matches!(first.table(FORECAST), Some(TableStatus::Published { rows }) if *rows > 0));

        let second = runner(dir.path())
            .with_forecaster(Box::new(UnavailableForecaster::new("not installed")))
            .run()
            .unwrap();
        assert!(matches!(second.table(FORECAST), Some(TableStatus::Unavailable { .. })));
        assert_eq!(second.published_count(), 7);

        let conn = Connection::open(dir.path().join("market.db")).unwrap();
        assert_eq!(storage::row_count(&conn, FORECAST).unwrap(), 0);
        // other tables still come from the second run
        assert_eq!(storage::row_count(&conn, UNIFIED_MONTHLY).unwrap(), 12);
        assert_eq!(storage::row_count(&conn, PIPELINE_RUNS).unwrap(), 2);
    }

    #[test]
    fn test_failed_optional_indicator_keeps_shape() {
        let dir = tempfile::tempdir().unwrap();
        let broken = RawTable::new(vec!["when".to_string(), "amount".to_string()], vec![]);
        let report = runner(dir.path())
            .with_source("price_to_rent_ratio", broken)
            .run()
            .unwrap();

        let ratio = report
            .ingestion
            .iter()
            .find(|o| o.metric == "price_to_rent_ratio")
            .unwrap();
        assert!(matches!(&ratio.status, IngestionStatus::Failed { kind, .. } if kind == "malformed_source"));

        let conn = Connection::open(dir.path().join("market.db")).unwrap();
        let ratio = storage::read_column(&conn, UNIFIED_QUARTERLY, "price_to_rent_ratio").unwrap();
        assert!(ratio.iter().all(|v| *v == Value::Null));
    }

    #[test]
    fn test_required_indicator_aborts_before_staging() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.required_metrics = vec!["building_permits".to_string()];

        let broken = RawTable::new(vec!["value".to_string()], vec![vec!["1".to_string()]]);
        let err = PipelineRunner::new(cfg)
            .with_source("building_permits", broken)
            .run()
            .unwrap_err();

        assert!(matches!(err, PipelineError::MalformedSource { .. }));
        assert!(!dir.path().join("market.db").exists());
    }

    #[test]
    fn test_fingerprint_depends_on_inputs() {
        let a = fingerprint(&[("x".to_string(), "1".to_string())]);
        let b = fingerprint(&[("x".to_string(), "2".to_string())]);
        assert_ne!(a, b);
        assert_eq!(a, fingerprint(&[("x".to_string(), "1".to_string())]));
    }
}
