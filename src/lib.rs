// Construction Market Pipeline - Core Library
// Exposes all modules for use in the CLI and tests

pub mod error;
pub mod period;
pub mod registry;
pub mod series;
pub mod normalizer;
pub mod stats;
pub mod table;
pub mod merger;
pub mod resampler;
pub mod growth;
pub mod predictor;
pub mod forecast;
pub mod output;
pub mod storage;
pub mod context;
pub mod config;
pub mod pipeline;

// Re-export commonly used types
pub use error::{PipelineError, Result};
pub use period::{Frequency, PeriodKey};
pub use registry::{Metric, MetricDefinition, MetricRegistry};
pub use series::{MetricSeries, Observation};
pub use normalizer::{
    CsvSource, IndicatorSource, NormalizationStats, Normalized, Normalizer, RawTable,
};
pub use table::{UnifiedRow, UnifiedTable};
pub use merger::join_series;
pub use resampler::{resample, resample_table};
pub use growth::{
    GrowthCalculator, GrowthKind, GrowthRecord, GrowthTable, MovingAverageRecord,
    DEFAULT_MOVING_AVERAGE_WINDOW,
};
pub use predictor::{
    FitReport, LinearFit, PredictionOutcome, PredictionRecord, Predictor, PredictorConfig,
    TrainingPair,
};
pub use forecast::{
    forecaster, Capability, Forecast, ForecastPoint, Forecaster, Segment, UnavailableForecaster,
};
#[cfg(feature = "forecast")]
pub use forecast::TrendSeasonalForecaster;
pub use output::{Cell, FlatTable, PUBLISHED_TABLES};
pub use storage::{read_column, read_table, table_summaries, RunHistoryEntry, TableSummary};
pub use context::PipelineContext;
pub use config::PipelineConfig;
pub use pipeline::{IngestionOutcome, IngestionStatus, PipelineRunner, RunReport, TableOutcome, TableStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
