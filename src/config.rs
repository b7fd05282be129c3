// ⚙️ Pipeline Configuration
//
// Stored as JSON on disk; every field has a default so a partial file works:
// ```json
// {
//   "database_path": "data/market.db",
//   "sources": { "building_permits": "raw/permits.csv" },
//   "prediction": { "seed": 7 }
// }
// ```
// Relative paths inside the file resolve against the file's directory.

use crate::forecast::MAX_HORIZON;
use crate::predictor::PredictorConfig;
use crate::registry::{Metric, MetricRegistry};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DB_PATH_ENV: &str = "MARKET_DB_PATH";
pub const SEED_ENV: &str = "MARKET_PREDICTION_SEED";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database_path: PathBuf,

    /// Metric name → CSV file
    pub sources: BTreeMap<String, PathBuf>,

    /// A failure to ingest any of these aborts the whole run
    pub required_metrics: Vec<String>,

    pub moving_average_window: usize,
    pub prediction: PredictionSettings,
    pub forecast: ForecastSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionSettings {
    pub feature: String,
    pub target: String,
    pub seed: u64,
    pub validation_fraction: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastSettings {
    pub enabled: bool,
    pub metric: String,
    pub horizon: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let sources = MetricRegistry::standard()
            .iter()
            .map(|def| {
                (
                    def.name().to_string(),
                    PathBuf::from("data").join(format!("{}.csv", def.name())),
                )
            })
            .collect();

        PipelineConfig {
            database_path: PathBuf::from("market_data.db"),
            sources,
            required_metrics: Vec::new(),
            moving_average_window: crate::growth::DEFAULT_MOVING_AVERAGE_WINDOW,
            prediction: PredictionSettings::default(),
            forecast: ForecastSettings::default(),
        }
    }
}

impl Default for PredictionSettings {
    fn default() -> Self {
        PredictionSettings {
            feature: Metric::ResidentialPrices.name().to_string(),
            target: Metric::BuildingPermits.name().to_string(),
            seed: 42,
            validation_fraction: 0.2,
        }
    }
}

impl Default for ForecastSettings {
    fn default() -> Self {
        ForecastSettings {
            enabled: true,
            metric: Metric::BuildingPermits.name().to_string(),
            horizon: 8,
        }
    }
}

impl PredictionSettings {
    pub fn predictor_config(&self) -> PredictorConfig {
        PredictorConfig {
            feature: self.feature.clone(),
            target: self.target.clone(),
            seed: self.seed,
            validation_fraction: self.validation_fraction,
        }
    }
}

impl PipelineConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: PipelineConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        debug!(path = %path.display(), sources = config.sources.len(), "loaded config");
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &PathBuf| if p.is_relative() { base.join(p) } else { p.clone() };
        self.database_path = resolve(&self.database_path);
        for path in self.sources.values_mut() {
            *path = resolve(path);
        }
    }

    /// Apply `MARKET_DB_PATH` and `MARKET_PREDICTION_SEED` if set
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(std::env::var(DB_PATH_ENV).ok(), std::env::var(SEED_ENV).ok())
    }

    fn apply_overrides(&mut self, db_path: Option<String>, seed: Option<String>) -> Result<()> {
        if let Some(db_path) = db_path.filter(|v| !v.trim().is_empty()) {
            self.database_path = PathBuf::from(db_path.trim());
        }
        if let Some(seed) = seed.filter(|v| !v.trim().is_empty()) {
            self.prediction.seed = seed
                .trim()
                .parse()
                .with_context(|| format!("{} must be an unsigned integer, got '{}'", SEED_ENV, seed))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let registry = MetricRegistry::standard();
        let known = |name: &str| registry.by_name(name).is_some();

        for name in self.sources.keys().chain(self.required_metrics.iter()) {
            if !known(name) {
                bail!("unknown metric '{}' in config", name);
            }
        }
        for name in &self.required_metrics {
            if !self.sources.contains_key(name) {
                bail!("required metric '{}' has no source", name);
            }
        }
        for name in [&self.prediction.feature, &self.prediction.target, &self.forecast.metric] {
            if !known(name) {
                bail!("unknown metric '{}' in config", name);
            }
        }

        if self.moving_average_window == 0 {
            bail!("moving_average_window must be at least 1");
        }
        if !(1..=MAX_HORIZON).contains(&self.forecast.horizon) {
            bail!("forecast.horizon must be between 1 and {}", MAX_HORIZON);
        }
        let fraction = self.prediction.validation_fraction;
        if !(0.0..1.0).contains(&fraction) {
            bail!("prediction.validation_fraction must be in [0, 1), got {}", fraction);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.sources.len(), 4);
        assert_eq!(config.moving_average_window, 3);
        assert_eq!(config.forecast.horizon, 8);
        assert_eq!(config.prediction.seed, 42);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.database_path, PathBuf::from("market_data.db"));
    }

    #[test]
    fn test_partial_file_and_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        std::fs::write(
            &path,
            r#"{"database_path": "out/market.db",
                "sources": {"building_permits": "permits.csv"},
                "prediction": {"seed": 7}}"#,
        )
        .unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.database_path, dir.path().join("out/market.db"));
        assert_eq!(config.sources["building_permits"], dir.path().join("permits.csv"));
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.prediction.seed, 7);
        assert_eq!(config.prediction.validation_fraction, 0.2);
    }

    #[test]
    fn test_overrides() {
        let mut config = PipelineConfig::default();
        config
            .apply_overrides(Some("/tmp/x.db".to_string()), Some(" 99 ".to_string()))
            .unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.prediction.seed, 99);

        assert!(config.apply_overrides(None, Some("abc".to_string())).is_err());
    }

    #[test]
    fn test_validation_rules() {
        let mut config = PipelineConfig::default();
        config.moving_average_window = 0;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.forecast.horizon = 13;
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.sources.insert("gdp".to_string(), PathBuf::from("gdp.csv"));
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.sources.remove("building_permits");
        config.required_metrics = vec!["building_permits".to_string()];
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.prediction.validation_fraction = 1.0;
        assert!(config.validate().is_err());
    }
}
