//! Next-period point prediction from a single explanatory feature.
//!
//! Pairs each period's feature value with the target one row later, fits
//! ordinary least squares in closed form, and applies the fit to the latest
//! feature value. An optional seeded train/validation split reports fit error.

use crate::error::{PipelineError, Result};
use crate::period::PeriodKey;
use crate::table::UnifiedTable;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const MIN_TRAINING_PAIRS: usize = 2;

/// Splits are only attempted when both sides keep at least two pairs
const MIN_PAIRS_FOR_SPLIT: usize = 4;

// ============================================================================
// LINEAR FIT
// ============================================================================

/// y = intercept + slope * x
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub n_observations: usize,
}

impl LinearFit {
    /// Closed-form OLS. A constant feature yields slope 0 and the target mean.
    pub fn fit(xs: &[f64], ys: &[f64]) -> Result<Self> {
        if xs.len() != ys.len() {
            return Err(PipelineError::invalid(
                "linear fit",
                format!("{} features vs {} targets", xs.len(), ys.len()),
            ));
        }
        if xs.len() < MIN_TRAINING_PAIRS {
            return Err(PipelineError::InsufficientData {
                context: "linear fit".to_string(),
                required: MIN_TRAINING_PAIRS,
                actual: xs.len(),
            });
        }

        let n = xs.len() as f64;
        let mean_x = xs.iter().sum::<f64>() / n;
        let mean_y = ys.iter().sum::<f64>() / n;

        let sxx: f64 = xs.iter().map(|x| (x - mean_x).powi(2)).sum();
        let sxy: f64 = xs
            .iter()
            .zip(ys)
            .map(|(x, y)| (x - mean_x) * (y - mean_y))
            .sum();

        let slope = if sxx.abs() < 1e-12 { 0.0 } else { sxy / sxx };
        let intercept = mean_y - slope * mean_x;

        let ss_tot: f64 = ys.iter().map(|y| (y - mean_y).powi(2)).sum();
        let ss_res: f64 = xs
            .iter()
            .zip(ys)
            .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
            .sum();
        let r_squared = if ss_tot > 1e-12 { 1.0 - ss_res / ss_tot } else { 1.0 };

        Ok(LinearFit {
            slope,
            intercept,
            r_squared,
            n_observations: xs.len(),
        })
    }

    pub fn predict(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

// ============================================================================
// TRAINING DATA
// ============================================================================

/// feature at `period`, target one row later
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingPair {
    pub period: PeriodKey,
    pub feature: f64,
    pub target: f64,
}

/// Pairs `(feature_t, target_{t+1})`, dropping any with a null side
pub fn training_pairs(table: &UnifiedTable, feature: &str, target: &str) -> Result<Vec<TrainingPair>> {
    let features = table.column(feature)?;
    let targets = table.column(target)?;

    Ok(table
        .rows()
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(i, _)| match (features[i - 1], targets[i]) {
            (Some(feature), Some(target)) => Some(TrainingPair {
                period: table.rows()[i - 1].period_key,
                feature,
                target,
            }),
            _ => None,
        })
        .collect())
}

// ============================================================================
// PREDICTOR
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictorConfig {
    pub feature: String,
    pub target: String,

    /// Seed for the validation shuffle
    pub seed: u64,

    /// Share of pairs held out for validation; 0 disables the split
    pub validation_fraction: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub as_of_period: PeriodKey,
    pub as_of_label: String,
    pub feature_value: f64,
    /// Counts, so rounded to whole units
    pub predicted_value: i64,
    pub actual_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitReport {
    pub fit: LinearFit,
    pub seed: u64,
    pub train_size: usize,
    pub validation_size: usize,
    pub validation_mae: Option<f64>,
    pub validation_rmse: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutcome {
    pub record: PredictionRecord,
    pub report: FitReport,
}

pub struct Predictor {
    config: PredictorConfig,
}

impl Predictor {
    pub fn new(config: PredictorConfig) -> Self {
        Predictor { config }
    }

    pub fn config(&self) -> &PredictorConfig {
        &self.config
    }

    /// Fit on all pairs and report validation error from a seeded split
    pub fn fit(&self, pairs: &[TrainingPair]) -> Result<FitReport> {
        if pairs.len() < MIN_TRAINING_PAIRS {
            return Err(PipelineError::InsufficientData {
                context: format!("prediction of {} from {}", self.config.target, self.config.feature),
                required: MIN_TRAINING_PAIRS,
                actual: pairs.len(),
            });
        }

        let (xs, ys): (Vec<f64>, Vec<f64>) = pairs.iter().map(|p| (p.feature, p.target)).unzip();
        let fit = LinearFit::fit(&xs, &ys)?;

        let (train_size, validation_size, validation_mae, validation_rmse) =
            match self.validation_split(pairs.len()) {
                Some((train_idx, validation_idx)) => {
                    let train_x: Vec<f64> = train_idx.iter().map(|&i| xs[i]).collect();
                    let train_y: Vec<f64> = train_idx.iter().map(|&i| ys[i]).collect();
                    let partial = LinearFit::fit(&train_x, &train_y)?;

                    let errors: Vec<f64> = validation_idx
                        .iter()
                        .map(|&i| ys[i] - partial.predict(xs[i]))
                        .collect();
                    let n = errors.len() as f64;
                    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
                    let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt();
                    (train_idx.len(), validation_idx.len(), Some(mae), Some(rmse))
                }
                None => (pairs.len(), 0, None, None),
            };

        debug!(
            slope = fit.slope,
            intercept = fit.intercept,
            r_squared = fit.r_squared,
            train_size,
            validation_size,
            "fitted predictor"
        );

        Ok(FitReport {
            fit,
            seed: self.config.seed,
            train_size,
            validation_size,
            validation_mae,
            validation_rmse,
        })
    }

    /// Shuffled (train, validation) index sets; `None` when no split applies
    fn validation_split(&self, n: usize) -> Option<(Vec<usize>, Vec<usize>)> {
        let fraction = self.config.validation_fraction;
        if n < MIN_PAIRS_FOR_SPLIT || !(fraction > 0.0 && fraction < 1.0) {
            return None;
        }

        let validation_len = ((n as f64 * fraction).floor() as usize)
            .max(1)
            .min(n - MIN_TRAINING_PAIRS);

        let mut indices: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        indices.shuffle(&mut rng);

        let validation = indices.split_off(n - validation_len);
        Some((indices, validation))
    }

    /// Forecast the target for the period after the latest known feature value
    pub fn predict_next(&self, table: &UnifiedTable) -> Result<PredictionOutcome> {
        let pairs = training_pairs(table, &self.config.feature, &self.config.target)?;
        let report = self.fit(&pairs)?;

        let features = table.column(&self.config.feature)?;
        let targets = table.column(&self.config.target)?;

        let Some(latest) = (0..table.len()).rev().find(|&i| features[i].is_some()) else {
            return Err(PipelineError::InsufficientData {
                context: format!("latest value of {}", self.config.feature),
                required: 1,
                actual: 0,
            });
        };
        let feature_value = features[latest].unwrap_or_default();

        // Realized target at the as-of period, else the most recent one before it
        let actual_value = (0..=latest).rev().find_map(|i| targets[i]);

        let row = &table.rows()[latest];
        let record = PredictionRecord {
            as_of_period: row.period_key,
            as_of_label: row.period_label.clone(),
            feature_value,
            predicted_value: report.fit.predict(feature_value).round() as i64,
            actual_value,
        };

        info!(
            as_of = %record.as_of_label,
            feature = feature_value,
            predicted = record.predicted_value,
            pairs = pairs.len(),
            "predicted next period"
        );

        Ok(PredictionOutcome { record, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merger::join_series;
    use crate::period::Frequency;
    use crate::series::{MetricSeries, Observation};
    use chrono::NaiveDate;

    fn config(seed: u64, validation_fraction: f64) -> PredictorConfig {
        PredictorConfig {
            feature: "residential_prices".to_string(),
            target: "building_permits".to_string(),
            seed,
            validation_fraction,
        }
    }

    fn quarterly(name: &str, values: &[Option<f64>]) -> MetricSeries {
        let obs = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let year = 2020 + (i / 4) as i32;
                let month = (i % 4) as u32 * 3 + 1;
                Observation::new(NaiveDate::from_ymd_opt(year, month, 1).unwrap(), *v)
            })
            .collect();
        MetricSeries::new(name, "x", Frequency::Quarterly, obs).unwrap()
    }

    fn pair(feature: f64, target: f64) -> TrainingPair {
        TrainingPair {
            period: PeriodKey::Quarter { year: 2024, quarter: 1 },
            feature,
            target,
        }
    }

    #[test]
    fn test_linear_fit_exact() {
        let fit = LinearFit::fit(&[100.0, 200.0, 300.0], &[200.0, 400.0, 600.0]).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!(fit.intercept.abs() < 1e-9);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
        assert_eq!(fit.predict(200.0).round(), 400.0);
        assert_eq!(fit.predict(400.0).round(), 800.0);
    }

    #[test]
    fn test_linear_fit_constant_feature() {
        let fit = LinearFit::fit(&[5.0, 5.0, 5.0], &[1.0, 2.0, 6.0]).unwrap();
        assert_eq!(fit.slope, 0.0);
        assert!((fit.intercept - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_linear_fit_needs_two_points() {
        assert!(matches!(
            LinearFit::fit(&[1.0], &[2.0]),
            Err(PipelineError::InsufficientData { required: 2, actual: 1, .. })
        ));
    }

    #[test]
    fn test_training_pairs_shift_target_and_drop_nulls() {
        let prices = quarterly("residential_prices", &[Some(1.0), Some(2.0), None, Some(4.0)]);
        let permits = quarterly("building_permits", &[Some(10.0), Some(20.0), Some(30.0), None]);
        let table = join_series(Frequency::Quarterly, &[prices, permits]).unwrap();

        let pairs = training_pairs(&table, "residential_prices", "building_permits").unwrap();
        // (1 -> 20), (2 -> 30); (null -> null) and (4 -> nothing) dropped
        assert_eq!(pairs.len(), 2);
        assert_eq!((pairs[0].feature, pairs[0].target), (1.0, 20.0));
        assert_eq!((pairs[1].feature, pairs[1].target), (2.0, 30.0));
        assert_eq!(pairs[0].period, PeriodKey::Quarter { year: 2020, quarter: 1 });
    }

    #[test]
    fn test_fit_insufficient_pairs() {
        let predictor = Predictor::new(config(42, 0.0));
        let err = predictor.fit(&[pair(1.0, 2.0)]).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientData { .. }));
    }

    #[test]
    fn test_predict_next_scenario() {
        // features 100, 200, 300, 400; permits follow at 2x one quarter later
        let prices = quarterly("residential_prices", &[Some(100.0), Some(200.0), Some(300.0), Some(400.0)]);
        let permits = quarterly("building_permits", &[None, Some(200.0), Some(400.0), Some(600.0)]);
        let table = join_series(Frequency::Quarterly, &[prices, permits]).unwrap();

        let predictor = Predictor::new(config(7, 0.0));
        let outcome = predictor.predict_next(&table).unwrap();

        assert_eq!(outcome.record.as_of_label, "2020Q4");
        assert_eq!(outcome.record.feature_value, 400.0);
        assert_eq!(outcome.record.predicted_value, 800);
        assert_eq!(outcome.record.actual_value, Some(600.0));
        assert_eq!(outcome.report.train_size, 3);
        assert_eq!(outcome.report.validation_size, 0);
    }

    #[test]
    fn test_actual_value_falls_back_to_latest_known() {
        let prices = quarterly("residential_prices", &[Some(1.0), Some(2.0), Some(3.0), Some(4.0)]);
        let permits = quarterly("building_permits", &[Some(5.0), Some(7.0), Some(9.0), None]);
        let table = join_series(Frequency::Quarterly, &[prices, permits]).unwrap();

        let outcome = Predictor::new(config(1, 0.0)).predict_next(&table).unwrap();
        assert_eq!(outcome.record.actual_value, Some(9.0));
        // fit through (1, 7) and (2, 9): 5 + 2x at x = 4
        assert_eq!(outcome.record.predicted_value, 13);
    }

    #[test]
    fn test_seeded_split_is_reproducible() {
        let pairs: Vec<TrainingPair> = (0..10)
            .map(|i| pair(i as f64, 3.0 * i as f64 + if i % 2 == 0 { 1.0 } else { -1.0 }))
            .collect();

        let predictor = Predictor::new(config(1234, 0.3));
        let a = predictor.fit(&pairs).unwrap();
        let b = predictor.fit(&pairs).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.validation_size, 3);
        assert_eq!(a.train_size, 7);
        assert!(a.validation_mae.is_some());
        assert!(a.validation_rmse.unwrap() + 1e-9 >= a.validation_mae.unwrap());
    }

    #[test]
    fn test_split_does_not_change_published_fit() {
        let pairs: Vec<TrainingPair> = (0..8).map(|i| pair(i as f64, 2.0 * i as f64 + 1.0)).collect();

        let with_split = Predictor::new(config(9, 0.25)).fit(&pairs).unwrap();
        let without = Predictor::new(config(9, 0.0)).fit(&pairs).unwrap();
        assert_eq!(with_split.fit, without.fit);
        assert!(with_split.validation_mae.unwrap() < 1e-9);
    }
}
