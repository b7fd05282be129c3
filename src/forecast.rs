// 🔮 Forecaster - optional multi-period forecasting capability
//
// Callers ask `capability()` first. When the active model is not compiled in
// (cargo feature `forecast`) or disabled in config, the stub answers
// `Unavailable` and every forecast call fails with ForecastUnavailable.

use crate::error::{PipelineError, Result};
use crate::series::MetricSeries;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const MAX_HORIZON: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    Available,
    Unavailable { reason: String },
}

impl Capability {
    pub fn is_available(&self) -> bool {
        matches!(self, Capability::Available)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Segment {
    /// Back-fitted value for an observed period
    History,
    /// Future period
    Forecast,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Segment::History => "history",
            Segment::Forecast => "forecast",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    pub timestamp: NaiveDate,
    pub segment: Segment,
    pub actual: Option<f64>,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub metric: String,
    pub horizon: usize,
    pub points: Vec<ForecastPoint>,
}

impl Forecast {
    pub fn future(&self) -> impl Iterator<Item = &ForecastPoint> {
        self.points.iter().filter(|p| p.segment == Segment::Forecast)
    }
}

pub trait Forecaster {
    fn capability(&self) -> Capability;

    /// Forecast `horizon` (1..=12) months past the end of a null-free monthly series
    fn forecast(&self, series: &MetricSeries, horizon: usize) -> Result<Forecast>;
}

/// Stub used when forecasting is not available in this build or run
#[derive(Debug, Clone)]
pub struct UnavailableForecaster {
    reason: String,
}

impl UnavailableForecaster {
    pub fn new(reason: impl Into<String>) -> Self {
        UnavailableForecaster {
            reason: reason.into(),
        }
    }
}

impl Forecaster for UnavailableForecaster {
    fn capability(&self) -> Capability {
        Capability::Unavailable {
            reason: self.reason.clone(),
        }
    }

    fn forecast(&self, _series: &MetricSeries, _horizon: usize) -> Result<Forecast> {
        Err(PipelineError::ForecastUnavailable(self.reason.clone()))
    }
}

/// Pick the forecaster for this build and config flag
pub fn forecaster(enabled: bool) -> Box<dyn Forecaster> {
    if !enabled {
        return Box::new(UnavailableForecaster::new("forecasting disabled in configuration"));
    }

    #[cfg(feature = "forecast")]
    {
        Box::new(trend::TrendSeasonalForecaster::default())
    }

    #[cfg(not(feature = "forecast"))]
    {
        Box::new(UnavailableForecaster::new(
            "built without the `forecast` feature",
        ))
    }
}

#[cfg_attr(not(feature = "forecast"), allow(dead_code))]
fn validate_input(series: &MetricSeries, horizon: usize) -> Result<()> {
    use crate::period::Frequency;

    if series.frequency() != Frequency::Monthly {
        return Err(PipelineError::FrequencyMismatch {
            context: format!("forecast of {}", series.name()),
            expected: Frequency::Monthly,
            found: series.frequency(),
        });
    }
    if !(1..=MAX_HORIZON).contains(&horizon) {
        return Err(PipelineError::invalid(
            format!("forecast of {}", series.name()),
            format!("horizon must be 1..={}, got {}", MAX_HORIZON, horizon),
        ));
    }
    if series.has_nulls() {
        return Err(PipelineError::invalid(
            format!("forecast of {}", series.name()),
            "series contains null values",
        ));
    }
    Ok(())
}

#[cfg(feature = "forecast")]
pub use trend::TrendSeasonalForecaster;

#[cfg(feature = "forecast")]
mod trend {
    use super::*;
    use crate::period::{Frequency, PeriodKey};
    use crate::predictor::LinearFit;
    use chrono::Datelike;
    use tracing::info;

    const MIN_OBSERVATIONS: usize = 3;

    /// Seasonal factors need at least two full years of observations
    const MIN_SEASONAL_OBSERVATIONS: usize = 24;

    /// z for a two-sided 80% interval
    const INTERVAL_Z: f64 = 1.2816;

    /// Months since year 0, so gaps in a series keep their calendar spacing
    fn month_number(date: NaiveDate) -> i64 {
        date.year() as i64 * 12 + date.month0() as i64
    }

    /// Linear trend on the calendar month plus additive month-of-year factors.
    ///
    /// The trend is indexed by months since the first observation, so a
    /// series with missing months is fitted on its real dates. Shorter series
    /// get a pure trend. Bounds widen with the distance past the last month.
    #[derive(Debug, Clone)]
    pub struct TrendSeasonalForecaster {
        pub interval_z: f64,
    }

    impl Default for TrendSeasonalForecaster {
        fn default() -> Self {
            TrendSeasonalForecaster {
                interval_z: INTERVAL_Z,
            }
        }
    }

    impl TrendSeasonalForecaster {
        fn seasonal_factors(&self, series: &MetricSeries, offsets: &[f64], fit: &LinearFit) -> [f64; 12] {
            let mut factors = [0.0; 12];
            if series.len() < MIN_SEASONAL_OBSERVATIONS {
                return factors;
            }

            let mut sums = [0.0; 12];
            let mut counts = [0usize; 12];
            for (obs, &x) in series.observations().iter().zip(offsets) {
                let month = obs.timestamp.month0() as usize;
                let detrended = obs.value.unwrap_or_default() - fit.predict(x);
                sums[month] += detrended;
                counts[month] += 1;
            }

            let present: Vec<usize> = (0..12).filter(|&m| counts[m] > 0).collect();
            for &m in &present {
                factors[m] = sums[m] / counts[m] as f64;
            }
            let mean = present.iter().map(|&m| factors[m]).sum::<f64>() / present.len() as f64;
            for &m in &present {
                factors[m] -= mean;
            }
            factors
        }
    }

    impl Forecaster for TrendSeasonalForecaster {
        fn capability(&self) -> Capability {
            Capability::Available
        }

        fn forecast(&self, series: &MetricSeries, horizon: usize) -> Result<Forecast> {
            validate_input(series, horizon)?;
            if series.len() < MIN_OBSERVATIONS {
                return Err(PipelineError::InsufficientData {
                    context: format!("forecast of {}", series.name()),
                    required: MIN_OBSERVATIONS,
                    actual: series.len(),
                });
            }

            let observations = series.observations();
            let first = month_number(observations[0].timestamp);
            let offsets: Vec<f64> = observations
                .iter()
                .map(|obs| (month_number(obs.timestamp) - first) as f64)
                .collect();
            let ys: Vec<f64> = series.values().into_iter().flatten().collect();

            let fit = LinearFit::fit(&offsets, &ys)?;
            let factors = self.seasonal_factors(series, &offsets, &fit);

            let model = |x: f64, date: NaiveDate| fit.predict(x) + factors[date.month0() as usize];

            let mut points = Vec::with_capacity(series.len() + horizon);
            let mut ss_res = 0.0;
            for ((obs, &x), &y) in observations.iter().zip(&offsets).zip(&ys) {
                let value = model(x, obs.timestamp);
                ss_res += (y - value).powi(2);
                points.push(ForecastPoint {
                    timestamp: obs.timestamp,
                    segment: Segment::History,
                    actual: obs.value,
                    value,
                    lower: value,
                    upper: value,
                });
            }

            let n = ys.len();
            let sigma = (ss_res / (n - 2) as f64).sqrt();
            for point in points.iter_mut() {
                point.lower = point.value - self.interval_z * sigma;
                point.upper = point.value + self.interval_z * sigma;
            }

            // Calendar months covered by the history, gaps included
            let last_offset = offsets.last().copied().unwrap_or_default();
            let span = last_offset + 1.0;

            let mut period = PeriodKey::of(Frequency::Monthly, observations[n - 1].timestamp);
            for step in 1..=horizon {
                period = period.next();
                let timestamp = period.start();
                let value = model(last_offset + step as f64, timestamp);
                let spread = self.interval_z * sigma * (1.0 + step as f64 / span).sqrt();
                points.push(ForecastPoint {
                    timestamp,
                    segment: Segment::Forecast,
                    actual: None,
                    value,
                    lower: value - spread,
                    upper: value + spread,
                });
            }

            info!(
                metric = series.name(),
                observations = n,
                horizon,
                slope = fit.slope,
                sigma,
                "forecast built"
            );

            Ok(Forecast {
                metric: series.name().to_string(),
                horizon,
                points,
            })
        }
    }
}
