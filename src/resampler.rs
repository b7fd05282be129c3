// 🪣 Resampler - month → quarter → year
//
// Numeric values: mean of the observations in the bucket, rounded to 2 decimals
// Categorical labels: last non-missing value in the bucket
// Buckets come from the full observed range, so empty buckets become null rows

use crate::error::{PipelineError, Result};
use crate::merger::join_series;
use crate::period::{Frequency, PeriodKey};
use crate::series::{MetricSeries, Observation};
use crate::stats::{mean_of_present, round2};
use crate::table::UnifiedTable;
use std::collections::BTreeMap;
use tracing::debug;

/// Down-sample `series` to `target`. Same-frequency resampling is a no-op on values.
pub fn resample(series: &MetricSeries, target: Frequency) -> Result<MetricSeries> {
    if !series.frequency().can_resample_to(target) {
        return Err(PipelineError::FrequencyMismatch {
            context: format!("resample of {} (cannot up-sample)", series.name()),
            expected: target,
            found: series.frequency(),
        });
    }

    let mut buckets: BTreeMap<PeriodKey, Vec<&Observation>> = BTreeMap::new();
    for obs in series.observations() {
        buckets
            .entry(PeriodKey::of(target, obs.timestamp))
            .or_default()
            .push(obs);
    }

    let (Some(first), Some(last)) = (
        buckets.keys().next().copied(),
        buckets.keys().next_back().copied(),
    ) else {
        return MetricSeries::new(series.name(), series.unit(), target, Vec::new());
    };

    let mut observations = Vec::new();
    for key in PeriodKey::range_inclusive(first, last) {
        let mut resampled = Observation::new(key.start(), None);

        if let Some(members) = buckets.get(&key) {
            resampled.value = mean_of_present(members.iter().map(|o| o.value)).map(round2);

            // Members are in timestamp order, so later inserts win
            for member in members {
                for (column, label) in &member.labels {
                    resampled.labels.insert(column.clone(), label.clone());
                }
            }
        }

        observations.push(resampled);
    }

    debug!(
        indicator = series.name(),
        from = %series.frequency(),
        to = %target,
        input = series.len(),
        output = observations.len(),
        "resampled series"
    );

    MetricSeries::new(series.name(), series.unit(), target, observations)
}

/// Resample every column of a unified table and re-join at `target`
pub fn resample_table(table: &UnifiedTable, target: Frequency) -> Result<UnifiedTable> {
    let mut resampled = Vec::with_capacity(table.columns().len());
    for column in table.columns() {
        let observations = table
            .rows()
            .iter()
            .map(|row| Observation::new(row.timestamp, row.value(column)))
            .collect();
        let series = MetricSeries::new(column.as_str(), "", table.frequency(), observations)?;
        resampled.push(resample(&series, target)?);
    }
    join_series(target, &resampled)
}
