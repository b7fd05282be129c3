// 📈 MetricSeries - one indicator as an ordered, immutable time series

use crate::error::{PipelineError, Result};
use crate::period::Frequency;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One observation of an indicator.
///
/// `labels` holds the categorical metadata columns of the source row
/// (country, unit, source name, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: NaiveDate,
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl Observation {
    pub fn new(timestamp: NaiveDate, value: Option<f64>) -> Self {
        Observation {
            timestamp,
            value,
            labels: BTreeMap::new(),
        }
    }

    /// Builder: add a categorical label
    pub fn with_label(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(column.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    name: String,
    unit: String,
    frequency: Frequency,
    observations: Vec<Observation>,
}

impl MetricSeries {
    /// Build a series. Timestamps must be strictly increasing.
    pub fn new(
        name: impl Into<String>,
        unit: impl Into<String>,
        frequency: Frequency,
        observations: Vec<Observation>,
    ) -> Result<Self> {
        let name = name.into();
        if let Some(pair) = observations
            .windows(2)
            .find(|pair| pair[0].timestamp >= pair[1].timestamp)
        {
            return Err(PipelineError::invalid(
                format!("series '{}'", name),
                format!(
                    "timestamps not strictly increasing at {} -> {}",
                    pair[0].timestamp, pair[1].timestamp
                ),
            ));
        }

        Ok(MetricSeries {
            name,
            unit: unit.into(),
            frequency,
            observations,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn frequency(&self) -> Frequency {
        self.frequency
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn values(&self) -> Vec<Option<f64>> {
        self.observations.iter().map(|o| o.value).collect()
    }

    pub fn has_nulls(&self) -> bool {
        self.observations.iter().any(|o| o.value.is_none())
    }

    /// Copy of the series with null observations removed
    pub fn drop_nulls(&self) -> MetricSeries {
        MetricSeries {
            name: self.name.clone(),
            unit: self.unit.clone(),
            frequency: self.frequency,
            observations: self
                .observations
                .iter()
                .filter(|o| o.value.is_some())
                .cloned()
                .collect(),
        }
    }
}
