// 🏛️ Metric Registry - the closed catalog of indicators
// Pipeline, storage layout and CLI all read column sets from here

use crate::period::Frequency;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// METRIC
// ============================================================================

/// The indicators this pipeline knows about. Adding one is a code change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    BuildingPermits,
    PriceToRentRatio,
    ConstructionOutput,
    ResidentialPrices,
}

impl Metric {
    /// Column name used in every table
    pub fn name(&self) -> &'static str {
        match self {
            Metric::BuildingPermits => "building_permits",
            Metric::PriceToRentRatio => "price_to_rent_ratio",
            Metric::ConstructionOutput => "construction_output",
            Metric::ResidentialPrices => "residential_prices",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricRegistry::standard()
            .iter()
            .find(|def| def.metric.name() == s.trim())
            .map(|def| def.metric)
            .ok_or_else(|| format!("unknown metric '{}'", s.trim()))
    }
}

// ============================================================================
// METRIC DEFINITION
// ============================================================================

/// MetricDefinition - what an indicator is and where it can appear
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub metric: Metric,

    /// Unit of the raw values (e.g. "count", "percent")
    pub unit: String,

    /// Frequency the source publishes at
    pub native_frequency: Frequency,

    /// Prefix used in growth tables: `current_<short>`, `<short>_qoq_pct`
    pub short_name: String,

    pub description: String,
}

impl MetricDefinition {
    pub fn new(metric: Metric, unit: impl Into<String>, native_frequency: Frequency) -> Self {
        MetricDefinition {
            metric,
            unit: unit.into(),
            native_frequency,
            short_name: metric.name().to_string(),
            description: String::new(),
        }
    }

    /// Builder: growth table prefix
    pub fn with_short_name(mut self, short: impl Into<String>) -> Self {
        self.short_name = short.into();
        self
    }

    /// Builder: add description
    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn name(&self) -> &'static str {
        self.metric.name()
    }

    /// A metric is available at its native frequency and every coarser one
    pub fn is_available_at(&self, frequency: Frequency) -> bool {
        self.native_frequency.can_resample_to(frequency)
    }
}

// ============================================================================
// METRIC REGISTRY
// ============================================================================

/// MetricRegistry - single source of truth for indicator columns.
///
/// Registration order is the column order of the unified tables.
#[derive(Debug, Clone)]
pub struct MetricRegistry {
    definitions: Vec<MetricDefinition>,
}

impl MetricRegistry {
    /// The four German construction market indicators
    pub fn standard() -> Self {
        MetricRegistry {
            definitions: vec![
                MetricDefinition::new(Metric::BuildingPermits, "count", Frequency::Monthly)
                    .with_short_name("permits")
                    .with_description("Residential building permits granted"),
                MetricDefinition::new(Metric::PriceToRentRatio, "index", Frequency::Quarterly)
                    .with_short_name("ratio")
                    .with_description("House price to rent ratio"),
                MetricDefinition::new(Metric::ConstructionOutput, "percent", Frequency::Monthly)
                    .with_short_name("output")
                    .with_description("Construction output, change on a year earlier"),
                MetricDefinition::new(Metric::ResidentialPrices, "percent", Frequency::Quarterly)
                    .with_short_name("prices")
                    .with_description("Residential property prices, change on a year earlier"),
            ],
        }
    }

    pub fn get(&self, metric: Metric) -> Option<&MetricDefinition> {
        self.definitions.iter().find(|d| d.metric == metric)
    }

    pub fn by_name(&self, name: &str) -> Option<&MetricDefinition> {
        self.definitions.iter().find(|d| d.name() == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricDefinition> {
        self.definitions.iter()
    }

    /// Metrics that can be shown at `frequency`, in table column order
    pub fn available_at(&self, frequency: Frequency) -> Vec<&MetricDefinition> {
        self.definitions
            .iter()
            .filter(|d| d.is_available_at(frequency))
            .collect()
    }

    /// Metric order of the growth tables (permits, prices, ratio, output)
    pub fn growth_order(&self) -> Vec<&MetricDefinition> {
        [
            Metric::BuildingPermits,
            Metric::ResidentialPrices,
            Metric::PriceToRentRatio,
            Metric::ConstructionOutput,
        ]
        .iter()
        .filter_map(|m| self.get(*m))
        .collect()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
