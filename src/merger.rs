// 🔗 Merger - N-way time-indexed outer join
//
// Guarantees:
// - one row per period key present in ANY input (full outer join)
// - a metric absent for a period is null, the row is never dropped
// - row set does not depend on input order; column order follows input order
// - rows ascending by period start

use crate::error::{PipelineError, Result};
use crate::period::{Frequency, PeriodKey};
use crate::series::MetricSeries;
use crate::table::UnifiedTable;
use std::collections::BTreeMap;
use tracing::debug;

/// Outer-join `series` (all at `frequency`) into one table keyed by period.
///
/// Observations are bucketed by `PeriodKey::of(frequency, timestamp)`; run the
/// series through the resampler first so each bucket holds one value.
pub fn join_series(frequency: Frequency, series: &[MetricSeries]) -> Result<UnifiedTable> {
    let mut columns: Vec<String> = Vec::with_capacity(series.len());
    let mut cells: BTreeMap<PeriodKey, BTreeMap<String, Option<f64>>> = BTreeMap::new();

    for s in series {
        if s.frequency() != frequency {
            return Err(PipelineError::FrequencyMismatch {
                context: format!("merge of {}", s.name()),
                expected: frequency,
                found: s.frequency(),
            });
        }
        if columns.iter().any(|c| c == s.name()) {
            return Err(PipelineError::invalid(
                format!("merge at {}", frequency),
                format!("metric '{}' supplied twice", s.name()),
            ));
        }
        columns.push(s.name().to_string());

        for obs in s.observations() {
            let key = PeriodKey::of(frequency, obs.timestamp);
            cells
                .entry(key)
                .or_default()
                .insert(s.name().to_string(), obs.value);
        }
    }

    let table = UnifiedTable::from_cells(frequency, columns, cells)?;
    debug!(frequency = %frequency, rows = table.len(), columns = table.columns().len(), "joined series");
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::Observation;
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn quarterly(name: &str, points: &[(u32, f64)]) -> MetricSeries {
        let obs = points
            .iter()
            .map(|(q, v)| {
                Observation::new(NaiveDate::from_ymd_opt(2024, (q - 1) * 3 + 1, 1).unwrap(), Some(*v))
            })
            .collect();
        MetricSeries::new(name, "count", Frequency::Quarterly, obs).unwrap()
    }

    /// Row content independent of column order
    fn row_set(table: &UnifiedTable) -> BTreeSet<String> {
        table
            .rows()
            .iter()
            .map(|r| format!("{}:{:?}", r.period_label, r.values))
            .collect()
    }

    #[test]
    fn test_outer_join_fills_nulls() {
        let a = quarterly("a", &[(1, 1.0), (2, 2.0), (3, 3.0)]);
        let b = quarterly("b", &[(2, 20.0), (3, 30.0), (4, 40.0)]);

        let table = join_series(Frequency::Quarterly, &[a, b]).unwrap();
        assert_eq!(table.len(), 4);

        let first = &table.rows()[0];
        assert_eq!(first.period_label, "2024Q1");
        assert_eq!(first.value("a"), Some(1.0));
        assert_eq!(first.value("b"), None);
        assert!(first.values.contains_key("b"));

        let last = &table.rows()[3];
        assert_eq!(last.value("a"), None);
        assert_eq!(last.value("b"), Some(40.0));
    }

    #[test]
    fn test_join_is_commutative() {
        let a = quarterly("a", &[(1, 1.0), (2, 2.0)]);
        let b = quarterly("b", &[(2, 20.0), (4, 40.0)]);

        let ab = join_series(Frequency::Quarterly, &[a.clone(), b.clone()]).unwrap();
        let ba = join_series(Frequency::Quarterly, &[b, a]).unwrap();

        assert_eq!(row_set(&ab), row_set(&ba));
        assert_eq!(ab.columns(), &["a".to_string(), "b".to_string()]);
        assert_eq!(ba.columns(), &["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn test_join_is_associative() {
        let a = quarterly("a", &[(1, 1.0)]);
        let b = quarterly("b", &[(2, 2.0)]);
        let c = quarterly("c", &[(1, 10.0), (4, 4.0)]);

        let abc = join_series(Frequency::Quarterly, &[a.clone(), b.clone(), c.clone()]).unwrap();
        let cab = join_series(Frequency::Quarterly, &[c, a, b]).unwrap();
        assert_eq!(row_set(&abc), row_set(&cab));
        assert_eq!(abc.len(), 3);
    }

    #[test]
    fn test_join_rejects_mixed_frequencies() {
        let a = quarterly("a", &[(1, 1.0)]);
        let monthly = MetricSeries::new(
            "m",
            "count",
            Frequency::Monthly,
            vec![Observation::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), Some(1.0))],
        )
        .unwrap();

        let err = join_series(Frequency::Quarterly, &[a, monthly]).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::FrequencyMismatch { found: Frequency::Monthly, .. }
        ));
    }

    #[test]
    fn test_join_rejects_duplicate_metric() {
        let a = quarterly("a", &[(1, 1.0)]);
        assert!(join_series(Frequency::Quarterly, &[a.clone(), a]).is_err());
    }

    #[test]
    fn test_join_of_nothing_is_empty() {
        let table = join_series(Frequency::Yearly, &[]).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.frequency(), Frequency::Yearly);
    }
}
