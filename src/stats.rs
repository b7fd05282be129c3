// Numeric helpers shared by the resampler, growth calculator and predictor

/// Round half away from zero to 2 decimals
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Mean of the present values; `None` when nothing is present
pub fn mean_of_present<I>(values: I) -> Option<f64>
where
    I: IntoIterator<Item = Option<f64>>,
{
    let (sum, count) = values
        .into_iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Percent change from `previous` to `current`, rounded to 2 decimals.
///
/// Null when either side is null or `previous` is zero.
pub fn pct_change(current: Option<f64>, previous: Option<f64>) -> Option<f64> {
    match (current, previous) {
        (Some(cur), Some(prev)) if prev != 0.0 => Some(round2((cur - prev) / prev * 100.0)),
        _ => None,
    }
}
