//! Moving averages over reverse-chronological series.

/// Simple moving average of a newest-first series.
///
/// Element `i` of the result averages `values[i..i + period]`, so index 0 is
/// the most recent average. The result has `values.len() - period + 1`
/// entries and is empty when `period` is zero or longer than the series.
pub fn moving_average(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let mut averages = Vec::with_capacity(values.len() - period + 1);
    let mut sum: f64 = values[..period].iter().sum();
    averages.push(sum / period as f64);
    for i in 1..=values.len() - period {
        sum += values[i + period - 1] - values[i - 1];
        averages.push(sum / period as f64);
    }
    averages
}
