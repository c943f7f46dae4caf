//! Built-in signal providers

pub mod mean_reversion;
pub mod trend;

pub use mean_reversion::MeanReversionProvider;
pub use trend::TrendProvider;

/// Mean of the last `period` values, `None` if there are fewer
pub(crate) fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Mean and population standard deviation of the last `period` values
pub(crate) fn mean_std(values: &[f64], period: usize) -> Option<(f64, f64)> {
    let mean = sma(values, period)?;
    let window = &values[values.len() - period..];
    let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / period as f64;
    Some((mean, variance.sqrt()))
}
