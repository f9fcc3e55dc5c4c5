/// Adjusted exponentially weighted mean series
///
/// Each output is `Σ (1-α)^i · x[t-i] / Σ (1-α)^i`. Entries before
/// `min_periods` observations are `None`.
pub fn ewm_mean_series(values: &[f64], alpha: f64, min_periods: usize) -> Vec<Option<f64>> {
    let decay = 1.0 - alpha;
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    values
        .iter()
        .enumerate()
        .map(|(i, &value)| {
            weighted_sum = weighted_sum * decay + value;
            weight_total = weight_total * decay + 1.0;
            if i + 1 >= min_periods {
                Some(weighted_sum / weight_total)
            } else {
                None
            }
        })
        .collect()
}

/// Exponential Moving Average series for a span (α = 2 / (span + 1))
pub fn ema_series(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span as f64 + 1.0);
    ewm_mean_series(values, alpha, 0)
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ewm_first_value_is_input() {
        let series = ewm_mean_series(&[10.0, 20.0], 0.5, 0);
        assert_eq!(series[0], Some(10.0));
        // (20 + 0.5 * 10) / (1 + 0.5)
        let second = series[1].unwrap();
        assert!((second - 16.666_666_666_666_668).abs() < 1e-12);
    }

    #[test]
    fn test_ewm_min_periods() {
        let series = ewm_mean_series(&[1.0, 2.0, 3.0, 4.0], 0.25, 3);
        assert_eq!(series[0], None);
        assert_eq!(series[1], None);
        assert!(series[2].is_some());
        assert!(series[3].is_some());
    }

    #[test]
    fn test_ema_constant_series() {
        let ema = ema_series(&[5.0; 10], 3);
        assert_eq!(ema.len(), 10);
        assert!(ema.iter().all(|v| (v - 5.0).abs() < 1e-12));
    }

    #[test]
    fn test_ema_follows_trend() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0, 110.0];
        let ema = ema_series(&prices, 5);
        let last = *ema.last().unwrap();
        assert!(last > 104.0 && last < 110.0);
    }
}
