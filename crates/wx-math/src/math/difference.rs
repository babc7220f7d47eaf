//! Series differencing.

/// One round of differencing at the given lag: `y_t = x_t - x_{t-lag}`.
///
/// The output is `lag` elements shorter than the input; a lag of zero or a
/// series no longer than the lag yields an empty vector.
pub fn difference(xs: &[f64], lag: usize) -> Vec<f64> {
    if lag == 0 || xs.len() <= lag {
        return Vec::new();
    }
    (lag..xs.len()).map(|t| xs[t] - xs[t - lag]).collect()
}

/// Every order of differencing from 0 (the input) through `order`.
///
/// `result[d]` is the series after `d` rounds; it is `d * lag` elements
/// shorter than the input. Orders stop at the first empty round, so the
/// result can hold fewer than `order + 1` entries.
pub fn difference_n(xs: &[f64], lag: usize, order: usize) -> Vec<Vec<f64>> {
    let mut out = vec![xs.to_vec()];
    for _ in 0..order {
        let Some(prev) = out.last() else { break };
        if lag == 0 || prev.len() <= lag {
            break;
        }
        let next = difference(prev, lag);
        out.push(next);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_difference() {
        assert_eq!(difference(&[1.0, 4.0, 9.0, 16.0], 1), vec![3.0, 5.0, 7.0]);
    }

    #[test]
    fn second_difference_of_quadratic_is_constant() {
        let xs: Vec<f64> = (0..6).map(|t| (t * t) as f64).collect();
        let orders = difference_n(&xs, 1, 2);
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[0], xs);
        assert!(orders[2].iter().all(|v| (*v - 2.0).abs() < 1e-12));
        assert_eq!(orders[2].len(), 4);
    }

    #[test]
    fn seasonal_difference() {
        let xs = [1.0, 2.0, 3.0, 11.0, 12.0, 13.0];
        assert_eq!(difference(&xs, 3), vec![10.0, 10.0, 10.0]);
    }

    #[test]
    fn short_series_runs_out() {
        let orders = difference_n(&[1.0, 2.0], 1, 3);
        assert_eq!(orders.len(), 2);
        assert_eq!(orders[1], vec![1.0]);
    }

    #[test]
    fn huge_order_on_short_series_stops_early() {
        let orders = difference_n(&[1.0, 2.0, 3.0], 1, u32::MAX as usize);
        assert_eq!(orders.len(), 3);
        assert_eq!(orders[1], vec![1.0, 1.0]);
        assert_eq!(orders[2], vec![0.0]);
    }

    #[test]
    fn zero_lag_yields_only_the_input() {
        assert_eq!(difference_n(&[1.0, 2.0], 0, 4).len(), 1);
    }
}
