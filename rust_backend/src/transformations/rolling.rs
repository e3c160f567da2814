//! Trailing-window helpers over ascending bucket sequences.

/// For each position `i` of the ascending `starts`, the index of the first
/// entry inside `[starts[i] - span, starts[i]]`.
///
/// The window never reaches past `i`, so no value after the current bucket
/// can contribute to it.
///
/// ```
/// use training_analytics::transformations::rolling::trailing_window_starts;
///
/// // Buckets on days 0, 1, 3 and 4 with a two-day span
/// let lows = trailing_window_starts(&[0, 86_400, 259_200, 345_600], 172_800);
/// assert_eq!(lows, vec![0, 0, 1, 2]);
/// ```
pub fn trailing_window_starts(starts: &[i64], span: i64) -> Vec<usize> {
    let mut lows = Vec::with_capacity(starts.len());
    let mut low = 0;
    for (i, &start) in starts.iter().enumerate() {
        let floor = start.saturating_sub(span);
        while low < i && starts[low] < floor {
            low += 1;
        }
        lows.push(low);
    }
    lows
}

/// Arithmetic mean; 0.0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Least-squares slope of `ys` against `xs`.
///
/// Returns 0.0 with fewer than two points or when every `x` is equal.
pub fn least_squares_slope(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }

    let x_mean = mean(&xs[..n]);
    let y_mean = mean(&ys[..n]);

    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (x, y) in xs.iter().zip(ys.iter()).take(n) {
        let dx = x - x_mean;
        covariance += dx * (y - y_mean);
        variance += dx * dx;
    }

    if variance == 0.0 {
        0.0
    } else {
        covariance / variance
    }
}
