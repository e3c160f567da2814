//! Heart-rate series cleaning.
//!
//! Device heart-rate streams are aggregated: each value summarizes
//! `recording_rate` ticks. The steps below repair gaps and spikes and then
//! spread the series back out to one value per tick. A missing value is
//! `None` throughout.

/// Split a comma-separated stream. Anything that is not a finite number
/// (`null`, `abc`, empty) becomes `None`.
pub fn parse_series(data: &str) -> Vec<Option<f64>> {
    if data.trim().is_empty() {
        return Vec::new();
    }

    data.split(',')
        .map(|token| {
            token
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
        })
        .collect()
}

/// Replace each missing value with the one before it.
///
/// A missing value at the start stays missing, and so does every value
/// after it until the first present one.
pub fn forward_fill(values: &mut [Option<f64>]) {
    for i in 1..values.len() {
        if values[i].is_none() {
            values[i] = values[i - 1];
        }
    }
}

/// Flatten interior spikes.
///
/// Walking left to right, a value whose jump from its (already cleaned)
/// predecessor exceeds `threshold` is replaced by that predecessor. The first
/// and last values are never touched, nor are values next to a gap.
pub fn flatten_jumps(values: &mut [Option<f64>], threshold: f64) {
    if values.len() < 3 {
        return;
    }

    for i in 1..values.len() - 1 {
        if let (Some(prev), Some(curr), Some(_)) = (values[i - 1], values[i], values[i + 1]) {
            if (curr - prev).abs() > threshold {
                values[i] = Some(prev);
            }
        }
    }
}

/// Linear interpolation with `steps` values per interval.
///
/// `n` input values give `steps * (n - 1)` outputs; the last input value is
/// the end point of the final interval and is not emitted itself. An
/// interval with a missing end yields `steps` missing values.
///
/// ```
/// use training_analytics::activity::heart_rate::upsample;
///
/// let out = upsample(&[Some(100.0), Some(110.0)], 5);
/// assert_eq!(out, vec![Some(100.0), Some(102.0), Some(104.0), Some(106.0), Some(108.0)]);
/// ```
pub fn upsample(values: &[Option<f64>], steps: u32) -> Vec<Option<f64>> {
    if steps == 0 {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(values.len().saturating_sub(1) * steps as usize);
    for pair in values.windows(2) {
        match (pair[0], pair[1]) {
            (Some(h0), Some(h1)) => {
                for j in 0..steps {
                    let alpha = f64::from(j) / f64::from(steps);
                    out.push(Some(h0 + alpha * (h1 - h0)));
                }
            }
            _ => out.extend(std::iter::repeat(None).take(steps as usize)),
        }
    }
    out
}
