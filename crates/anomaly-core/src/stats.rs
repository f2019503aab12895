//! Statistics helpers shared by the feature builder, the scorers and the combiner.
//!
//! Rolling functions follow trailing-window semantics: the value at position `i`
//! is computed from positions `i + 1 - window ..= i` and is `None` until a full
//! window of present values is available. Results that are not finite
//! (e.g. division by a zero standard deviation) are reported as `None`.

use statrs::statistics::Statistics;

/// Guard added to standard deviations before dividing.
pub const STD_EPSILON: f64 = 1e-12;

/// Sample mean and unbiased (n - 1) standard deviation. `None` below two points.
pub fn mean_std(data: &[f64]) -> Option<(f64, f64)> {
    if data.len() < 2 {
        return None;
    }
    let mean = data.mean();
    let std = data.std_dev();
    (mean.is_finite() && std.is_finite()).then_some((mean, std))
}

/// Apply `f` over every full trailing window of present values.
pub fn rolling_apply<F>(values: &[Option<f64>], window: usize, f: F) -> Vec<Option<f64>>
where
    F: Fn(&[f64]) -> Option<f64>,
{
    let mut out = vec![None; values.len()];
    if window == 0 {
        return out;
    }
    let mut buf = Vec::with_capacity(window);
    for i in (window - 1)..values.len() {
        buf.clear();
        buf.extend(values[i + 1 - window..=i].iter().map_while(|v| *v));
        if buf.len() == window {
            out[i] = f(&buf).filter(|v| v.is_finite());
        }
    }
    out
}

pub fn rolling_mean(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling_apply(values, window, |w| Some(w.mean()))
}

/// Rolling unbiased standard deviation
pub fn rolling_std(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling_apply(values, window, |w| mean_std(w).map(|(_, s)| s))
}

/// `(x - rolling_mean) / rolling_std`, the window including `x` itself.
pub fn rolling_zscore(values: &[Option<f64>], window: usize) -> Vec<Option<f64>> {
    rolling_apply(values, window, |w| {
        let (m, s) = mean_std(w)?;
        let x = *w.last()?;
        Some((x - m) / s)
    })
}

/// Re-standardize a group: `(x - mean) / (std + STD_EPSILON)`.
///
/// Groups with fewer than two values have no defined spread and yield `None`
/// for every row.
pub fn standardize(values: &[f64]) -> Vec<Option<f64>> {
    match mean_std(values) {
        Some((m, s)) => values
            .iter()
            .map(|x| Some((x - m) / (s + STD_EPSILON)).filter(|v| v.is_finite()))
            .collect(),
        None => vec![None; values.len()],
    }
}

/// Quantile with linear interpolation between closest ranks (`q` in [0, 1]).
pub fn quantile(data: &[f64], q: f64) -> Option<f64> {
    if data.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted: Vec<f64> = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn median(data: &[f64]) -> Option<f64> {
    quantile(data, 0.5)
}
