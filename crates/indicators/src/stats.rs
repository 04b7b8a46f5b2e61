use core_types::CoreError;

/// Simple returns between consecutive values. A zero base yields a zero return.
pub fn returns(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] == 0.0 { 0.0 } else { w[1] / w[0] - 1.0 })
        .collect()
}

/// Return over the last `window` bars: `last / values[len - 1 - window] - 1`.
pub fn window_return(values: &[f64], window: usize) -> Result<f64, CoreError> {
    if window == 0 || values.len() <= window {
        return Err(CoreError::InsufficientData {
            needed: window + 1,
            available: values.len(),
        });
    }
    let base = values[values.len() - 1 - window];
    let last = values[values.len() - 1];
    if base == 0.0 {
        return Err(CoreError::Calculation("window return from a zero base".into()));
    }
    Ok(last / base - 1.0)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation. Zero for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Pearson correlation over the common tail of both series.
///
/// Returns 0 when either series is constant or shorter than three values.
pub fn correlation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 3 {
        return 0.0;
    }
    let a = &a[a.len() - n..];
    let b = &b[b.len() - n..];
    let (ma, mb) = (mean(a), mean(b));

    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - ma;
        let dy = y - mb;
        cov += dx * dy;
        va += dx * dx;
        vb += dy * dy;
    }
    if va <= f64::EPSILON || vb <= f64::EPSILON {
        return 0.0;
    }
    (cov / (va.sqrt() * vb.sqrt())).clamp(-1.0, 1.0)
}

/// Linearly interpolated percentile, `p` in [0, 1].
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let rank = p.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

fn decay(half_life: f64) -> f64 {
    (0.5f64).powf(1.0 / half_life.max(f64::EPSILON))
}

/// Exponentially weighted moving average with the given half-life, in bars.
pub fn ewma(values: &[f64], half_life: f64) -> Option<f64> {
    let (&first, rest) = values.split_first()?;
    let lambda = decay(half_life);
    Some(rest.iter().fold(first, |acc, v| lambda * acc + (1.0 - lambda) * v))
}

/// Z-score of every value against the midpoint of a fast and a slow EWMA,
/// scaled by the exponentially weighted deviation around the slow EWMA.
/// Computed in one pass; element `i` only uses `values[..=i]`.
pub fn ew_zscore_path(values: &[f64], fast_half_life: f64, slow_half_life: f64) -> Vec<f64> {
    let Some((&first, rest)) = values.split_first() else {
        return Vec::new();
    };
    let (lf, ls) = (decay(fast_half_life), decay(slow_half_life));
    let (mut fast, mut slow, mut mu, mut var) = (first, first, first, 0.0);

    let mut path = Vec::with_capacity(values.len());
    path.push(0.0);
    for &v in rest {
        fast = lf * fast + (1.0 - lf) * v;
        slow = ls * slow + (1.0 - ls) * v;
        let diff = v - mu;
        mu += (1.0 - ls) * diff;
        var = ls * (var + (1.0 - ls) * diff * diff);
        let sd = var.sqrt();
        let center = (fast + slow) / 2.0;
        path.push(if sd <= f64::EPSILON { 0.0 } else { (v - center) / sd });
    }
    path
}

/// The latest value of [`ew_zscore_path`].
pub fn ew_zscore(values: &[f64], fast_half_life: f64, slow_half_life: f64) -> Result<f64, CoreError> {
    if values.len() < 3 {
        return Err(CoreError::InsufficientData {
            needed: 3,
            available: values.len(),
        });
    }
    Ok(ew_zscore_path(values, fast_half_life, slow_half_life)
        .last()
        .copied()
        .unwrap_or_default())
}
