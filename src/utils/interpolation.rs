//! Piecewise-linear interpolation and quantiles
//!
//! Used by vulnerability look-ups (intensity → loss ratio) and by the
//! exposure permutation job (quantile of per-iteration mean loss).

/// Interpolate `x` on the curve `(xp, fp)`.
///
/// Algorithm:
/// 1. NaN in → NaN out
/// 2. Below `xp[0]` clamps to `fp[0]`, above the last level clamps to the
///    last loss value
/// 3. Otherwise find bracketing levels `[xp[i], xp[i+1]]` and interpolate
///    linearly between `fp[i]` and `fp[i+1]`
///
/// `xp` must be strictly increasing and the same length as `fp`. An empty
/// curve yields NaN.
pub fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    debug_assert_eq!(xp.len(), fp.len());

    if x.is_nan() || xp.is_empty() {
        return f64::NAN;
    }

    let last = xp.len() - 1;

    // Edge cases
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[last] {
        return fp[last];
    }

    // First level strictly greater than x; 1..=last by the checks above
    let upper = xp.partition_point(|&level| level <= x);
    let lower = upper - 1;

    let span = xp[upper] - xp[lower];
    let fraction = if span > 0.0 { (x - xp[lower]) / span } else { 0.0 };

    fp[lower] + fraction * (fp[upper] - fp[lower])
}

/// Linear-interpolated quantile (`q` in `[0, 1]`) of `values`.
///
/// Matches the "linear" rule: position `q * (n - 1)` in the sorted values.
/// NaN entries are ignored; returns NaN when nothing is left.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let q = q.clamp(0.0, 1.0);
    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;

    sorted[lower] + fraction * (sorted[upper] - sorted[lower])
}

/// Mean of the non-NaN entries, NaN if there are none.
pub fn nan_mean(values: &[f64]) -> f64 {
    let (sum, count) = values
        .iter()
        .filter(|v| !v.is_nan())
        .fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    if count == 0 {
        f64::NAN
    } else {
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const LEVELS: [f64; 3] = [0.0, 5.0, 10.0];
    const LOSSES: [f64; 3] = [0.0, 0.5, 1.0];

    #[test]
    fn test_interp_on_and_between_levels() {
        assert_eq!(interp(5.0, &LEVELS, &LOSSES), 0.5);
        assert_relative_eq!(interp(4.0, &LEVELS, &LOSSES), 0.4, epsilon = 1e-12);
        assert_relative_eq!(interp(7.5, &LEVELS, &LOSSES), 0.75, epsilon = 1e-12);
    }

    #[test]
    fn test_interp_clamps_outside_range() {
        assert_eq!(interp(-3.0, &LEVELS, &LOSSES), 0.0);
        assert_eq!(interp(25.0, &LEVELS, &LOSSES), 1.0);
        assert_eq!(interp(10.0, &LEVELS, &LOSSES), 1.0);
    }

    #[test]
    fn test_interp_nan_propagates() {
        assert!(interp(f64::NAN, &LEVELS, &LOSSES).is_nan());
        assert!(interp(1.0, &[], &[]).is_nan());
    }

    #[test]
    fn test_quantile_linear() {
        let values = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(quantile(&values, 0.5), 2.5, epsilon = 1e-12);
        assert_relative_eq!(quantile(&values, 0.95), 3.85, epsilon = 1e-12);
        assert_eq!(quantile(&values, 0.0), 1.0);
        assert_eq!(quantile(&values, 1.0), 4.0);
        assert!(quantile(&[], 0.5).is_nan());
    }

    #[test]
    fn test_nan_mean_skips_nan() {
        assert_relative_eq!(nan_mean(&[1.0, f64::NAN, 3.0]), 2.0);
        assert!(nan_mean(&[f64::NAN]).is_nan());
    }
}
