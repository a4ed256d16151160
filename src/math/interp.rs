//! Interpolation helpers on sorted wavelength grids.
//!
//! All routines clamp to the boundary values outside the tabulated range
//! instead of extrapolating: synthetic spectra near segment edges are better
//! approximated by a constant than by a runaway linear trend.

/// Linear interpolation of `(xp, fp)` at a single point, clamped at the ends.
///
/// `xp` must be sorted ascending. Empty input yields NaN.
pub fn interp_at(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len().min(fp.len());
    if n == 0 {
        return f64::NAN;
    }
    if n == 1 || x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }

    let upper = xp[..n].partition_point(|&v| v <= x);
    let lower = upper - 1;
    let (x0, x1) = (xp[lower], xp[upper]);
    let (y0, y1) = (fp[lower], fp[upper]);
    if (x1 - x0).abs() < f64::MIN_POSITIVE {
        return y0;
    }
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

/// Linear interpolation of `(xp, fp)` on every point of `x`.
pub fn interp(x: &[f64], xp: &[f64], fp: &[f64]) -> Vec<f64> {
    x.iter().map(|&xi| interp_at(xi, xp, fp)).collect()
}

/// Resample `(xp, fp)` onto `x`, tolerating degenerate inputs.
///
/// Non-finite samples are dropped before interpolating. With no usable
/// samples the result is all ones (a flat, normalized spectrum); with a
/// single sample it is that constant.
pub fn safe_interpolation(xp: &[f64], fp: &[f64], x: &[f64]) -> Vec<f64> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = xp
        .iter()
        .zip(fp.iter())
        .filter(|(a, b)| a.is_finite() && b.is_finite())
        .map(|(a, b)| (*a, *b))
        .unzip();

    if xs.is_empty() {
        return vec![1.0; x.len()];
    }
    if xs.windows(2).all(|w| w[0] <= w[1]) {
        return interp(x, &xs, &ys);
    }

    let mut pairs: Vec<(f64, f64)> = xs.into_iter().zip(ys).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    let (xs, ys): (Vec<f64>, Vec<f64>) = pairs.into_iter().unzip();
    interp(x, &xs, &ys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolates_linearly_between_knots() {
        let xp = [0.0, 1.0, 2.0];
        let fp = [0.0, 10.0, 30.0];
        assert!((interp_at(0.5, &xp, &fp) - 5.0).abs() < 1e-12);
        assert!((interp_at(1.5, &xp, &fp) - 20.0).abs() < 1e-12);
        assert!((interp_at(1.0, &xp, &fp) - 10.0).abs() < 1e-12);
    }

    #[test]
    fn clamps_outside_the_grid() {
        let xp = [1.0, 2.0];
        let fp = [3.0, 4.0];
        assert_eq!(interp(&[0.0, 5.0], &xp, &fp), vec![3.0, 4.0]);
    }

    #[test]
    fn safe_interpolation_survives_bad_samples() {
        let x = [1.0, 2.0, 3.0];
        assert_eq!(safe_interpolation(&[], &[], &x), vec![1.0; 3]);
        assert_eq!(
            safe_interpolation(&[2.0, f64::NAN], &[0.5, 1.0], &x),
            vec![0.5; 3]
        );
        let unsorted = safe_interpolation(&[3.0, 1.0], &[30.0, 10.0], &[2.0]);
        assert!((unsorted[0] - 20.0).abs() < 1e-12);
    }
}
