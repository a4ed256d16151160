//! Systematic error from line data quality.
//!
//! Each observed point collects the relative errors of all lines whose
//! effective range covers it, scaled by the line depth at that point. The
//! result is kept in the state for inspection; it does not enter the residual
//! weights.

/// Per-point systematic error for one segment.
///
/// `ranges[i]` and `errors[i]` describe line `i`. Lines beyond the shorter of
/// the two lists are ignored.
pub fn linelist_errors(ranges: &[(f64, f64)], wave: &[f64], spec: &[f64], errors: &[f64]) -> Vec<f64> {
    let mut sig = vec![0.0; wave.len()];
    for (&(lo, hi), &err) in ranges.iter().zip(errors.iter()) {
        let start = wave.partition_point(|&w| w < lo);
        let end = wave.partition_point(|&w| w <= hi);
        for s in &mut sig[start..end.max(start)] {
            *s += err;
        }
    }
    for (s, f) in sig.iter_mut().zip(spec.iter()) {
        *s *= (1.0 - f).clamp(0.0, 1.0);
    }
    sig
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlapping_lines_accumulate_and_scale_with_depth() {
        let wave = [1.0, 2.0, 3.0, 4.0, 5.0];
        let spec = [1.0, 0.5, 0.5, 1.2, 0.0];
        let ranges = [(1.5, 3.0), (2.5, 5.0)];
        let errors = [0.1, 0.2];
        let sig = linelist_errors(&ranges, &wave, &spec, &errors);

        assert_eq!(sig[0], 0.0);
        assert!((sig[1] - 0.05).abs() < 1e-12);
        assert!((sig[2] - 0.15).abs() < 1e-12);
        assert_eq!(sig[3], 0.0);
        assert!((sig[4] - 0.2).abs() < 1e-12);
    }
}
