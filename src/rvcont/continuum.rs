//! Weighted continuum polynomial for one segment.
//!
//! Given the synthetic flux resampled onto the observed points, we solve
//!
//! `obs_i ≈ synth_i · P(x_i)`, with `x_i = wave_i − wave_0`
//!
//! for the coefficients of `P` (highest power first) by weighted OLS.

use nalgebra::{DMatrix, DVector};

use crate::math::{polyval, solve_least_squares};

/// Observed points of one segment that take part in the comparison.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentObservation {
    /// Position of the segment in the batch.
    pub slot: usize,
    /// First wavelength of the segment (polynomial origin).
    pub origin: f64,
    pub wave: Vec<f64>,
    pub flux: Vec<f64>,
    /// Inverse variance weights.
    pub weight: Vec<f64>,
}

impl SegmentObservation {
    pub fn is_empty(&self) -> bool {
        self.wave.is_empty()
    }
}

/// Identity polynomial of the given degree (`[0, …, 0, 1]`).
pub fn identity_poly(degree: usize) -> Vec<f64> {
    let mut out = vec![0.0; degree + 1];
    out[degree] = 1.0;
    out
}

/// Fit the continuum polynomial of `degree`.
///
/// Returns `None` when the system is degenerate.
pub fn fit_continuum(obs: &SegmentObservation, model: &[f64], degree: usize) -> Option<Vec<f64>> {
    let n = obs.wave.len();
    let p = degree + 1;
    if n < p || model.len() != n {
        return None;
    }

    let mut xw = DMatrix::<f64>::zeros(n, p);
    let mut yw = DVector::<f64>::zeros(n);
    for i in 0..n {
        let sw = obs.weight[i].sqrt();
        let x = obs.wave[i] - obs.origin;
        for j in 0..p {
            let power = (degree - j) as i32;
            xw[(i, j)] = model[i] * x.powi(power) * sw;
        }
        yw[i] = obs.flux[i] * sw;
    }

    let beta = solve_least_squares(&xw, &yw)?;
    let coeffs: Vec<f64> = beta.iter().copied().collect();
    coeffs.iter().all(|c| c.is_finite()).then_some(coeffs)
}

/// Weighted chi-square of `obs` against `model · P`.
pub fn chi_square(obs: &SegmentObservation, model: &[f64], coeffs: &[f64]) -> f64 {
    obs.wave
        .iter()
        .zip(obs.flux.iter())
        .zip(obs.weight.iter())
        .zip(model.iter())
        .map(|(((w, f), wt), m)| {
            let r = f - m * polyval(coeffs, w - obs.origin);
            wt * r * r
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(model: &[f64], poly: &[f64]) -> SegmentObservation {
        let wave: Vec<f64> = (0..model.len()).map(|i| 6000.0 + 0.1 * i as f64).collect();
        let flux = wave
            .iter()
            .zip(model)
            .map(|(w, m)| m * polyval(poly, w - 6000.0))
            .collect();
        SegmentObservation {
            slot: 0,
            origin: 6000.0,
            wave,
            flux,
            weight: vec![4.0; model.len()],
        }
    }

    #[test]
    fn recovers_quadratic_continuum() {
        let model: Vec<f64> = (0..60).map(|i| 1.0 - 0.3 * ((i as f64 - 30.0) / 4.0).powi(2).min(1.0)).collect();
        let obs = observation(&model, &[0.002, -0.01, 1.05]);
        let coeffs = fit_continuum(&obs, &model, 2).unwrap();
        assert!((coeffs[0] - 0.002).abs() < 1e-8);
        assert!((coeffs[1] + 0.01).abs() < 1e-8);
        assert!((coeffs[2] - 1.05).abs() < 1e-8);
        assert!(chi_square(&obs, &model, &coeffs) < 1e-12);
    }

    #[test]
    fn too_few_points_is_degenerate() {
        let obs = observation(&[1.0, 1.0], &[1.0]);
        assert!(fit_continuum(&obs, &[1.0, 1.0], 2).is_none());
        assert_eq!(identity_poly(2), vec![0.0, 0.0, 1.0]);
    }
}
