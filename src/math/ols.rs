//! Linear least squares solver.
//!
//! Two places in the pipeline reduce to small linear problems of the form:
//!
//! ```text
//! minimize Σ (y_i - x_i^T β)^2
//! ```
//!
//! - the continuum polynomial at a fixed trial radial velocity (columns are
//!   `synth(x) * x^k`, rows pre-scaled by `1/σ`)
//! - the damped Gauss–Newton step of the bounded solver (the Jacobian stacked
//!   on top of a `sqrt(λ)·I` block)
//!
//! Both are tall (more rows than columns), so we use SVD, which handles
//! non-square and nearly rank-deficient systems without panicking.

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    if x.nrows() == 0 || x.ncols() == 0 || x.nrows() != y.len() {
        return None;
    }
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Moore–Penrose pseudo-inverse of a (square) matrix.
///
/// Singular directions are dropped rather than blowing up.
pub fn pseudo_inverse(m: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if m.nrows() == 0 || m.ncols() == 0 {
        return None;
    }
    let max_abs = m.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let eps = f64::EPSILON * (m.nrows().max(m.ncols()) as f64) * max_abs.max(f64::MIN_POSITIVE);
    m.clone().pseudo_inverse(eps).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn least_squares_solves_simple_system() {
        // Fit y = 2 + 3x on x = [0,1,2]
        let x = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, 1.0, 1.0, 1.0, 2.0]);
        let y = DVector::from_row_slice(&[2.0, 5.0, 8.0]);

        let beta = solve_least_squares(&x, &y).unwrap();
        assert!((beta[0] - 2.0).abs() < 1e-10);
        assert!((beta[1] - 3.0).abs() < 1e-10);
    }

    #[test]
    fn least_squares_rejects_shape_mismatch() {
        let x = DMatrix::<f64>::zeros(3, 2);
        let y = DVector::<f64>::zeros(2);
        assert!(solve_least_squares(&x, &y).is_none());
    }

    #[test]
    fn pseudo_inverse_of_singular_matrix_is_finite() {
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 0.0, 0.0, 0.0]);
        let p = pseudo_inverse(&m).unwrap();
        assert!((p[(0, 0)] - 0.25).abs() < 1e-12);
        assert!(p[(1, 1)].abs() < 1e-12);
    }
}
