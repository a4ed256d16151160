//! Finite-difference Jacobian.
//!
//! Three-point differences with step `h = ε^(1/3) · max(1, |x|)`: central when
//! both neighbours are inside the bounds, one-sided second order otherwise.
//! The residuals at `x` are supplied by the caller and never recomputed.
//!
//! A perturbed evaluation that comes back infeasible (non-finite or of the
//! wrong length) degrades that column to a two-point difference against the
//! base residuals, or to zero when no side is usable.

use nalgebra::DMatrix;

use crate::error::AppError;
use crate::fit::bounds::Bounds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scheme {
    Central,
    Forward,
    Backward,
}

fn choose_scheme(x: f64, h: f64, lb: f64, ub: f64) -> (Scheme, f64) {
    if x - h >= lb && x + h <= ub {
        return (Scheme::Central, h);
    }
    if x + 2.0 * h <= ub {
        return (Scheme::Forward, h);
    }
    if x - 2.0 * h >= lb {
        return (Scheme::Backward, h);
    }
    let room_up = ub - x;
    let room_down = x - lb;
    if room_up >= room_down {
        (Scheme::Forward, room_up / 2.0)
    } else {
        (Scheme::Backward, room_down / 2.0)
    }
}

/// Numerical Jacobian of `fun` at `x` (one row per residual).
pub fn approx_derivative<F>(mut fun: F, x: &[f64], f0: &[f64], bounds: &Bounds) -> Result<DMatrix<f64>, AppError>
where
    F: FnMut(&[f64]) -> Result<Vec<f64>, AppError>,
{
    let m = f0.len();
    let n = x.len();
    if bounds.len() != n {
        return Err(AppError::new(
            2,
            format!("Bounds cover {} parameters, expected {n}.", bounds.len()),
        ));
    }
    let usable = |f: &[f64]| f.len() == m && f.iter().all(|v| v.is_finite());
    let rel_step = f64::EPSILON.cbrt();

    let mut jac = DMatrix::zeros(m, n);
    for j in 0..n {
        let h0 = rel_step * x[j].abs().max(1.0);
        let (scheme, h) = choose_scheme(x[j], h0, bounds.lower[j], bounds.upper[j]);
        if h <= 0.0 {
            log::debug!("Parameter {j} has no room inside its bounds, derivative set to zero");
            continue;
        }

        let mut at = |dx: f64| -> Result<Vec<f64>, AppError> {
            let mut xp = x.to_vec();
            xp[j] = x[j] + dx;
            fun(&xp)
        };

        let column: Option<Vec<f64>> = match scheme {
            Scheme::Central => {
                let fp = at(h)?;
                let fm = at(-h)?;
                match (usable(&fp), usable(&fm)) {
                    (true, true) => Some((0..m).map(|i| (fp[i] - fm[i]) / (2.0 * h)).collect()),
                    (true, false) => Some((0..m).map(|i| (fp[i] - f0[i]) / h).collect()),
                    (false, true) => Some((0..m).map(|i| (f0[i] - fm[i]) / h).collect()),
                    (false, false) => None,
                }
            }
            Scheme::Forward | Scheme::Backward => {
                let sign = if scheme == Scheme::Forward { 1.0 } else { -1.0 };
                let f1 = at(sign * h)?;
                if !usable(&f1) {
                    None
                } else {
                    let f2 = at(sign * 2.0 * h)?;
                    if usable(&f2) {
                        Some(
                            (0..m)
                                .map(|i| sign * (-3.0 * f0[i] + 4.0 * f1[i] - f2[i]) / (2.0 * h))
                                .collect(),
                        )
                    } else {
                        Some((0..m).map(|i| sign * (f1[i] - f0[i]) / h).collect())
                    }
                }
            }
        };

        match column {
            Some(col) => {
                for (i, v) in col.into_iter().enumerate() {
                    jac[(i, j)] = v;
                }
            }
            None => log::debug!("Infeasible perturbations around parameter {j}, derivative set to zero"),
        }
    }
    Ok(jac)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fun(x: &[f64]) -> Result<Vec<f64>, AppError> {
        Ok(vec![x[0] * x[0], x[0] * x[1], x[1].sin()])
    }

    fn analytic(x: &[f64]) -> [[f64; 2]; 3] {
        [[2.0 * x[0], 0.0], [x[1], x[0]], [0.0, x[1].cos()]]
    }

    #[test]
    fn central_differences_match_analytic_derivatives() {
        let x = [1.3, -0.4];
        let f0 = fun(&x).unwrap();
        let jac = approx_derivative(fun, &x, &f0, &Bounds::unbounded(2)).unwrap();
        let exact = analytic(&x);
        for i in 0..3 {
            for j in 0..2 {
                assert!((jac[(i, j)] - exact[i][j]).abs() < 1e-8, "({i},{j})");
            }
        }
    }

    #[test]
    fn upper_bound_switches_to_backward_differences() {
        let x = [1.0, 0.5];
        let bounds = Bounds {
            lower: vec![0.0, 0.0],
            upper: vec![1.0, 1.0],
        };
        let mut seen = Vec::new();
        let f0 = fun(&x).unwrap();
        let jac = approx_derivative(
            |xp| {
                seen.push(xp[0]);
                fun(xp)
            },
            &x,
            &f0,
            &bounds,
        )
        .unwrap();
        assert!(seen.iter().all(|v| *v <= 1.0));
        assert!((jac[(0, 0)] - 2.0).abs() < 1e-8);
        assert!((jac[(1, 0)] - 0.5).abs() < 1e-8);
    }

    #[test]
    fn infeasible_side_falls_back_to_two_point() {
        let walled = |xp: &[f64]| -> Result<Vec<f64>, AppError> {
            if xp[0] > 1.0 {
                Ok(vec![f64::INFINITY])
            } else {
                Ok(vec![xp[0] * xp[0]])
            }
        };
        let x = [1.0];
        let jac = approx_derivative(walled, &x, &[1.0], &Bounds::unbounded(1)).unwrap();
        assert!((jac[(0, 0)] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn fully_infeasible_column_is_zero() {
        let jac = approx_derivative(
            |_xp: &[f64]| Ok(vec![f64::NAN, 0.0]),
            &[0.0],
            &[1.0, 2.0],
            &Bounds::unbounded(1),
        )
        .unwrap();
        assert_eq!(jac[(0, 0)], 0.0);
        assert_eq!(jac[(1, 0)], 0.0);
    }
}
