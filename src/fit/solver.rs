//! Bounded robust nonlinear least squares.
//!
//! Minimizes
//!
//! ```text
//! cost(x) = ½ Σ ρ(f_i(x)²)    subject to lb ≤ x ≤ ub
//! ```
//!
//! with a damped Gauss–Newton (Levenberg–Marquardt) iteration in scaled
//! variables `u = x / x_scale`:
//!
//! - the robust loss is handled by rescaling residuals and Jacobian rows so
//!   that the quadratic model matches ρ to second order
//! - variables sitting on a bound with the gradient pointing outward are
//!   frozen for the step, every other step is projected back into the box
//! - the damping follows the gain ratio (actual / predicted reduction)
//!
//! Residual vectors that are not finite (or change length) mark infeasible
//! trial points: the step is rejected and the damping increased.

use nalgebra::{DMatrix, DVector};

use crate::error::AppError;
use crate::fit::bounds::Bounds;
use crate::math::solve_least_squares;

/// Robust loss ρ(z) applied to squared residuals `z = f²`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    /// ρ(z) = z
    Linear,
    /// ρ(z) = 2(√(1 + z) − 1)
    SoftL1,
}

impl Loss {
    /// ρ(z), ρ'(z), ρ''(z).
    fn eval(self, z: f64) -> (f64, f64, f64) {
        match self {
            Loss::Linear => (z, 1.0, 0.0),
            Loss::SoftL1 => {
                let t = 1.0 + z;
                let s = t.sqrt();
                (2.0 * (s - 1.0), 1.0 / s, -0.5 / (t * s))
            }
        }
    }

    fn cost(self, f: &[f64]) -> f64 {
        0.5 * f.iter().map(|v| self.eval(v * v).0).sum::<f64>()
    }
}

#[derive(Debug, Clone)]
pub struct SolverOptions {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// Maximum residual evaluations; `None` means `100 · n`.
    pub max_nfev: Option<usize>,
    pub loss: Loss,
    /// Characteristic size of each variable; `None` means all ones.
    pub x_scale: Option<Vec<f64>>,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            ftol: 1e-8,
            xtol: 1e-8,
            gtol: 1e-8,
            max_nfev: None,
            loss: Loss::Linear,
            x_scale: None,
        }
    }
}

/// Why the iteration stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    MaxNfev,
    Gtol,
    Ftol,
    Xtol,
}

impl Termination {
    pub fn message(self) -> &'static str {
        match self {
            Termination::MaxNfev => "The maximum number of function evaluations is exceeded.",
            Termination::Gtol => "`gtol` termination condition is satisfied.",
            Termination::Ftol => "`ftol` termination condition is satisfied.",
            Termination::Xtol => "`xtol` termination condition is satisfied.",
        }
    }

    pub fn is_converged(self) -> bool {
        self != Termination::MaxNfev
    }
}

#[derive(Debug, Clone)]
pub struct SolverResult {
    pub x: Vec<f64>,
    pub cost: f64,
    /// Residuals at `x`.
    pub fun: Vec<f64>,
    /// Jacobian at `x`, rescaled by the loss.
    pub jac: DMatrix<f64>,
    /// Gradient of the cost at `x`.
    pub grad: Vec<f64>,
    pub nfev: usize,
    pub njev: usize,
    pub status: Termination,
}

/// A residual function together with its Jacobian.
pub trait LeastSquaresProblem {
    fn residuals(&mut self, x: &[f64]) -> Result<Vec<f64>, AppError>;

    /// Jacobian at `x`; `f0` are the residuals already computed there.
    fn jacobian(&mut self, x: &[f64], f0: &[f64]) -> Result<DMatrix<f64>, AppError>;
}

fn is_feasible(f: &[f64], m: usize) -> bool {
    f.len() == m && f.iter().all(|v| v.is_finite())
}

/// Residuals and Jacobian rescaled so that the Gauss–Newton model matches
/// the robust loss to second order.
fn scale_for_loss(loss: Loss, f: &[f64], jac: &DMatrix<f64>) -> (DVector<f64>, DMatrix<f64>, DVector<f64>) {
    let m = f.len();
    let mut fs = DVector::zeros(m);
    let mut js = jac.clone();
    let mut weighted = DVector::zeros(m);
    for i in 0..m {
        let z = f[i] * f[i];
        let (_, rho1, rho2) = loss.eval(z);
        let j_scale = (rho1 + 2.0 * rho2 * z).max(f64::EPSILON).sqrt();
        fs[i] = f[i] * rho1 / j_scale;
        weighted[i] = f[i] * rho1;
        js.row_mut(i).scale_mut(j_scale);
    }
    (fs, js, weighted)
}

/// Solve the bounded problem starting at `x0`.
pub fn least_squares<P: LeastSquaresProblem + ?Sized>(
    problem: &mut P,
    x0: &[f64],
    bounds: &Bounds,
    opts: &SolverOptions,
) -> Result<SolverResult, AppError> {
    let n = x0.len();
    if n == 0 {
        return Err(AppError::new(2, "Nothing to fit: no free parameters."));
    }
    if bounds.len() != n {
        return Err(AppError::new(
            2,
            format!("Bounds cover {} parameters, expected {n}.", bounds.len()),
        ));
    }
    if let Some(i) = (0..n).find(|&i| bounds.lower[i] >= bounds.upper[i]) {
        return Err(AppError::new(
            2,
            format!("Empty bounds for parameter {i}: [{}, {}].", bounds.lower[i], bounds.upper[i]),
        ));
    }
    if !bounds.contains(x0) {
        return Err(AppError::new(2, "Initial guess is outside of the bounds."));
    }

    let scale = opts.x_scale.clone().unwrap_or_else(|| vec![1.0; n]);
    if scale.len() != n || scale.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
        return Err(AppError::new(2, "x_scale must hold one positive value per parameter."));
    }
    let max_nfev = opts.max_nfev.unwrap_or(100 * n).max(1);
    let lb_u: Vec<f64> = (0..n).map(|i| bounds.lower[i] / scale[i]).collect();
    let ub_u: Vec<f64> = (0..n).map(|i| bounds.upper[i] / scale[i]).collect();

    let mut x = x0.to_vec();
    let mut f = problem.residuals(&x)?;
    let mut nfev = 1;
    let m = f.len();
    if m == 0 || !is_feasible(&f, m) {
        return Err(AppError::new(4, "Residuals are not finite in the initial point."));
    }
    let mut cost = opts.loss.cost(&f);
    let mut jac = problem.jacobian(&x, &f)?;
    let mut njev = 1;
    if jac.nrows() != m || jac.ncols() != n {
        return Err(AppError::new(
            4,
            format!("Jacobian has shape {}x{}, expected {m}x{n}.", jac.nrows(), jac.ncols()),
        ));
    }

    let mut mu: Option<f64> = None;
    let mut nu = 2.0;
    let mut attempts = 0;
    let max_attempts = 10 * max_nfev + 100;

    let status = 'outer: loop {
        let (fs, js, _) = scale_for_loss(opts.loss, &f, &jac);
        let mut ju = js;
        for (j, s) in scale.iter().enumerate() {
            ju.column_mut(j).scale_mut(*s);
        }
        let g = ju.transpose() * &fs;
        let u: Vec<f64> = (0..n).map(|i| x[i] / scale[i]).collect();

        // Bound-blocked directions do not count towards stationarity.
        let blocked: Vec<bool> = (0..n)
            .map(|i| (u[i] <= lb_u[i] && g[i] > 0.0) || (u[i] >= ub_u[i] && g[i] < 0.0))
            .collect();
        let g_norm = (0..n)
            .filter(|&i| !blocked[i])
            .fold(0.0_f64, |acc, i| acc.max(g[i].abs()));
        if g_norm < opts.gtol {
            break Termination::Gtol;
        }

        let free: Vec<usize> = (0..n).filter(|&i| !blocked[i]).collect();
        let a_diag_max = (0..n)
            .map(|j| ju.column(j).norm_squared())
            .fold(0.0_f64, f64::max);
        let mut damping = *mu.get_or_insert(1e-3 * a_diag_max.max(f64::EPSILON));

        loop {
            if nfev >= max_nfev {
                break 'outer Termination::MaxNfev;
            }
            attempts += 1;
            if attempts > max_attempts {
                break 'outer Termination::MaxNfev;
            }

            // Damped step over the free variables: [J_free; √μ I] du = [-f; 0].
            let k = free.len();
            let mut aug = DMatrix::zeros(m + k, k);
            let mut rhs = DVector::zeros(m + k);
            for (c, &j) in free.iter().enumerate() {
                for i in 0..m {
                    aug[(i, c)] = ju[(i, j)];
                }
                aug[(m + c, c)] = damping.sqrt();
            }
            for i in 0..m {
                rhs[i] = -fs[i];
            }
            let Some(step) = solve_least_squares(&aug, &rhs) else {
                damping *= nu;
                nu *= 2.0;
                continue;
            };

            let mut u_new = u.clone();
            for (c, &j) in free.iter().enumerate() {
                u_new[j] = (u[j] + step[c]).clamp(lb_u[j], ub_u[j]);
            }
            let du = DVector::from_iterator(n, (0..n).map(|i| u_new[i] - u[i]));
            let u_norm = u.iter().map(|v| v * v).sum::<f64>().sqrt();
            if du.norm() < opts.xtol * (opts.xtol + u_norm) {
                break 'outer Termination::Xtol;
            }

            let x_new: Vec<f64> = (0..n)
                .map(|i| (u_new[i] * scale[i]).clamp(bounds.lower[i], bounds.upper[i]))
                .collect();
            let f_new = problem.residuals(&x_new)?;
            nfev += 1;
            if !is_feasible(&f_new, m) {
                log::debug!("Rejected infeasible trial point {x_new:?}");
                damping *= nu;
                nu *= 2.0;
                continue;
            }

            let cost_new = opts.loss.cost(&f_new);
            let actual = cost - cost_new;
            let jd = &ju * &du;
            let predicted = -(g.dot(&du) + 0.5 * jd.norm_squared());
            let ratio = if predicted > 0.0 {
                actual / predicted
            } else if actual > 0.0 {
                1.0
            } else {
                -1.0
            };

            if ratio > 0.0 {
                let converged = actual < opts.ftol * cost;
                x = x_new;
                f = f_new;
                cost = cost_new;
                damping *= (1.0 - (2.0 * ratio - 1.0).powi(3)).max(1.0 / 3.0);
                nu = 2.0;
                mu = Some(damping);

                jac = problem.jacobian(&x, &f)?;
                njev += 1;
                if converged {
                    break 'outer Termination::Ftol;
                }
                continue 'outer;
            }
            damping *= nu;
            nu *= 2.0;
            mu = Some(damping);
        }
    };

    let (_, js, weighted) = scale_for_loss(opts.loss, &f, &jac);
    let grad = (jac.transpose() * weighted).iter().copied().collect();
    Ok(SolverResult {
        x,
        cost,
        fun: f,
        jac: js,
        grad,
        nfev,
        njev,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Straight line `a + b t` against fixed data.
    struct Line {
        t: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquaresProblem for Line {
        fn residuals(&mut self, x: &[f64]) -> Result<Vec<f64>, AppError> {
            Ok(self
                .t
                .iter()
                .zip(self.y.iter())
                .map(|(t, y)| x[0] + x[1] * t - y)
                .collect())
        }

        fn jacobian(&mut self, _x: &[f64], _f0: &[f64]) -> Result<DMatrix<f64>, AppError> {
            Ok(DMatrix::from_fn(self.t.len(), 2, |i, j| if j == 0 { 1.0 } else { self.t[i] }))
        }
    }

    fn line_problem() -> Line {
        let t: Vec<f64> = (0..11).map(|i| i as f64 * 0.4).collect();
        let y = t.iter().map(|t| 1.0 + 2.0 * t).collect();
        Line { t, y }
    }

    #[test]
    fn unbounded_linear_problem_reaches_exact_solution() {
        let mut p = line_problem();
        let res = least_squares(&mut p, &[0.0, 0.0], &Bounds::unbounded(2), &SolverOptions::default()).unwrap();
        assert!((res.x[0] - 1.0).abs() < 1e-6);
        assert!((res.x[1] - 2.0).abs() < 1e-6);
        assert!(res.cost < 1e-10);
        assert!(res.status.is_converged());
    }

    #[test]
    fn active_bound_still_optimizes_free_variable() {
        let mut p = line_problem();
        let bounds = Bounds {
            lower: vec![f64::NEG_INFINITY, f64::NEG_INFINITY],
            upper: vec![f64::INFINITY, 1.5],
        };
        let res = least_squares(&mut p, &[0.0, 0.0], &bounds, &SolverOptions::default()).unwrap();
        // With b pinned at 1.5 the best intercept is mean(y - 1.5 t) = 1 + 0.5 * mean(t).
        assert_eq!(res.x[1], 1.5);
        assert!((res.x[0] - 2.0).abs() < 1e-4);
    }

    #[test]
    fn soft_l1_resists_an_outlier() {
        let mut p = line_problem();
        p.y[5] += 50.0;
        let linear = least_squares(&mut p, &[0.0, 0.0], &Bounds::unbounded(2), &SolverOptions::default()).unwrap();
        let opts = SolverOptions {
            loss: Loss::SoftL1,
            ..SolverOptions::default()
        };
        let robust = least_squares(&mut p, &[0.0, 0.0], &Bounds::unbounded(2), &opts).unwrap();

        let err = |x: &[f64]| (x[0] - 1.0).abs() + (x[1] - 2.0).abs();
        assert!(err(&robust.x) < err(&linear.x));
        assert_eq!(robust.jac.nrows(), 11);
    }

    /// One residual `x - 7`, infeasible beyond 5.
    struct Walled;

    impl LeastSquaresProblem for Walled {
        fn residuals(&mut self, x: &[f64]) -> Result<Vec<f64>, AppError> {
            if x[0] > 5.0 {
                Ok(vec![f64::INFINITY])
            } else {
                Ok(vec![x[0] - 7.0])
            }
        }

        fn jacobian(&mut self, _x: &[f64], _f0: &[f64]) -> Result<DMatrix<f64>, AppError> {
            Ok(DMatrix::from_element(1, 1, 1.0))
        }
    }

    #[test]
    fn infeasible_trials_are_rejected_not_fatal() {
        let res = least_squares(&mut Walled, &[0.0], &Bounds::unbounded(1), &SolverOptions::default()).unwrap();
        assert!(res.x[0] <= 5.0);
        assert!(res.x[0] > 4.0);
        assert!(res.fun[0].is_finite());
    }

    #[test]
    fn infeasible_start_is_an_error() {
        let err = least_squares(&mut Walled, &[6.0], &Bounds::unbounded(1), &SolverOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), 4);

        let bounds = Bounds {
            lower: vec![0.0],
            upper: vec![1.0],
        };
        let err = least_squares(&mut Walled, &[2.0], &bounds, &SolverOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
