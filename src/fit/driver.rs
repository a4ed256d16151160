//! Fit driver: stellar parameters from an observed spectrum.
//!
//! [`solve`] normalizes the requested parameter names, derives bounds, scales
//! and starting values, runs the bounded soft-L1 least squares solver over
//! the residual evaluator, and stores the best-fit values and their
//! uncertainties in the model state.
//!
//! All preconditions are checked before the state is touched.

use std::path::PathBuf;

use crate::domain::{normalize_param_names, CscaleFlag, FitResults, ModelState, VradFlag};
use crate::engine::{AtmosphereGrid, RadiativeTransfer};
use crate::error::AppError;
use crate::fit::bounds::{default_value, get_bounds, get_scale};
use crate::fit::residuals::{gather_masked, FitObserver, ResidualEvaluator};
use crate::fit::solver::{least_squares, Loss, SolverOptions, SolverResult};
use crate::io::{save_state, tmp_snapshot_path};
use crate::math::{median_abs, pseudo_inverse};
use crate::synth::Synthesizer;

/// Floor for the median Jacobian column magnitude in the second uncertainty.
const MIN_SENSITIVITY: f64 = 1e-5;

#[derive(Debug, Clone, Default)]
pub struct SolveOptions {
    /// Segments to fit; `None` means all.
    pub segments: Option<Vec<usize>>,
    /// Final snapshot destination. Intermediate snapshots go next to it.
    pub filename: Option<PathBuf>,
    /// Maximum residual evaluations (solver default when `None`).
    pub max_nfev: Option<usize>,
    /// Store per-point line data systematics during the fit.
    pub systematics: bool,
}

/// Reduced chi-square of a robust solve: `2 · cost / (n_points − n_params)`.
///
/// The degrees of freedom are floored at 1.
pub fn reduced_chi_square(cost: f64, n_points: usize, n_params: usize) -> f64 {
    let dof = n_points.saturating_sub(n_params).max(1);
    2.0 * cost / dof as f64
}

/// Covariance and both uncertainty estimates from a finished solve.
fn uncertainties(result: &SolverResult) -> (Vec<Vec<f64>>, Vec<f64>, Vec<f64>) {
    let jac = &result.jac;
    let n = jac.ncols();
    let jtj = jac.transpose() * jac;
    let covar = pseudo_inverse(&jtj).unwrap_or_else(|| nalgebra::DMatrix::from_element(n, n, f64::NAN));

    let punc = (0..n).map(|i| covar[(i, i)].max(0.0).sqrt()).collect();
    let fun_med = median_abs(result.fun.iter().copied()).unwrap_or(0.0);
    let punc2 = (0..n)
        .map(|j| {
            let sens = median_abs(jac.column(j).iter().copied()).unwrap_or(0.0);
            fun_med / sens.max(MIN_SENSITIVITY)
        })
        .collect();
    let covar = (0..n).map(|i| (0..n).map(|j| covar[(i, j)]).collect()).collect();
    (covar, punc, punc2)
}

/// Fit `param_names` to the observation stored in `state`.
///
/// `vrad` and `cont` in `param_names` switch on per-segment radial velocity
/// and (at least linear) continuum fitting instead of naming parameters.
pub fn solve<E, A, S>(
    synth: &mut Synthesizer<E, A>,
    state: &mut ModelState,
    param_names: &[S],
    opts: &SolveOptions,
    observer: Option<&mut dyn FitObserver>,
) -> Result<FitResults, AppError>
where
    E: RadiativeTransfer,
    A: AtmosphereGrid,
    S: AsRef<str>,
{
    if !state.has_wave() {
        return Err(AppError::new(2, "No wavelength grid given; synthesize or load an observation first."));
    }
    if !state.has_spec() {
        return Err(AppError::new(2, "No observed spectrum given."));
    }
    state.validate_layout()?;

    let selection = normalize_param_names(param_names)?;
    let params = selection.params.clone();
    if params.is_empty() {
        return Err(AppError::new(2, "No continuous fit parameters given."));
    }
    let segments = state.segment_indices(opts.segments.as_deref())?;
    let bounds = get_bounds(&params, &state.atmo, synth.atmospheres())?;
    let scale = get_scale(&params);

    let mut x0 = Vec::with_capacity(params.len());
    for p in &params {
        let value = match state.param(*p) {
            Some(v) => v,
            None => {
                let d = default_value(*p)
                    .ok_or_else(|| AppError::new(2, format!("No value and no default for parameter {p}.")))?;
                log::info!("Parameter {p} not set, starting from default {d}");
                d
            }
        };
        x0.push(value);
    }
    if !bounds.contains(&x0) {
        let clipped = bounds.clip(&x0);
        log::warn!("Starting values {x0:?} outside the bounds, clipped to {clipped:?}");
        x0 = clipped;
    }

    let spec = gather_masked(state, &state.spec, &segments);
    if spec.is_empty() {
        return Err(AppError::new(3, "No unmasked observation points to fit."));
    }
    let uncs = match &state.uncs {
        Some(u) => gather_masked(state, u, &segments),
        None => vec![1.0; spec.len()],
    };
    if uncs.len() != spec.len() {
        return Err(AppError::new(
            2,
            format!("{} uncertainties for {} observation points.", uncs.len(), spec.len()),
        ));
    }
    // Relative uncertainties.
    let uncs: Vec<f64> = uncs.iter().zip(spec.iter()).map(|(u, s)| u / s).collect();

    if state.uncs.is_none() {
        log::warn!("Uncertainties not set, using 1 for every point");
        state.uncs = Some(state.spec.iter().map(|s| vec![1.0; s.len()]).collect());
    }
    if selection.fit_vrad {
        state.vrad_flag = VradFlag::Each;
    }
    if selection.fit_continuum && matches!(state.cscale_flag, CscaleFlag::None | CscaleFlag::Fix) {
        state.cscale_flag = CscaleFlag::Linear;
    }

    let solver_opts = SolverOptions {
        max_nfev: opts.max_nfev,
        loss: Loss::SoftL1,
        x_scale: Some(scale),
        ..SolverOptions::default()
    };

    let (result, nfev) = {
        let mut evaluator = ResidualEvaluator::new(synth, state, params.clone(), segments, spec, uncs, bounds.clone())
            .with_snapshot(opts.filename.as_deref().map(tmp_snapshot_path))
            .with_observer(observer)
            .with_systematics(opts.systematics);
        let result = least_squares(&mut evaluator, &x0, &bounds, &solver_opts)?;
        // Leave the state synthesized at the solution, not at the last trial.
        evaluator.evaluate(&result.x, false)?;
        (result, evaluator.context().nfev)
    };

    let (covar, punc, punc2) = uncertainties(&result);
    let chisq = reduced_chi_square(result.cost, result.fun.len(), params.len());
    let labels: Vec<String> = params.iter().map(|p| p.label()).collect();
    let pder = (0..result.jac.nrows())
        .map(|i| result.jac.row(i).iter().copied().collect())
        .collect();

    for (p, v) in params.iter().zip(result.x.iter()) {
        state.set_param(*p, *v);
    }
    let fit = FitResults {
        parameters: labels.clone(),
        values: result.x.clone(),
        covar,
        grad: result.grad.clone(),
        pder,
        resid: result.fun.clone(),
        cost: result.cost,
        chisq,
        punc,
        punc2,
        nfev,
        message: result.status.message().to_string(),
    };
    state.fitparameters = labels;
    state.fitresults = Some(fit.clone());

    if let Some(path) = &opts.filename {
        save_state(path, state)?;
    }

    log::info!("{}", result.status.message());
    if !result.status.is_converged() {
        log::warn!("Fit stopped before convergence after {nfev} evaluations");
    }
    log::info!("{:<12} {:>14} {:>12} {:>12}", "Parameter", "Value", "Uncertainty", "Alt. unc.");
    for i in 0..fit.parameters.len() {
        log::info!(
            "{:<12} {:>14.6} {:>12.6} {:>12.6}",
            fit.parameters[i],
            fit.values[i],
            fit.punc[i],
            fit.punc2[i]
        );
    }
    log::info!("Reduced chi-square: {:.4}", fit.chisq);

    Ok(fit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AtmosphereSpec, Element, Line, LineList, MASK_LINE};
    use crate::engine::{AnalyticAtmospheres, AnalyticEngine};
    use crate::io::load_state;
    use crate::synth::SynthOptions;
    use tempfile::TempDir;

    fn line(species: &str, wl: f64, gflog: f64) -> Line {
        Line {
            species: species.to_string(),
            wlcent: wl,
            excit: 2.5,
            gflog,
            gamrad: 0.0,
            gamqst: 0.0,
            gamvw: 0.0,
            depth: 0.5,
            error: 0.1,
        }
    }

    fn synthesizer() -> Synthesizer<AnalyticEngine, AnalyticAtmospheres> {
        Synthesizer::new(AnalyticEngine::new(), AnalyticAtmospheres::default())
    }

    fn base_state() -> ModelState {
        ModelState::new(
            vec![[5000.0, 5004.0]],
            LineList::new(vec![
                line("Fe 1", 5001.0, -0.8),
                line("Fe 1", 5002.2, -1.2),
                line("Ca 1", 5003.1, -1.0),
            ]),
            AtmosphereSpec::grid("grid.sav"),
        )
    }

    /// Observation synthesized with an iron abundance of `fe_truth`.
    fn observation(fe_truth: f64) -> ModelState {
        let fe = Element::from_symbol("Fe").unwrap();
        let mut truth = base_state();
        truth.abund.set(fe, fe_truth);
        synthesizer()
            .synthesize_spectrum(&mut truth, None, SynthOptions::default())
            .unwrap();

        let mut s = base_state();
        s.wave = truth.wave.clone();
        s.spec = truth.synth.clone();
        s.mask = vec![vec![MASK_LINE; s.wave[0].len()]];
        s
    }

    #[test]
    fn reduced_chi_square_uses_degrees_of_freedom() {
        let cost = 12.5;
        let n = 103;
        assert_eq!(reduced_chi_square(cost, n, 3), 2.0 * cost / (n as f64 - 3.0));
        assert_eq!(reduced_chi_square(cost, 2, 3), 2.0 * cost);
    }

    #[test]
    fn missing_observation_fails_before_touching_the_state() {
        let mut s = base_state();
        let before = s.clone();
        let err = solve(&mut synthesizer(), &mut s, &["teff"], &SolveOptions::default(), None).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(s, before);
    }

    #[test]
    fn only_mode_switches_is_rejected() {
        let mut s = observation(7.5);
        let before = s.clone();
        let err = solve(&mut synthesizer(), &mut s, &["vrad", "cont"], &SolveOptions::default(), None).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(s, before);
    }

    #[test]
    fn fully_masked_observation_is_insufficient_data() {
        let mut s = observation(7.5);
        s.mask = vec![vec![0; s.wave[0].len()]];
        let err = solve(&mut synthesizer(), &mut s, &["Fe abund"], &SolveOptions::default(), None).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn iron_abundance_is_recovered() {
        let mut s = observation(7.8);
        let mut synth = synthesizer();
        let fit = solve(&mut synth, &mut s, &["fe abund"], &SolveOptions::default(), None).unwrap();

        let fe = Element::from_symbol("Fe").unwrap();
        let value = s.abund.explicit(fe).unwrap();
        assert!((value - 7.8).abs() < 0.02, "Fe = {value}");
        assert_eq!(s.fitparameters, vec!["Fe abund".to_string()]);
        assert_eq!(fit.values.len(), 1);
        assert_eq!(fit.punc.len(), 1);
        assert_eq!(fit.resid.len(), s.wave[0].len());
        assert!(fit.chisq < 1e-4);
        assert!(s.uncs.is_some());
        assert_eq!(s.fitresults.as_ref(), Some(&fit));
    }

    #[test]
    fn three_parameter_fit_reports_reduced_chi_square_of_its_cost() {
        let mut s = observation(7.7);
        let opts = SolveOptions {
            max_nfev: Some(40),
            ..SolveOptions::default()
        };
        let fit = solve(&mut synthesizer(), &mut s, &["teff", "Fe abund", "vmic"], &opts, None).unwrap();

        let n = fit.resid.len();
        assert!(n > 3);
        assert_eq!(fit.values.len(), 3);
        assert_eq!(fit.chisq, 2.0 * fit.cost / (n - 3) as f64);

        // Soft-L1 cost of the reported residuals.
        let cost: f64 = fit.resid.iter().map(|f| (1.0 + f * f).sqrt() - 1.0).sum();
        assert!((cost - fit.cost).abs() <= 1e-9 * cost.max(1.0));
    }

    struct Iterations(usize);

    impl FitObserver for Iterations {
        fn on_iteration(&mut self, iteration: usize, _state: &ModelState) {
            self.0 = iteration;
        }
    }

    #[test]
    fn snapshots_and_observer_follow_the_fit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("star.json");
        let mut s = observation(7.7);
        let mut seen = Iterations(0);
        let opts = SolveOptions {
            filename: Some(path.clone()),
            max_nfev: Some(30),
            systematics: true,
            ..SolveOptions::default()
        };
        solve(&mut synthesizer(), &mut s, &["Fe abund", "vmic"], &opts, Some(&mut seen)).unwrap();

        assert!(seen.0 >= 2);
        assert!(dir.path().join("star_tmp.json").exists());
        let saved = load_state(&path).unwrap();
        assert_eq!(saved.fitparameters, vec!["Fe abund".to_string(), "vmic".to_string()]);
        assert!(saved.fitresults.is_some());
        assert_eq!(saved.systematics.len(), 1);
    }
}
