//! Residual evaluation for the fit loop.
//!
//! [`ResidualEvaluator`] borrows the synthesizer and the model state for the
//! duration of one solve. Each evaluation writes the trial parameters into the
//! state, re-synthesizes the fitted segments and returns
//!
//! ```text
//! (synth - spec) / uncs      over the unmasked points
//! ```
//!
//! An atmosphere outside its interpolation domain yields the single sentinel
//! residual `+inf`, which the solver treats as an infeasible trial point.
//!
//! Call-scoped state (iteration counter, last residuals) lives in an explicit
//! [`EvalContext`] so that the Jacobian can start from the cached base point.

use std::path::PathBuf;

use nalgebra::DMatrix;

use crate::domain::{ModelState, ParamName};
use crate::engine::{AtmosphereGrid, RadiativeTransfer};
use crate::error::AppError;
use crate::fit::bounds::Bounds;
use crate::fit::jacobian::approx_derivative;
use crate::fit::solver::LeastSquaresProblem;
use crate::fit::systematics::linelist_errors;
use crate::io::save_state;
use crate::synth::{SynthOptions, Synthesizer};

/// Progress hook, called after every non-Jacobian evaluation.
pub trait FitObserver {
    fn on_iteration(&mut self, iteration: usize, state: &ModelState);
}

/// Cached state shared between residual and Jacobian evaluations.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    /// Completed non-Jacobian evaluations.
    pub iteration: usize,
    pub last_params: Option<Vec<f64>>,
    pub last_residuals: Option<Vec<f64>>,
    /// All evaluations, including Jacobian perturbations.
    pub nfev: usize,
    pub jacobian_nfev: usize,
}

impl EvalContext {
    /// Residuals of the last non-Jacobian evaluation if it was at `x`.
    pub fn cached_residuals(&self, x: &[f64]) -> Option<&[f64]> {
        match (&self.last_params, &self.last_residuals) {
            (Some(p), Some(r)) if p.as_slice() == x => Some(r.as_slice()),
            _ => None,
        }
    }
}

/// Unmasked values of `arrays` over `segments`, concatenated.
pub fn gather_masked(state: &ModelState, arrays: &[Vec<f64>], segments: &[usize]) -> Vec<f64> {
    let mut out = Vec::new();
    for &seg in segments {
        let Some(values) = arrays.get(seg) else {
            continue;
        };
        let good = state.mask_good(seg);
        out.extend(
            values
                .iter()
                .zip(good.iter())
                .filter(|(_, g)| **g)
                .map(|(v, _)| *v),
        );
    }
    out
}

pub struct ResidualEvaluator<'a, 'o, E: RadiativeTransfer, A: AtmosphereGrid> {
    synth: &'a mut Synthesizer<E, A>,
    state: &'a mut ModelState,
    params: Vec<ParamName>,
    segments: Vec<usize>,
    spec: Vec<f64>,
    uncs: Vec<f64>,
    bounds: Bounds,
    snapshot: Option<PathBuf>,
    observer: Option<&'o mut dyn FitObserver>,
    systematics: bool,
    ctx: EvalContext,
}

impl<'a, 'o, E: RadiativeTransfer, A: AtmosphereGrid> ResidualEvaluator<'a, 'o, E, A> {
    /// `spec` and `uncs` are the unmasked observation points of `segments`,
    /// in the order produced by [`gather_masked`].
    pub fn new(
        synth: &'a mut Synthesizer<E, A>,
        state: &'a mut ModelState,
        params: Vec<ParamName>,
        segments: Vec<usize>,
        spec: Vec<f64>,
        uncs: Vec<f64>,
        bounds: Bounds,
    ) -> Self {
        Self {
            synth,
            state,
            params,
            segments,
            spec,
            uncs,
            bounds,
            snapshot: None,
            observer: None,
            systematics: false,
            ctx: EvalContext::default(),
        }
    }

    /// Write the state here after every non-Jacobian evaluation.
    pub fn with_snapshot(mut self, path: Option<PathBuf>) -> Self {
        self.snapshot = path;
        self
    }

    pub fn with_observer(mut self, observer: Option<&'o mut dyn FitObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Store per-point line data systematics in the state.
    pub fn with_systematics(mut self, enabled: bool) -> Self {
        self.systematics = enabled;
        self
    }

    pub fn context(&self) -> &EvalContext {
        &self.ctx
    }

    pub fn state(&self) -> &ModelState {
        self.state
    }

    /// Residuals at `x`.
    ///
    /// Jacobian evaluations reuse the stored intrinsic grids and skip every
    /// side effect.
    pub fn evaluate(&mut self, x: &[f64], is_jacobian: bool) -> Result<Vec<f64>, AppError> {
        if x.len() != self.params.len() {
            return Err(AppError::new(
                4,
                format!("Got {} parameter values for {} parameters.", x.len(), self.params.len()),
            ));
        }
        for (p, v) in self.params.iter().zip(x.iter()) {
            self.state.set_param(*p, *v);
        }
        self.ctx.nfev += 1;
        if is_jacobian {
            self.ctx.jacobian_nfev += 1;
        }

        let opts = if is_jacobian {
            SynthOptions::reusing_grid()
        } else {
            SynthOptions::default()
        };
        match self.synth.synthesize_spectrum(self.state, Some(&self.segments), opts) {
            Ok(()) => {}
            Err(e) if e.is_out_of_range() => {
                log::debug!("{e}");
                return Ok(vec![f64::INFINITY]);
            }
            Err(e) => return Err(e),
        }

        let synth = gather_masked(self.state, &self.state.synth, &self.segments);
        if synth.len() != self.spec.len() {
            return Err(AppError::new(
                4,
                format!(
                    "Synthetic spectrum has {} unmasked points, observation has {}.",
                    synth.len(),
                    self.spec.len()
                ),
            ));
        }
        let mut non_finite = 0;
        let resid: Vec<f64> = synth
            .iter()
            .zip(self.spec.iter().zip(self.uncs.iter()))
            .map(|(s, (o, u))| {
                let r = (s - o) / u;
                if r.is_finite() {
                    r
                } else {
                    non_finite += 1;
                    0.0
                }
            })
            .collect();
        if non_finite > 0 {
            log::debug!("{non_finite} non-finite residuals set to zero");
        }

        if !is_jacobian {
            self.after_iteration(x, &resid);
        }
        Ok(resid)
    }

    fn after_iteration(&mut self, x: &[f64], resid: &[f64]) {
        self.ctx.iteration += 1;
        self.ctx.last_params = Some(x.to_vec());
        self.ctx.last_residuals = Some(resid.to_vec());

        let values: Vec<String> = self
            .params
            .iter()
            .zip(x.iter())
            .map(|(p, v)| format!("{p}={v:.4}"))
            .collect();
        log::debug!("Iteration {}: {}", self.ctx.iteration, values.join(", "));

        if self.systematics {
            let ranges = self.synth.line_effective_ranges();
            let errors = self.state.linelist.errors();
            let n = self.state.n_segments();
            self.state.systematics.resize(n, Vec::new());
            for &seg in &self.segments {
                self.state.systematics[seg] =
                    linelist_errors(&ranges, &self.state.wave[seg], &self.state.spec[seg], &errors);
            }
        }

        if let Some(path) = &self.snapshot {
            if let Err(e) = save_state(path, self.state) {
                log::warn!("{e}");
            }
        }
        if let Some(observer) = self.observer.as_mut() {
            observer.on_iteration(self.ctx.iteration, self.state);
        }
    }
}

impl<E: RadiativeTransfer, A: AtmosphereGrid> LeastSquaresProblem for ResidualEvaluator<'_, '_, E, A> {
    fn residuals(&mut self, x: &[f64]) -> Result<Vec<f64>, AppError> {
        self.evaluate(x, false)
    }

    fn jacobian(&mut self, x: &[f64], f0: &[f64]) -> Result<DMatrix<f64>, AppError> {
        let base = match self.ctx.cached_residuals(x) {
            Some(r) => r.to_vec(),
            None => f0.to_vec(),
        };
        let bounds = self.bounds.clone();
        approx_derivative(|xp| self.evaluate(xp, true), x, &base, &bounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AtmosphereSpec, Element, Line, LineList, MASK_BAD, MASK_LINE};
    use crate::engine::{AnalyticAtmospheres, AnalyticEngine};

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
            error: 0.2,
        }
    }

    fn observed() -> (Synthesizer<AnalyticEngine, AnalyticAtmospheres>, ModelState) {
        let mut synth = Synthesizer::new(AnalyticEngine::new(), AnalyticAtmospheres::default());
        let mut s = ModelState::new(
            vec![[5000.0, 5004.0]],
            LineList::new(vec![line("Fe 1", 5001.5, -0.8), line("Fe 1", 5002.8, -1.1)]),
            AtmosphereSpec::grid("grid.sav"),
        );
        synth.synthesize_spectrum(&mut s, None, SynthOptions::default()).unwrap();
        s.spec = s.synth.clone();
        s.mask = vec![vec![MASK_LINE; s.wave[0].len()]];
        s.mask[0][0] = MASK_BAD;
        (synth, s)
    }

    #[test]
    fn residuals_vanish_at_the_truth_and_respond_to_abundance() {
        let (mut synth, mut s) = observed();
        let fe = Element::from_symbol("Fe").unwrap();
        let spec = gather_masked(&s, &s.spec, &[0]);
        let n = spec.len();
        assert_eq!(n, s.wave[0].len() - 1);

        let mut ev = ResidualEvaluator::new(
            &mut synth,
            &mut s,
            vec![ParamName::Abund(fe)],
            vec![0],
            spec,
            vec![1.0; n],
            Bounds::unbounded(1),
        );
        let at_truth = ev.evaluate(&[7.50], false).unwrap();
        assert!(at_truth.iter().all(|r| r.abs() < 1e-12));
        let richer = ev.evaluate(&[7.80], false).unwrap();
        assert!(richer.iter().any(|r| *r < -1e-3));

        assert_eq!(ev.context().iteration, 2);
        assert_eq!(ev.context().cached_residuals(&[7.80]), Some(richer.as_slice()));
        assert!(ev.context().cached_residuals(&[7.50]).is_none());
    }

    #[test]
    fn out_of_range_atmosphere_gives_the_sentinel() {
        let (mut synth, mut s) = observed();
        let spec = gather_masked(&s, &s.spec, &[0]);
        let n = spec.len();
        let mut ev = ResidualEvaluator::new(
            &mut synth,
            &mut s,
            vec![ParamName::Teff],
            vec![0],
            spec,
            vec![1.0; n],
            Bounds::unbounded(1),
        );
        let r = ev.evaluate(&[20000.0], false).unwrap();
        assert_eq!(r.len(), 1);
        assert!(r[0].is_infinite());
        assert_eq!(ev.context().iteration, 0);
    }

    struct Counter(Vec<usize>);

    impl FitObserver for Counter {
        fn on_iteration(&mut self, iteration: usize, _state: &ModelState) {
            self.0.push(iteration);
        }
    }

    #[test]
    fn jacobian_evaluations_skip_side_effects() {
        let (mut synth, mut s) = observed();
        let spec = gather_masked(&s, &s.spec, &[0]);
        let n = spec.len();
        let mut counter = Counter(Vec::new());
        {
            let mut ev = ResidualEvaluator::new(
                &mut synth,
                &mut s,
                vec![ParamName::Vmic],
                vec![0],
                spec,
                vec![1.0; n],
                Bounds {
                    lower: vec![0.0],
                    upper: vec![f64::INFINITY],
                },
            )
            .with_observer(Some(&mut counter))
            .with_systematics(true);

            let f0 = ev.residuals(&[1.2]).unwrap();
            let jac = ev.jacobian(&[1.2], &f0).unwrap();
            assert_eq!(jac.nrows(), n);
            assert!(jac.iter().any(|v| v.abs() > 1e-6));
            assert_eq!(ev.context().jacobian_nfev, 2);
            assert_eq!(ev.context().iteration, 1);
            assert_eq!(ev.state().systematics[0].len(), ev.state().wave[0].len());
        }
        assert_eq!(counter.0, vec![1]);
        assert!(s.systematics[0].iter().any(|v| *v > 0.0));
    }
}
