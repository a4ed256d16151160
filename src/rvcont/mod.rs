//! Radial velocity and continuum reconciliation.
//!
//! After the segments are synthesized, the synthetic flux is matched to the
//! observation by:
//!
//! - a Doppler shift (one velocity per segment, or one shared by all)
//! - a continuum polynomial per segment (degree 0, 1 or 2)
//!
//! The velocity is found by grid search: for each trial velocity the synthetic
//! flux is shifted onto the observed points, the continuum is solved by
//! weighted OLS and the chi-square recorded. The coarse grid (1 km/s over
//! `±vrad_limit`) is evaluated in parallel, then refined on a fine grid and by
//! the vertex of a parabola through the best fine point and its neighbours.

use rayon::prelude::*;

use crate::domain::{CscaleFlag, ModelState, VradFlag};
use crate::error::AppError;
use crate::math::interp;
use crate::synth::doppler_factor;

pub mod continuum;

pub use continuum::*;

/// Coarse velocity grid step (km/s).
pub const COARSE_STEP: f64 = 1.0;
/// Fine velocity grid step (km/s).
pub const FINE_STEP: f64 = 0.05;

static UNIT_POLY: [f64; 1] = [1.0];

/// Velocity and continuum per requested segment (same order as the request).
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
    pub vrad: Vec<f64>,
    pub cscale: Vec<Vec<f64>>,
}

/// Determine radial velocities and continuum coefficients.
///
/// `wgrid[k]` / `flux[k]` are the unshifted synthetic spectrum of
/// `segments[k]`. Modes follow `state.vrad_flag` and `state.cscale_flag`:
///
/// - `VradFlag::None` → 0, `Fix` → stored value, `Each` / `Whole` → searched
/// - `CscaleFlag::None` → `[1]`, `Fix` → stored value, otherwise fitted
///
/// A segment without usable observed points gets velocity 0 and the identity
/// continuum.
pub fn determine(
    state: &ModelState,
    segments: &[usize],
    wgrid: &[Vec<f64>],
    flux: &[Vec<f64>],
    vrad_limit: f64,
) -> Result<Reconciliation, AppError> {
    if wgrid.len() != segments.len() || flux.len() != segments.len() {
        return Err(AppError::new(
            4,
            format!(
                "Reconciliation needs one synthetic spectrum per segment ({} segments, {} grids, {} fluxes).",
                segments.len(),
                wgrid.len(),
                flux.len()
            ),
        ));
    }

    let observations: Vec<SegmentObservation> = segments
        .iter()
        .enumerate()
        .map(|(slot, &seg)| observed_points(state, seg, slot))
        .collect();

    let mut vrad: Vec<f64> = segments.iter().map(|&seg| initial_velocity(state, seg)).collect();
    let mut cscale: Vec<Vec<f64>> = segments.iter().map(|&seg| initial_continuum(state, seg)).collect();

    let search = matches!(state.vrad_flag, VradFlag::Each | VradFlag::Whole);
    let degree = state.cscale_flag.fit_degree();

    let groups: Vec<Vec<usize>> = if state.vrad_flag == VradFlag::Whole {
        vec![(0..segments.len()).collect()]
    } else {
        (0..segments.len()).map(|k| vec![k]).collect()
    };

    for group in groups {
        let members: Vec<&SegmentObservation> = group
            .iter()
            .map(|&k| &observations[k])
            .filter(|o| !o.is_empty())
            .collect();
        // No information: keep the initial (identity or fixed) values.
        if members.is_empty() {
            continue;
        }

        let fixed: Vec<Vec<f64>> = group.iter().map(|&k| cscale[k].clone()).collect();
        let matcher = GroupMatcher {
            members: &members,
            wgrid,
            flux,
            degree,
            fixed: &fixed,
            group: &group,
        };

        let v = if search {
            let v = matcher.search(vrad_limit);
            for &k in &group {
                vrad[k] = v;
            }
            v
        } else {
            vrad[group[0]]
        };

        if degree.is_some() {
            for (k, coeffs) in matcher.continua(v) {
                cscale[k] = coeffs;
            }
        }
    }

    log::debug!("Radial velocity: {vrad:?}");
    log::debug!("Continuum coefficients: {cscale:?}");
    Ok(Reconciliation { vrad, cscale })
}

fn initial_velocity(state: &ModelState, seg: usize) -> f64 {
    match state.vrad_flag {
        VradFlag::Fix => state.vrad.get(seg).copied().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn initial_continuum(state: &ModelState, seg: usize) -> Vec<f64> {
    match state.cscale_flag {
        CscaleFlag::Fix => state.cscale.get(seg).cloned().unwrap_or_else(|| vec![1.0]),
        CscaleFlag::None => vec![1.0],
        flag => identity_poly(flag.fit_degree().unwrap_or(0)),
    }
}

/// Good, finite observed points of one segment.
fn observed_points(state: &ModelState, seg: usize, slot: usize) -> SegmentObservation {
    let (Some(wave), Some(spec)) = (state.wave.get(seg), state.spec.get(seg)) else {
        return SegmentObservation::default();
    };
    if wave.is_empty() || spec.len() != wave.len() {
        return SegmentObservation::default();
    }
    let good = state.mask_good(seg);
    let uncs = state.uncs.as_ref().and_then(|u| u.get(seg));

    let mut obs = SegmentObservation {
        slot,
        origin: wave[0],
        ..SegmentObservation::default()
    };
    for i in 0..wave.len() {
        let sigma = uncs.and_then(|u| u.get(i)).copied().unwrap_or(1.0);
        if !good.get(i).copied().unwrap_or(false)
            || !spec[i].is_finite()
            || !wave[i].is_finite()
            || !(sigma.is_finite() && sigma > 0.0)
        {
            continue;
        }
        obs.wave.push(wave[i]);
        obs.flux.push(spec[i]);
        obs.weight.push(1.0 / (sigma * sigma));
    }
    obs
}

/// Matches one group of segments sharing a velocity.
struct GroupMatcher<'a> {
    members: &'a [&'a SegmentObservation],
    wgrid: &'a [Vec<f64>],
    flux: &'a [Vec<f64>],
    degree: Option<usize>,
    /// Continuum used when it is not fitted, by group position.
    fixed: &'a [Vec<f64>],
    group: &'a [usize],
}

impl GroupMatcher<'_> {
    /// Synthetic flux of a member shifted by `v` and sampled at its observed points.
    fn shifted_model(&self, obs: &SegmentObservation, v: f64) -> Vec<f64> {
        let factor = doppler_factor(v);
        let shifted: Vec<f64> = self.wgrid[obs.slot].iter().map(|w| w * factor).collect();
        interp(&obs.wave, &shifted, &self.flux[obs.slot])
    }

    fn fixed_for(&self, slot: usize) -> &[f64] {
        self.group
            .iter()
            .position(|&k| k == slot)
            .map_or(&UNIT_POLY[..], |pos| self.fixed[pos].as_slice())
    }

    fn coefficients(&self, obs: &SegmentObservation, model: &[f64]) -> Vec<f64> {
        match self.degree {
            Some(d) => fit_continuum(obs, model, d).unwrap_or_else(|| identity_poly(d)),
            None => self.fixed_for(obs.slot).to_vec(),
        }
    }

    fn chi_square(&self, v: f64) -> f64 {
        self.members
            .iter()
            .map(|obs| {
                let model = self.shifted_model(obs, v);
                let coeffs = self.coefficients(obs, &model);
                chi_square(obs, &model, &coeffs)
            })
            .sum()
    }

    fn continua(&self, v: f64) -> Vec<(usize, Vec<f64>)> {
        self.members
            .iter()
            .map(|obs| {
                let model = self.shifted_model(obs, v);
                (obs.slot, self.coefficients(obs, &model))
            })
            .collect()
    }

    /// Best velocity on a grid of `step` over `[lo, hi]`, with its neighbours' chi-square.
    fn grid_minimum(&self, lo: f64, hi: f64, step: f64) -> (f64, f64, Option<f64>, Option<f64>) {
        let n = ((hi - lo) / step).round().max(0.0) as usize + 1;
        let chi: Vec<f64> = (0..n)
            .into_par_iter()
            .map(|i| {
                let c = self.chi_square(lo + step * i as f64);
                if c.is_finite() { c } else { f64::INFINITY }
            })
            .collect();

        // Deterministic selection: lowest chi-square, ties broken by index.
        let mut best = 0;
        for i in 1..n {
            if chi[i] < chi[best] {
                best = i;
            }
        }
        let left = best.checked_sub(1).map(|i| chi[i]);
        let right = (best + 1 < n).then(|| chi[best + 1]);
        (lo + step * best as f64, chi[best], left, right)
    }

    fn search(&self, vrad_limit: f64) -> f64 {
        let limit = vrad_limit.abs().max(COARSE_STEP);
        let (coarse, _, _, _) = self.grid_minimum(-limit, limit, COARSE_STEP);

        let lo = (coarse - COARSE_STEP).max(-limit);
        let hi = (coarse + COARSE_STEP).min(limit);
        let (fine, c0, left, right) = self.grid_minimum(lo, hi, FINE_STEP);

        let (Some(cl), Some(cr)) = (left, right) else {
            return fine;
        };
        let curvature = cl - 2.0 * c0 + cr;
        if !(curvature > 0.0) {
            return fine;
        }
        let offset = 0.5 * FINE_STEP * (cl - cr) / curvature;
        (fine + offset.clamp(-FINE_STEP, FINE_STEP)).clamp(-limit, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AtmosphereSpec, LineList, MASK_BAD, MASK_LINE};
    use crate::synth::CLIGHT;

    fn profile(w: f64) -> f64 {
        let lines = [(6001.2, 0.5, 0.08), (6002.7, 0.3, 0.06), (6003.9, 0.6, 0.1)];
        lines
            .iter()
            .fold(1.0, |acc, (c, d, s)| acc * (1.0 - d * (-((w - c) / s).powi(2)).exp()))
    }

    /// Observation at rest on `wave`, synthetic spectrum blueshifted by `rv`.
    fn case(rv: f64) -> (ModelState, Vec<f64>, Vec<f64>) {
        let wave: Vec<f64> = (0..=500).map(|i| 6000.0 + 0.01 * i as f64).collect();
        let mut state = ModelState::new(
            vec![[6000.0, 6005.0]],
            LineList::default(),
            AtmosphereSpec::grid("grid.sav"),
        );
        state.spec = vec![wave.iter().map(|&w| profile(w)).collect()];
        state.uncs = Some(vec![vec![0.01; wave.len()]]);
        state.mask = vec![vec![MASK_LINE; wave.len()]];
        state.wave = vec![wave.clone()];

        let x_syn: Vec<f64> = wave.iter().map(|w| w * (1.0 - rv / CLIGHT)).collect();
        let y_syn: Vec<f64> = wave.iter().map(|&w| profile(w)).collect();
        (state, x_syn, y_syn)
    }

    #[test]
    fn both_disabled_gives_identity() {
        let (state, x, y) = case(10.0);
        let out = determine(&state, &[0], &[x], &[y], 100.0).unwrap();
        assert_eq!(out.vrad, vec![0.0]);
        assert_eq!(out.cscale, vec![vec![1.0]]);
    }

    #[test]
    fn injected_velocity_is_recovered_with_identity_continuum() {
        let (mut state, x, y) = case(10.0);
        state.vrad_flag = VradFlag::Each;

        let out = determine(&state, &[0], &[x.clone()], &[y.clone()], 100.0).unwrap();
        assert!((out.vrad[0] - 10.0).abs() < 1.0);
        assert_eq!(out.cscale[0], vec![1.0]);

        for (flag, expected) in [
            (CscaleFlag::Constant, vec![1.0]),
            (CscaleFlag::Linear, vec![0.0, 1.0]),
            (CscaleFlag::Quadratic, vec![0.0, 0.0, 1.0]),
        ] {
            state.cscale_flag = flag;
            let out = determine(&state, &[0], &[x.clone()], &[y.clone()], 100.0).unwrap();
            assert!((out.vrad[0] - 10.0).abs() < 1.0);
            assert_eq!(out.cscale[0].len(), expected.len());
            for (c, e) in out.cscale[0].iter().zip(expected) {
                assert!((c - e).abs() < 1e-2);
            }
        }
    }

    #[test]
    fn shared_velocity_over_segments() {
        let (mut state, x, y) = case(-12.0);
        state.wran.push([6000.0, 6005.0]);
        state.wave.push(state.wave[0].clone());
        state.spec.push(state.spec[0].clone());
        state.mask.push(state.mask[0].clone());
        if let Some(u) = state.uncs.as_mut() {
            u.push(u[0].clone());
        }
        state.vrad_flag = VradFlag::Whole;

        let out = determine(&state, &[0, 1], &[x.clone(), x], &[y.clone(), y], 50.0).unwrap();
        assert_eq!(out.vrad[0], out.vrad[1]);
        assert!((out.vrad[0] + 12.0).abs() < 1.0);
    }

    #[test]
    fn fully_masked_segment_falls_back_to_identity() {
        let (mut state, x, y) = case(10.0);
        state.vrad_flag = VradFlag::Each;
        state.cscale_flag = CscaleFlag::Constant;
        state.mask = vec![vec![MASK_BAD; state.wave[0].len()]];

        let out = determine(&state, &[0], &[x], &[y], 100.0).unwrap();
        assert_eq!(out.vrad, vec![0.0]);
        assert_eq!(out.cscale, vec![vec![1.0]]);
    }

    #[test]
    fn fixed_modes_keep_stored_values() {
        let (mut state, x, y) = case(10.0);
        state.vrad_flag = VradFlag::Fix;
        state.cscale_flag = CscaleFlag::Fix;
        state.vrad = vec![3.5];
        state.cscale = vec![vec![0.01, 0.98]];

        let out = determine(&state, &[0], &[x], &[y], 100.0).unwrap();
        assert_eq!(out.vrad, vec![3.5]);
        assert_eq!(out.cscale, vec![vec![0.01, 0.98]]);
    }
}
