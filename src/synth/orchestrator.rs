//! Multi-segment synthesis.
//!
//! [`Synthesizer`] owns the engine session, the atmosphere grid and the
//! atmosphere cache. One call of [`Synthesizer::synthesize_spectrum`]:
//!
//! 1. pushes the global inputs (line list, atmosphere, abundances, switches,
//!    NLTE) to the engine once
//! 2. synthesizes every requested segment
//! 3. determines radial velocities and continuum coefficients
//! 4. shifts, resamples and scales each segment onto its output wavelengths
//!
//! The state is only written after every segment succeeded.

use std::path::PathBuf;

use crate::config::DEFAULT_VRAD_LIMIT;
use crate::domain::{AtmoMethod, CscaleFlag, ModelState};
use crate::engine::{AtmosphereGrid, EngineSession, RadiativeTransfer, SessionStats};
use crate::error::AppError;
use crate::math::{is_zero_poly, polyval, safe_interpolation};
use crate::rvcont::determine;
use crate::synth::{doppler_factor, synthesize_segment, AtmosphereCache, SegmentSynthesis};

/// What to push to the engine and whether to reuse the intrinsic grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthOptions {
    /// Solve on the intrinsic grids stored in the state (Jacobian evaluations).
    pub reuse_wavelength_grid: bool,
    pub pass_line_list: bool,
    pub pass_atmosphere: bool,
    pub pass_nlte: bool,
}

impl Default for SynthOptions {
    fn default() -> Self {
        Self {
            reuse_wavelength_grid: false,
            pass_line_list: true,
            pass_atmosphere: true,
            pass_nlte: true,
        }
    }
}

impl SynthOptions {
    pub fn reusing_grid() -> Self {
        Self {
            reuse_wavelength_grid: true,
            ..Self::default()
        }
    }
}

pub struct Synthesizer<E: RadiativeTransfer, A: AtmosphereGrid> {
    session: EngineSession<E>,
    atmospheres: A,
    cache: AtmosphereCache,
    vrad_limit: f64,
}

impl<E: RadiativeTransfer, A: AtmosphereGrid> Synthesizer<E, A> {
    pub fn new(engine: E, atmospheres: A) -> Self {
        Self {
            session: EngineSession::new(engine),
            atmospheres,
            cache: AtmosphereCache::new(),
            vrad_limit: DEFAULT_VRAD_LIMIT,
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.session = self.session.with_data_dir(dir);
        self
    }

    /// Half-width of the radial velocity search (km/s).
    pub fn with_vrad_limit(mut self, limit: f64) -> Self {
        self.vrad_limit = limit;
        self
    }

    pub fn atmospheres(&self) -> &A {
        &self.atmospheres
    }

    pub fn cache(&self) -> &AtmosphereCache {
        &self.cache
    }

    pub fn stats(&self) -> SessionStats {
        self.session.stats()
    }

    /// Effective wavelength range of each line of the active list.
    pub fn line_effective_ranges(&self) -> Vec<(f64, f64)> {
        self.session.line_effective_ranges()
    }

    /// Synthesize `segments` (all when `None`) and store the results in `state`.
    pub fn synthesize_spectrum(
        &mut self,
        state: &mut ModelState,
        segments: Option<&[usize]>,
        opts: SynthOptions,
    ) -> Result<(), AppError> {
        state.validate_layout()?;
        let segments = state.segment_indices(segments)?;
        if segments.is_empty() {
            return Ok(());
        }

        let reuse = opts.reuse_wavelength_grid
            && segments
                .iter()
                .all(|&s| state.wint.get(s).is_some_and(|w| w.len() >= 2));
        if opts.reuse_wavelength_grid && !reuse {
            log::debug!("No stored intrinsic grid, computing a new one");
        }

        if opts.pass_line_list && !reuse {
            self.session.input_line_list(&state.linelist)?;
        }
        let mut resolved = None;
        if opts.pass_atmosphere {
            let atmo = self.cache.resolve(
                &self.atmospheres,
                state.teff,
                state.logg,
                state.monh,
                &state.atmo,
            )?;
            self.session.input_model(state.teff, state.logg, state.vmic, &atmo)?;
            self.session.input_abund(&state.abund, state.monh)?;
            self.session.set_ionization(state.ionization)?;
            self.session.set_van_der_waals_scale(state.gam6)?;
            self.session.set_h2_broadening(state.h2broad)?;
            resolved = Some(atmo);
        }
        // An empty spec resets the engine to LTE.
        if opts.pass_nlte {
            self.session.input_nlte(&state.nlte)?;
        }

        let mut parts: Vec<SegmentSynthesis> = Vec::with_capacity(segments.len());
        for (k, &seg) in segments.iter().enumerate() {
            log::debug!("Segment {seg}");
            let reuse_grid = if reuse { state.wint.get(seg).map(Vec::as_slice) } else { None };
            // Line opacities are computed for the whole list in the first segment.
            let part = synthesize_segment(&mut self.session, state, seg, k != 0, reuse_grid)?;
            parts.push(part);
        }

        let waves: Vec<Vec<f64>> = segments
            .iter()
            .zip(parts.iter())
            .map(|(&seg, part)| match state.wave.get(seg) {
                Some(w) if !w.is_empty() => w.clone(),
                _ => output_wavelengths(state.wran[seg], &part.wgrid),
            })
            .collect();

        let wgrids: Vec<Vec<f64>> = parts.iter().map(|p| p.wgrid.clone()).collect();
        let fluxes: Vec<Vec<f64>> = parts.iter().map(|p| p.flux.clone()).collect();
        let matched = determine(state, &segments, &wgrids, &fluxes, self.vrad_limit)?;

        let mut synth = Vec::with_capacity(segments.len());
        for (k, part) in parts.iter().enumerate() {
            let factor = doppler_factor(matched.vrad[k]);
            let shifted: Vec<f64> = part.wgrid.iter().map(|w| w * factor).collect();
            let mut smod = safe_interpolation(&shifted, &part.flux, &waves[k]);

            let coeffs = &matched.cscale[k];
            if !coeffs.is_empty() && !is_zero_poly(coeffs) {
                let origin = waves[k].first().copied().unwrap_or(0.0);
                for (s, w) in smod.iter_mut().zip(waves[k].iter()) {
                    *s *= polyval(coeffs, w - origin);
                }
            }
            synth.push(smod);
        }

        // Commit.
        state.ensure_segment_outputs();
        for (k, &seg) in segments.iter().enumerate() {
            state.wave[seg] = waves[k].clone();
            state.synth[seg] = std::mem::take(&mut synth[k]);
            state.wint[seg] = std::mem::take(&mut parts[k].wint);
            state.vrad[seg] = matched.vrad[k];
            if state.cscale_flag != CscaleFlag::Fix {
                state.cscale[seg] = matched.cscale[k].clone();
            }
        }
        if let Some(atmo) = resolved {
            if state.atmo.method == AtmoMethod::Grid {
                state.atmo.model = Some(atmo);
            }
        }
        state.nlte_flags = self.session.nlte_flags();
        Ok(())
    }
}

/// Output wavelengths of a segment: the nominal endpoints plus the uniform
/// grid points strictly inside them.
pub fn output_wavelengths(wran: [f64; 2], wgrid: &[f64]) -> Vec<f64> {
    let [begin, end] = wran;
    let mut wave = Vec::with_capacity(wgrid.len());
    wave.push(begin);
    wave.extend(wgrid.iter().copied().filter(|&w| w > begin && w < end));
    wave.push(end);
    wave
}
