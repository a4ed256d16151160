//! Deterministic analytic engine and atmosphere grid.
//!
//! This is not a radiative transfer code. It produces physically shaped
//! intensities cheaply so that the orchestration and fitting layers can be run
//! end to end without the native library:
//!
//! - continuum: a limb-darkened surface brightness scaling with `teff^4`
//! - lines: Gaussian optical depth profiles whose central depth depends on
//!   `log gf`, excitation potential, temperature and abundance, and whose
//!   width depends on thermal velocity, microturbulence and gravity
//! - intrinsic grid: a uniform base grid plus points clustered at line cores,
//!   so it is non-uniform the way a real adaptive grid is
//!
//! Both types report parameters outside their validity box as
//! [`AppError::out_of_range`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::domain::{
    Abundances, Atmosphere, AtmosphereSpec, Element, GridExtent, Line, LineList, NlteSpec,
};
use crate::engine::{AtmosphereGrid, RadiativeTransfer, TransferOutput, TransferRequest};
use crate::error::AppError;
use crate::synth::CLIGHT;

/// Temperature range accepted by [`AnalyticEngine::input_model`].
pub const ENGINE_TEFF_RANGE: (f64, f64) = (3000.0, 9000.0);
/// Gravity range accepted by [`AnalyticEngine::input_model`].
pub const ENGINE_LOGG_RANGE: (f64, f64) = (0.0, 5.5);

/// Extents of the analytic atmosphere grid.
pub const ANALYTIC_GRID_EXTENT: GridExtent = GridExtent {
    teff: (3500.0, 8000.0),
    logg: (1.0, 5.0),
    monh: (-2.5, 1.0),
};

/// Resolving power of the uniform part of the intrinsic grid.
const BASE_RESOLUTION: f64 = 300_000.0;
/// Core samples per side of every line, in units of half a Doppler width.
const CORE_SAMPLES: i32 = 6;
/// Lines are active out to this many Doppler widths from the segment edges.
const LINE_REACH: f64 = 6.0;
/// Central optical depth zero point, tuned so a `log gf = -1`, 2 eV line is
/// of order unity in the Sun.
const STRENGTH_ZERO_POINT: f64 = 2.75;
/// Linear limb darkening coefficient.
const LIMB_DARKENING: f64 = 0.6;

#[derive(Debug, Clone, Copy)]
struct ModelInputs {
    teff: f64,
    logg: f64,
    vmic: f64,
}

/// Per-line opacity data computed by `compute_opacity`.
#[derive(Debug, Clone, Copy)]
struct LineOpacity {
    center: f64,
    tau0: f64,
    doppler_width: f64,
}

#[derive(Debug, Clone)]
pub struct AnalyticEngine {
    data_dir: Option<PathBuf>,
    lines: Vec<Line>,
    model: Option<ModelInputs>,
    abund: BTreeMap<Element, f64>,
    nlte: NlteSpec,
    vdw_scale: f64,
    h2_broadening: bool,
    ionization: i32,
    range: Option<(f64, f64)>,
    opacity: Vec<LineOpacity>,
    opacity_ready: bool,
}

impl Default for AnalyticEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyticEngine {
    pub fn new() -> Self {
        Self {
            data_dir: None,
            lines: Vec::new(),
            model: None,
            abund: BTreeMap::new(),
            nlte: NlteSpec::default(),
            vdw_scale: 1.0,
            h2_broadening: false,
            ionization: 0,
            range: None,
            opacity: Vec::new(),
            opacity_ready: false,
        }
    }

    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    fn line_opacity(&self, idx: usize, line: &Line, model: ModelInputs) -> LineOpacity {
        let theta = 5040.0 / model.teff;

        let element = Element::from_symbol(line.element_symbol());
        let abundance_offset = element
            .and_then(|el| Some(self.abund.get(&el)? - el.solar()?))
            .unwrap_or(0.0);
        // Ionized lines respond to gravity through the ionization balance.
        let pressure_term = if line.ion_stage() >= 2 {
            -0.5 * (model.logg - 4.44)
        } else {
            0.0
        };
        let log_tau = line.gflog + abundance_offset - theta * line.excit
            + pressure_term
            + STRENGTH_ZERO_POINT;
        let mut tau0 = 10f64.powf(log_tau);
        if let Some(b) = self.nlte.departures.get(&idx).and_then(|d| d.first()) {
            tau0 *= b.max(0.0);
        }

        let mass = element.map_or(56.0, |el| 2.0 * el.atomic_number().max(1) as f64);
        let v_thermal = 0.1290 * (model.teff / mass).sqrt();
        let b = (v_thermal * v_thermal + model.vmic * model.vmic).sqrt();
        let pressure = 1.0 + 0.05 * self.vdw_scale * 10f64.powf(0.3 * (model.logg - 4.44));
        let doppler_width = line.wlcent * b / CLIGHT * pressure;

        LineOpacity {
            center: line.wlcent,
            tau0,
            doppler_width,
        }
    }

    fn build_grid(&self, begin: f64, end: f64, active: &[LineOpacity]) -> Vec<f64> {
        let mid = 0.5 * (begin + end);
        let step = mid / BASE_RESOLUTION;
        let n_base = ((end - begin) / step).ceil().max(1.0) as usize;

        let mut grid: Vec<f64> = (0..=n_base)
            .map(|i| begin + (end - begin) * i as f64 / n_base as f64)
            .collect();
        for line in active {
            for k in -CORE_SAMPLES..=CORE_SAMPLES {
                let w = line.center + 0.5 * k as f64 * line.doppler_width;
                if w > begin && w < end {
                    grid.push(w);
                }
            }
        }
        grid.sort_by(|a, b| a.total_cmp(b));
        let tol = step * 1e-6;
        grid.dedup_by(|a, b| (*a - *b).abs() <= tol);
        grid
    }
}

impl RadiativeTransfer for AnalyticEngine {
    fn set_path(&mut self, path: &Path) -> Result<(), AppError> {
        self.data_dir = Some(path.to_path_buf());
        Ok(())
    }

    fn input_line_list(&mut self, linelist: &LineList) -> Result<(), AppError> {
        if let Some(bad) = linelist.lines.iter().find(|l| !(l.wlcent.is_finite() && l.wlcent > 0.0)) {
            return Err(AppError::new(
                2,
                format!("Line '{}' has invalid wavelength {}.", bad.species, bad.wlcent),
            ));
        }
        self.lines = linelist.lines.clone();
        self.opacity_ready = false;
        Ok(())
    }

    fn input_model(
        &mut self,
        teff: f64,
        logg: f64,
        vmic: f64,
        atmosphere: &Atmosphere,
    ) -> Result<(), AppError> {
        let inside = |v: f64, (lo, hi): (f64, f64)| v.is_finite() && v >= lo && v <= hi;
        if !inside(teff, ENGINE_TEFF_RANGE) || !inside(logg, ENGINE_LOGG_RANGE) {
            return Err(AppError::out_of_range(format!(
                "Model teff={teff:.1}, logg={logg:.3} outside engine domain."
            )));
        }
        if atmosphere.n_layers() == 0 {
            return Err(AppError::new(4, "Atmosphere has no layers."));
        }
        self.model = Some(ModelInputs {
            teff,
            logg,
            vmic: vmic.max(0.0),
        });
        self.opacity_ready = false;
        Ok(())
    }

    fn input_abund(&mut self, abund: &Abundances, monh: f64) -> Result<(), AppError> {
        self.abund = abund.scaled(monh).into_iter().collect();
        self.opacity_ready = false;
        Ok(())
    }

    fn set_ionization(&mut self, flag: i32) -> Result<(), AppError> {
        self.ionization = flag;
        Ok(())
    }

    fn set_van_der_waals_scale(&mut self, value: f64) -> Result<(), AppError> {
        self.vdw_scale = value;
        self.opacity_ready = false;
        Ok(())
    }

    fn set_h2_broadening(&mut self, flag: bool) -> Result<(), AppError> {
        self.h2_broadening = flag;
        Ok(())
    }

    fn input_nlte(&mut self, nlte: &NlteSpec) -> Result<(), AppError> {
        self.nlte = nlte.clone();
        self.opacity_ready = false;
        Ok(())
    }

    fn input_wave_range(&mut self, begin: f64, end: f64) -> Result<(), AppError> {
        self.range = Some((begin, end));
        Ok(())
    }

    fn compute_opacity(&mut self, keep_line_opacity: bool) -> Result<(), AppError> {
        let Some(model) = self.model else {
            return Err(AppError::new(4, "compute_opacity called before input_model."));
        };
        if self.range.is_none() {
            return Err(AppError::new(4, "compute_opacity called before input_wave_range."));
        }
        if keep_line_opacity && self.opacity_ready {
            return Ok(());
        }
        self.opacity = self
            .lines
            .iter()
            .enumerate()
            .map(|(idx, line)| self.line_opacity(idx, line, model))
            .collect();
        self.opacity_ready = true;
        Ok(())
    }

    fn transfer(&mut self, request: &TransferRequest<'_>) -> Result<TransferOutput, AppError> {
        let (Some(model), Some((begin, end))) = (self.model, self.range) else {
            return Err(AppError::new(4, "transfer called before model and range were set."));
        };
        if !self.opacity_ready {
            return Err(AppError::new(4, "transfer called before compute_opacity."));
        }

        let active: Vec<LineOpacity> = self
            .opacity
            .iter()
            .copied()
            .filter(|l| {
                let reach = LINE_REACH * l.doppler_width;
                l.center + reach > begin && l.center - reach < end
            })
            .collect();

        let wint = match request.reuse_grid {
            Some(grid) if grid.len() >= 2 => grid.to_vec(),
            _ => self.build_grid(begin, end, &active),
        };

        let brightness = (model.teff / 5778.0).powi(4);
        let line_tau: Vec<f64> = wint
            .iter()
            .map(|&w| {
                active
                    .iter()
                    .map(|l| {
                        let x = (w - l.center) / l.doppler_width;
                        if x.abs() > LINE_REACH {
                            0.0
                        } else {
                            l.tau0 * (-x * x).exp()
                        }
                    })
                    .sum()
            })
            .collect();

        let mut flux = Vec::with_capacity(request.mu.len());
        let mut continuum = Vec::with_capacity(request.mu.len());
        for &mu in request.mu {
            let ic = brightness * (1.0 - LIMB_DARKENING + LIMB_DARKENING * mu);
            // Lines weaken towards the limb where the temperature gradient flattens.
            let limb = 0.6 + 0.4 * mu;
            continuum.push(vec![ic; wint.len()]);
            flux.push(line_tau.iter().map(|&t| ic * (-t * limb).exp()).collect());
        }

        Ok(TransferOutput {
            wint,
            flux,
            continuum,
        })
    }

    fn line_effective_ranges(&self) -> Vec<(f64, f64)> {
        self.opacity
            .iter()
            .map(|l| {
                let reach = LINE_REACH * l.doppler_width * (1.0 + l.tau0).sqrt();
                (l.center - reach, l.center + reach)
            })
            .collect()
    }

    fn nlte_flags(&self) -> Vec<bool> {
        (0..self.lines.len())
            .map(|idx| self.nlte.departures.contains_key(&idx))
            .collect()
    }
}

/// Analytic atmosphere grid producing gray `T(τ)` models.
#[derive(Debug, Clone)]
pub struct AnalyticAtmospheres {
    extent: GridExtent,
    n_layers: usize,
}

impl Default for AnalyticAtmospheres {
    fn default() -> Self {
        Self {
            extent: ANALYTIC_GRID_EXTENT,
            n_layers: 40,
        }
    }
}

impl AnalyticAtmospheres {
    pub fn new(extent: GridExtent) -> Self {
        Self {
            extent,
            ..Self::default()
        }
    }

    /// Gray atmosphere for the given parameters, without range checks.
    pub fn gray_model(&self, teff: f64, logg: f64, monh: f64) -> Atmosphere {
        let n = self.n_layers.max(2);
        let depth: Vec<f64> = (0..n)
            .map(|i| -6.0 + 8.0 * i as f64 / (n as f64 - 1.0))
            .collect();
        let temperature: Vec<f64> = depth
            .iter()
            .map(|&lt| teff * (0.75 * (10f64.powf(lt) + 2.0 / 3.0)).powf(0.25))
            .collect();
        let density: Vec<f64> = depth
            .iter()
            .map(|&lt| 10f64.powf(lt + 0.5 * (logg - 4.44) - 7.0))
            .collect();
        let electron_density: Vec<f64> = temperature
            .iter()
            .zip(density.iter())
            .map(|(&t, &rho)| rho * 1e20 * 10f64.powf(monh) * (t / 5778.0).powi(6))
            .collect();
        Atmosphere {
            teff,
            logg,
            monh,
            depth,
            temperature,
            electron_density,
            density,
        }
    }
}

impl AtmosphereGrid for AnalyticAtmospheres {
    fn extent(&self, _source: &str) -> Result<GridExtent, AppError> {
        Ok(self.extent)
    }

    fn interpolate(
        &self,
        teff: f64,
        logg: f64,
        monh: f64,
        _spec: &AtmosphereSpec,
    ) -> Result<Atmosphere, AppError> {
        if !self.extent.contains(teff, logg, monh) {
            return Err(AppError::out_of_range(format!(
                "Atmosphere teff={teff:.1}, logg={logg:.3}, monh={monh:.3} outside grid."
            )));
        }
        Ok(self.gray_model(teff, logg, monh))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iron_line(wl: f64) -> Line {
        Line {
            species: "Fe 1".to_string(),
            wlcent: wl,
            excit: 2.0,
            gflog: -1.0,
            gamrad: 0.0,
            gamqst: 0.0,
            gamvw: 0.0,
            depth: 0.5,
            error: 0.1,
        }
    }

    fn prepared_engine() -> AnalyticEngine {
        let mut engine = AnalyticEngine::new();
        let atmo = AnalyticAtmospheres::default().gray_model(5778.0, 4.44, 0.0);
        engine
            .input_line_list(&LineList::new(vec![iron_line(5000.5)]))
            .unwrap();
        engine.input_model(5778.0, 4.44, 1.0, &atmo).unwrap();
        engine.input_abund(&Abundances::solar(), 0.0).unwrap();
        engine.input_wave_range(5000.0, 5001.0).unwrap();
        engine.compute_opacity(false).unwrap();
        engine
    }

    #[test]
    fn transfer_produces_absorption_at_line_core() {
        let mut engine = prepared_engine();
        let mu = [1.0, 0.5];
        let out = engine
            .transfer(&TransferRequest {
                mu: &mu,
                accuracy_line: 1e-4,
                accuracy_continuum: 3e-3,
                keep_line_opacity: false,
                reuse_grid: None,
            })
            .unwrap();

        assert!(out.wint.windows(2).all(|w| w[1] > w[0]));
        let core = out
            .wint
            .iter()
            .position(|&w| (w - 5000.5).abs() < 1e-9)
            .unwrap();
        assert!(out.flux[0][core] < 0.9 * out.continuum[0][core]);
        assert!((out.flux[0][0] - out.continuum[0][0]).abs() < 1e-6 * out.continuum[0][0]);
        // Limb darkening.
        assert!(out.continuum[1][0] < out.continuum[0][0]);
    }

    #[test]
    fn intrinsic_grid_is_non_uniform() {
        let mut engine = prepared_engine();
        let out = engine
            .transfer(&TransferRequest {
                mu: &[1.0],
                accuracy_line: 1e-4,
                accuracy_continuum: 3e-3,
                keep_line_opacity: false,
                reuse_grid: None,
            })
            .unwrap();
        let steps: Vec<f64> = out.wint.windows(2).map(|w| w[1] - w[0]).collect();
        let min = steps.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = steps.iter().cloned().fold(0.0, f64::max);
        assert!(max > 1.5 * min);
    }

    #[test]
    fn reuse_grid_is_honored() {
        let mut engine = prepared_engine();
        let grid = [5000.0, 5000.25, 5000.5, 5000.75, 5001.0];
        let out = engine
            .transfer(&TransferRequest {
                mu: &[1.0],
                accuracy_line: 1e-4,
                accuracy_continuum: 3e-3,
                keep_line_opacity: true,
                reuse_grid: Some(&grid),
            })
            .unwrap();
        assert_eq!(out.wint, grid.to_vec());
    }

    #[test]
    fn model_outside_domain_is_out_of_range() {
        let mut engine = AnalyticEngine::new();
        let atmo = AnalyticAtmospheres::default().gray_model(12000.0, 4.0, 0.0);
        let err = engine.input_model(12000.0, 4.0, 1.0, &atmo).unwrap_err();
        assert!(err.is_out_of_range());
    }

    #[test]
    fn grid_interpolation_outside_extent_is_out_of_range() {
        let grid = AnalyticAtmospheres::default();
        let spec = AtmosphereSpec::grid("grid.sav");
        assert!(grid.interpolate(5000.0, 4.0, 0.0, &spec).is_ok());
        assert!(grid.interpolate(9000.0, 4.0, 0.0, &spec).unwrap_err().is_out_of_range());
    }

    #[test]
    fn nlte_departures_flag_lines() {
        let mut engine = prepared_engine();
        let mut nlte = NlteSpec::default();
        nlte.departures.insert(0, vec![0.8]);
        engine.input_nlte(&nlte).unwrap();
        assert_eq!(engine.nlte_flags(), vec![true]);
    }
}
