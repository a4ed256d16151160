//! Shared domain types.
//!
//! The central type is [`ModelState`]: every stellar, atmospheric and
//! instrumental parameter together with the per-segment observation and the
//! synthesis outputs. It is owned by the caller and mutated in place by the
//! synthesizer and the fit driver, and it is serializable so that it can be
//! snapshotted between iterations.
//!
//! Per-segment arrays (`wave`, `spec`, `uncs`, `mask`, `synth`, `wint`) are
//! ragged: one `Vec` per segment, each with its own length.

use std::collections::BTreeMap;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::domain::atmosphere::AtmosphereSpec;
use crate::domain::elements::{Element, SYMBOLS};
use crate::domain::linelist::LineList;
use crate::domain::params::ParamName;
use crate::error::AppError;

/// Mask value: point excluded from the comparison.
pub const MASK_BAD: u8 = 0;
/// Mask value: point inside a line.
pub const MASK_LINE: u8 = 1;
/// Mask value: continuum point.
pub const MASK_CONT: u8 = 2;

/// Default disk positions (μ = cos θ) used for the angular integration.
pub const DEFAULT_MU: [f64; 7] = [1.0, 0.9, 0.7, 0.5, 0.3, 0.2, 0.1];

/// Radial velocity determination mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum VradFlag {
    /// No radial velocity: the synthetic spectrum is not shifted.
    None,
    /// One radial velocity per segment.
    Each,
    /// One radial velocity shared by all segments.
    Whole,
    /// Keep the radial velocities stored in the state.
    Fix,
}

/// Continuum correction mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CscaleFlag {
    /// No correction (coefficients `[1]`).
    None,
    /// Keep the stored coefficients; the synthetic flux is not normalized.
    Fix,
    Constant,
    Linear,
    Quadratic,
}

impl CscaleFlag {
    /// Polynomial degree fitted in this mode, if any.
    pub fn fit_degree(self) -> Option<usize> {
        match self {
            CscaleFlag::Constant => Some(0),
            CscaleFlag::Linear => Some(1),
            CscaleFlag::Quadratic => Some(2),
            CscaleFlag::None | CscaleFlag::Fix => None,
        }
    }
}

/// Instrumental profile shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentProfile {
    Gauss,
    Sinc,
}

/// Elemental abundance pattern (`log ε`, H = 12).
///
/// Elements not present in the map take their solar value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Abundances {
    pub pattern: BTreeMap<Element, f64>,
}

impl Abundances {
    pub fn solar() -> Self {
        Self::default()
    }

    /// Explicitly set value, without solar fallback.
    pub fn explicit(&self, el: Element) -> Option<f64> {
        self.pattern.get(&el).copied()
    }

    /// Value with solar fallback.
    pub fn get(&self, el: Element) -> Option<f64> {
        self.explicit(el).or_else(|| el.solar())
    }

    pub fn set(&mut self, el: Element, value: f64) {
        self.pattern.insert(el, value);
    }

    /// Full pattern for the engine with metallicity applied to the metals.
    ///
    /// Elements without any value are omitted.
    pub fn scaled(&self, monh: f64) -> Vec<(Element, f64)> {
        (1..=SYMBOLS.len() as u8)
            .filter_map(Element::from_atomic_number)
            .filter_map(|el| {
                let base = self.get(el)?;
                let value = if el.is_metal() { base + monh } else { base };
                Some((el, value))
            })
            .collect()
    }
}

/// NLTE departure coefficients per line (index into the line list).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NlteSpec {
    /// Elements treated in NLTE.
    pub elements: Vec<Element>,
    /// Departure coefficients keyed by line index.
    pub departures: BTreeMap<usize, Vec<f64>>,
}

/// Diagnostics of the last completed fit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitResults {
    /// Canonical names of the fitted parameters.
    pub parameters: Vec<String>,
    /// Best-fit values (same order as `parameters`).
    pub values: Vec<f64>,
    /// Covariance matrix, pseudo-inverse of JᵀJ.
    pub covar: Vec<Vec<f64>>,
    /// Gradient of the cost at the solution.
    pub grad: Vec<f64>,
    /// Jacobian at the solution (one row per residual).
    pub pder: Vec<Vec<f64>>,
    /// Residual vector at the solution.
    pub resid: Vec<f64>,
    /// Solver cost ½Σρ(f²) at the solution.
    #[serde(default)]
    pub cost: f64,
    /// Reduced chi-square.
    pub chisq: f64,
    /// Uncertainties from the covariance diagonal.
    pub punc: Vec<f64>,
    /// Uncertainties from the median residual / median sensitivity metric.
    pub punc2: Vec<f64>,
    /// Residual evaluations spent.
    pub nfev: usize,
    /// Solver termination message.
    pub message: String,
}

/// Full model state: stellar parameters, inputs, observation and outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub teff: f64,
    pub logg: f64,
    pub monh: f64,
    pub vmic: f64,
    pub vmac: f64,
    pub vsini: f64,

    pub abund: Abundances,
    pub linelist: LineList,
    pub atmo: AtmosphereSpec,
    #[serde(default)]
    pub nlte: NlteSpec,

    /// Disk positions μ for the angular integration.
    pub mu: Vec<f64>,
    /// Line/continuum opacity accuracy threshold.
    pub accrt: f64,
    /// Wavelength interpolation accuracy.
    pub accwi: f64,
    /// Van der Waals broadening scale.
    pub gam6: f64,
    pub h2broad: bool,
    pub ionization: i32,

    pub iptype: Option<InstrumentProfile>,
    /// Resolving power: one value for all segments, or one per segment.
    pub ipres: Vec<f64>,

    pub vrad_flag: VradFlag,
    pub cscale_flag: CscaleFlag,

    /// Nominal wavelength range of each segment.
    pub wran: Vec<[f64; 2]>,

    #[serde(default)]
    pub wave: Vec<Vec<f64>>,
    #[serde(default)]
    pub spec: Vec<Vec<f64>>,
    #[serde(default)]
    pub uncs: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    pub mask: Vec<Vec<u8>>,

    #[serde(default)]
    pub synth: Vec<Vec<f64>>,
    /// Adaptive intrinsic grid of the last synthesis, per segment.
    #[serde(default)]
    pub wint: Vec<Vec<f64>>,
    #[serde(default)]
    pub vrad: Vec<f64>,
    /// Continuum polynomial per segment, highest power first.
    #[serde(default)]
    pub cscale: Vec<Vec<f64>>,
    /// Per-line flags reported by the engine: NLTE correction applied.
    #[serde(default)]
    pub nlte_flags: Vec<bool>,
    /// Per-point systematic error from line data quality (diagnostic only).
    #[serde(default)]
    pub systematics: Vec<Vec<f64>>,

    #[serde(default)]
    pub fitparameters: Vec<String>,
    #[serde(default)]
    pub fitresults: Option<FitResults>,
}

impl ModelState {
    /// A solar-like state for the given segment ranges, without observation.
    pub fn new(wran: Vec<[f64; 2]>, linelist: LineList, atmo: AtmosphereSpec) -> Self {
        let n = wran.len();
        Self {
            teff: 5778.0,
            logg: 4.4,
            monh: 0.0,
            vmic: 1.0,
            vmac: 1.0,
            vsini: 0.0,
            abund: Abundances::solar(),
            linelist,
            atmo,
            nlte: NlteSpec::default(),
            mu: DEFAULT_MU.to_vec(),
            accrt: 1e-4,
            accwi: 3e-3,
            gam6: 1.0,
            h2broad: true,
            ionization: 0,
            iptype: Some(InstrumentProfile::Gauss),
            ipres: vec![0.0],
            vrad_flag: VradFlag::None,
            cscale_flag: CscaleFlag::None,
            wran,
            wave: Vec::new(),
            spec: Vec::new(),
            uncs: None,
            mask: Vec::new(),
            synth: Vec::new(),
            wint: Vec::new(),
            vrad: vec![0.0; n],
            cscale: vec![vec![1.0]; n],
            nlte_flags: Vec::new(),
            systematics: Vec::new(),
            fitparameters: Vec::new(),
            fitresults: None,
        }
    }

    pub fn n_segments(&self) -> usize {
        self.wran.len()
    }

    /// True once an output wavelength array exists for every segment.
    pub fn has_wave(&self) -> bool {
        self.wave.len() == self.n_segments() && self.wave.iter().all(|w| !w.is_empty())
    }

    /// True when observed flux is present.
    pub fn has_spec(&self) -> bool {
        !self.spec.is_empty() && self.spec.iter().any(|s| !s.is_empty())
    }

    /// Resolving power for one segment.
    pub fn resolution_for(&self, segment: usize) -> f64 {
        match self.ipres.len() {
            0 => 0.0,
            1 => self.ipres[0],
            _ => self.ipres.get(segment).copied().unwrap_or(0.0),
        }
    }

    /// Good-point selector for one segment (all points when no mask is stored).
    pub fn mask_good(&self, segment: usize) -> Vec<bool> {
        let n = self.wave.get(segment).map_or(0, Vec::len);
        match self.mask.get(segment) {
            Some(m) if !m.is_empty() => m.iter().map(|&v| v != MASK_BAD).collect(),
            _ => vec![true; n],
        }
    }

    /// Resolve a segment subset; `None` means all segments.
    pub fn segment_indices(&self, segments: Option<&[usize]>) -> Result<Vec<usize>, AppError> {
        match segments {
            None => Ok((0..self.n_segments()).collect()),
            Some(list) => {
                if let Some(bad) = list.iter().find(|&&s| s >= self.n_segments()) {
                    return Err(AppError::new(
                        2,
                        format!("Segment {bad} out of range (n_segments={}).", self.n_segments()),
                    ));
                }
                Ok(list.to_vec())
            }
        }
    }

    /// Check that the per-segment arrays agree with each other.
    pub fn validate_layout(&self) -> Result<(), AppError> {
        let n = self.n_segments();
        if n == 0 {
            return Err(AppError::new(2, "Model state has no wavelength segments."));
        }
        for (i, [lo, hi]) in self.wran.iter().enumerate() {
            if !(lo.is_finite() && hi.is_finite() && *lo > 0.0 && hi > lo) {
                return Err(AppError::new(
                    2,
                    format!("Invalid wavelength range for segment {i}: [{lo}, {hi}]."),
                ));
            }
        }
        if self.wave.is_empty() {
            return Ok(());
        }
        if self.wave.len() != n {
            return Err(AppError::new(
                2,
                format!("wave has {} segments, expected {n}.", self.wave.len()),
            ));
        }
        let check = |label: &str, lens: Vec<usize>| -> Result<(), AppError> {
            if lens.len() != n {
                return Err(AppError::new(
                    2,
                    format!("{label} has {} segments, expected {n}.", lens.len()),
                ));
            }
            for (i, len) in lens.iter().enumerate() {
                let expected = self.wave[i].len();
                if *len != expected {
                    return Err(AppError::new(
                        2,
                        format!("{label}[{i}] has {len} points, wave[{i}] has {expected}."),
                    ));
                }
            }
            Ok(())
        };
        if !self.spec.is_empty() {
            check("spec", self.spec.iter().map(Vec::len).collect())?;
        }
        if let Some(uncs) = &self.uncs {
            check("uncs", uncs.iter().map(Vec::len).collect())?;
        }
        if !self.mask.is_empty() {
            check("mask", self.mask.iter().map(Vec::len).collect())?;
        }
        Ok(())
    }

    /// Make sure the per-segment output containers have one entry per segment.
    pub fn ensure_segment_outputs(&mut self) {
        let n = self.n_segments();
        self.vrad.resize(n, 0.0);
        self.cscale.resize(n, vec![1.0]);
        self.wave.resize(n, Vec::new());
        self.synth.resize(n, Vec::new());
        self.wint.resize(n, Vec::new());
    }

    /// Current value of a fit parameter; `None` when unset.
    ///
    /// Scalars are unset when not finite; abundances when absent from the pattern.
    pub fn param(&self, name: ParamName) -> Option<f64> {
        let value = match name {
            ParamName::Teff => self.teff,
            ParamName::Logg => self.logg,
            ParamName::Monh => self.monh,
            ParamName::Vmic => self.vmic,
            ParamName::Vmac => self.vmac,
            ParamName::Vsini => self.vsini,
            ParamName::Abund(el) => return self.abund.explicit(el),
        };
        value.is_finite().then_some(value)
    }

    pub fn set_param(&mut self, name: ParamName, value: f64) {
        match name {
            ParamName::Teff => self.teff = value,
            ParamName::Logg => self.logg = value,
            ParamName::Monh => self.monh = value,
            ParamName::Vmic => self.vmic = value,
            ParamName::Vmac => self.vmac = value,
            ParamName::Vsini => self.vsini = value,
            ParamName::Abund(el) => self.abund.set(el, value),
        }
    }
}
