//! Synthetic observation generation for demos and end-to-end checks.
//!
//! A demo observation is produced by synthesizing a "true" star with the
//! configured engine, shifting it by a known radial velocity, and adding
//! Gaussian noise at a fixed signal-to-noise ratio. The returned state carries
//! the observation only; its stellar parameters are reset to solar values so
//! that a fit has something to recover.

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{
    relative_error_from_flag, AtmosphereSpec, CscaleFlag, InstrumentProfile, Line, LineList, ModelState,
    VradFlag, MASK_CONT, MASK_LINE,
};
use crate::engine::{AtmosphereGrid, RadiativeTransfer};
use crate::error::AppError;
use crate::synth::{SynthOptions, Synthesizer};

/// Species drawn for random lines.
const SPECIES: [&str; 7] = ["Fe 1", "Fe 1", "Fe 2", "Ca 1", "Ti 1", "Ni 1", "Cr 1"];
/// Reference quality flags drawn for random lines.
const QUALITY_FLAGS: [&str; 7] = ["NA", "NB+", "NC", "ND", "E-1", "C0.2", "P"];
/// Synthetic flux below this level counts as a line point in the demo mask.
const LINE_MASK_LEVEL: f64 = 0.99;

#[derive(Debug, Clone)]
pub struct DemoConfig {
    pub seed: u64,
    pub segments: Vec<[f64; 2]>,
    pub lines_per_segment: usize,
    pub teff: f64,
    pub logg: f64,
    pub monh: f64,
    pub vmic: f64,
    pub vsini: f64,
    /// Injected radial velocity (km/s).
    pub vrad: f64,
    pub resolution: f64,
    pub snr: f64,
    /// Name of the atmosphere grid the demo state points at.
    pub atmosphere: String,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            segments: vec![[5000.0, 5010.0], [6000.0, 6010.0]],
            lines_per_segment: 6,
            teff: 5600.0,
            logg: 4.2,
            monh: -0.2,
            vmic: 1.2,
            vsini: 3.0,
            vrad: 12.0,
            resolution: 60000.0,
            snr: 200.0,
            atmosphere: "analytic.sav".to_string(),
        }
    }
}

/// A demo observation plus the parameters it was generated with.
#[derive(Debug, Clone)]
pub struct DemoSample {
    pub observation: ModelState,
    pub truth: ModelState,
}

fn validate(config: &DemoConfig) -> Result<(), AppError> {
    if config.segments.is_empty() {
        return Err(AppError::new(2, "Demo needs at least one wavelength segment."));
    }
    if config.lines_per_segment == 0 {
        return Err(AppError::new(2, "Demo needs at least one line per segment."));
    }
    if !(config.snr.is_finite() && config.snr > 0.0) {
        return Err(AppError::new(2, format!("Signal-to-noise must be > 0, got {}.", config.snr)));
    }
    if !(config.resolution.is_finite() && config.resolution >= 0.0) {
        return Err(AppError::new(2, format!("Invalid resolving power {}.", config.resolution)));
    }
    Ok(())
}

/// Random line list: `lines_per_segment` lines inside each segment, sorted by
/// wavelength.
pub fn random_linelist(rng: &mut StdRng, config: &DemoConfig) -> LineList {
    let mut lines = Vec::with_capacity(config.segments.len() * config.lines_per_segment);
    for [lo, hi] in &config.segments {
        // Keep lines away from the edges so they stay inside after the shift.
        let margin = 0.1 * (hi - lo);
        for _ in 0..config.lines_per_segment {
            let species = SPECIES[rng.gen_range(0..SPECIES.len())];
            let flag = QUALITY_FLAGS[rng.gen_range(0..QUALITY_FLAGS.len())];
            lines.push(Line {
                species: species.to_string(),
                wlcent: rng.gen_range((lo + margin)..(hi - margin)),
                excit: rng.gen_range(0.5..4.5),
                gflog: rng.gen_range(-2.5..-0.3),
                gamrad: 8.0,
                gamqst: -6.0,
                gamvw: -7.5,
                depth: rng.gen_range(0.1..0.8),
                error: relative_error_from_flag(flag),
            });
        }
    }
    lines.sort_by(|a, b| a.wlcent.total_cmp(&b.wlcent));
    LineList::new(lines)
}

/// Generate a noisy observation with `synth`.
pub fn generate_demo<E, A>(synth: &mut Synthesizer<E, A>, config: &DemoConfig) -> Result<DemoSample, AppError>
where
    E: RadiativeTransfer,
    A: AtmosphereGrid,
{
    validate(config)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let normal = Normal::new(0.0, 1.0).map_err(|e| AppError::new(4, format!("Noise distribution error: {e}")))?;

    let linelist = random_linelist(&mut rng, config);
    let atmo = AtmosphereSpec::grid(config.atmosphere.clone());
    let n = config.segments.len();

    let mut truth = ModelState::new(config.segments.clone(), linelist.clone(), atmo.clone());
    truth.teff = config.teff;
    truth.logg = config.logg;
    truth.monh = config.monh;
    truth.vmic = config.vmic;
    truth.vsini = config.vsini;
    truth.iptype = Some(InstrumentProfile::Gauss);
    truth.ipres = vec![config.resolution];
    truth.vrad_flag = VradFlag::Fix;
    truth.vrad = vec![config.vrad; n];
    synth.synthesize_spectrum(&mut truth, None, SynthOptions::default())?;

    let mut spec = Vec::with_capacity(n);
    let mut uncs = Vec::with_capacity(n);
    let mut mask = Vec::with_capacity(n);
    for flux in &truth.synth {
        let sigma: Vec<f64> = flux.iter().map(|f| f.abs().max(1e-3) / config.snr).collect();
        spec.push(
            flux.iter()
                .zip(sigma.iter())
                .map(|(f, s)| f + s * normal.sample(&mut rng))
                .collect::<Vec<f64>>(),
        );
        mask.push(
            flux.iter()
                .map(|f| if *f < LINE_MASK_LEVEL { MASK_LINE } else { MASK_CONT })
                .collect::<Vec<u8>>(),
        );
        uncs.push(sigma);
    }

    let mut observation = ModelState::new(config.segments.clone(), linelist, atmo);
    observation.iptype = Some(InstrumentProfile::Gauss);
    observation.ipres = vec![config.resolution];
    observation.vsini = config.vsini;
    observation.vrad_flag = VradFlag::Whole;
    observation.cscale_flag = CscaleFlag::Constant;
    observation.wave = truth.wave.clone();
    observation.spec = spec;
    observation.uncs = Some(uncs);
    observation.mask = mask;

    log::info!(
        "Generated demo observation: {} segments, {} lines, vrad={:.2} km/s, S/N={:.0}",
        n,
        observation.linelist.len(),
        config.vrad,
        config.snr
    );
    Ok(DemoSample { observation, truth })
}
