//! Synthesis of one wavelength segment.
//!
//! Order of operations: plan the padded range, hand it to the engine, compute
//! opacities, run the transfer, derive the uniform grid, then integrate and
//! broaden on that grid.

use crate::domain::{CscaleFlag, ModelState};
use crate::engine::{EngineSession, RadiativeTransfer, TransferRequest};
use crate::error::AppError;
use crate::math::interp;
use crate::synth::{apply_instrumental, build_uniform_grid, integrate_flux, synthesis_range};

/// Output of one segment before RV/continuum reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentSynthesis {
    /// Intrinsic grid used by the engine.
    pub wint: Vec<f64>,
    /// Uniform-in-velocity grid of `flux`.
    pub wgrid: Vec<f64>,
    /// Velocity step of `wgrid` (km/s).
    pub vstep: f64,
    /// Broadened flux, normalized by the continuum unless the continuum is fixed.
    pub flux: Vec<f64>,
    /// Disk-integrated continuum on `wgrid`.
    pub continuum: Vec<f64>,
}

/// Synthesize segment `seg` of `state`.
///
/// `keep_line_opacity` must be false for the first segment of a batch.
/// `reuse_grid` replaces the engine's adaptive grid (Jacobian evaluations).
pub fn synthesize_segment<E: RadiativeTransfer>(
    session: &mut EngineSession<E>,
    state: &ModelState,
    seg: usize,
    keep_line_opacity: bool,
    reuse_grid: Option<&[f64]>,
) -> Result<SegmentSynthesis, AppError> {
    let vrad = state.vrad.get(seg).copied().unwrap_or(0.0);
    let (wbeg, wend) = synthesis_range(state.wran[seg], vrad, state.vsini);
    log::debug!("Segment {seg}: synthesis range [{wbeg:.4}, {wend:.4}]");

    session.input_wave_range(wbeg, wend)?;
    session.compute_opacity(keep_line_opacity)?;
    let out = session.transfer(&TransferRequest {
        mu: &state.mu,
        accuracy_line: state.accrt,
        accuracy_continuum: state.accwi,
        keep_line_opacity,
        reuse_grid,
    })?;

    let grid = build_uniform_grid(&out.wint)?;

    let cont_intrinsic = integrate_flux(&state.mu, &out.continuum, 1.0, 0.0, 0.0)?;
    let continuum = interp(&grid.wave, &out.wint, &cont_intrinsic);

    let intensities: Vec<Vec<f64>> = out
        .flux
        .iter()
        .map(|row| interp(&grid.wave, &out.wint, row))
        .collect();
    let mut flux = integrate_flux(&state.mu, &intensities, grid.vstep, state.vsini, state.vmac)?;

    if let Some(profile) = state.iptype {
        flux = apply_instrumental(&flux, grid.vstep, state.resolution_for(seg), profile);
    }

    if state.cscale_flag != CscaleFlag::Fix {
        for (f, c) in flux.iter_mut().zip(continuum.iter()) {
            *f /= c;
        }
    }

    Ok(SegmentSynthesis {
        wint: out.wint,
        wgrid: grid.wave,
        vstep: grid.vstep,
        flux,
        continuum,
    })
}
