//! Radiative transfer engine boundary.
//!
//! The opacity/transfer engine and the atmosphere grid are external
//! collaborators. This module fixes the call contract the synthesizer relies
//! on ([`RadiativeTransfer`], [`AtmosphereGrid`]), wraps the engine in an
//! exclusively owned [`EngineSession`], and ships a deterministic analytic
//! implementation of both contracts ([`AnalyticEngine`], [`AnalyticAtmospheres`]).
//!
//! Engines keep process-wide mutable state (active line list, atmosphere,
//! opacity tables). Calls are therefore strictly sequential and go through
//! `&mut self`.

use std::path::Path;

use crate::domain::{Abundances, Atmosphere, AtmosphereSpec, GridExtent, LineList, NlteSpec};
use crate::error::AppError;

pub mod analytic;
pub mod session;

pub use analytic::*;
pub use session::*;

/// Inputs of one radiative transfer call.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    /// Disk positions μ.
    pub mu: &'a [f64],
    /// Line/continuum opacity accuracy threshold.
    pub accuracy_line: f64,
    /// Continuum interpolation accuracy.
    pub accuracy_continuum: f64,
    /// Reuse line opacities from the previous segment of the batch.
    pub keep_line_opacity: bool,
    /// Solve on this grid instead of the engine's adaptive one.
    pub reuse_grid: Option<&'a [f64]>,
}

/// Result of one radiative transfer call.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutput {
    /// Intrinsic (non-uniform) wavelength grid.
    pub wint: Vec<f64>,
    /// Specific intensity per μ, each on `wint`.
    pub flux: Vec<Vec<f64>>,
    /// Continuum specific intensity per μ, each on `wint`.
    pub continuum: Vec<Vec<f64>>,
}

/// Call contract of the opacity / radiative transfer engine.
pub trait RadiativeTransfer {
    /// Configure the search path for supporting data.
    fn set_path(&mut self, path: &Path) -> Result<(), AppError>;
    /// Replace the active atomic line data.
    fn input_line_list(&mut self, linelist: &LineList) -> Result<(), AppError>;
    /// Replace the active atmosphere.
    ///
    /// Fails with [`AppError::out_of_range`] when the parameters are outside
    /// the engine's valid domain.
    fn input_model(
        &mut self,
        teff: f64,
        logg: f64,
        vmic: f64,
        atmosphere: &Atmosphere,
    ) -> Result<(), AppError>;
    /// Replace the abundance pattern (metallicity already applied).
    fn input_abund(&mut self, abund: &Abundances, monh: f64) -> Result<(), AppError>;
    fn set_ionization(&mut self, flag: i32) -> Result<(), AppError>;
    fn set_van_der_waals_scale(&mut self, value: f64) -> Result<(), AppError>;
    fn set_h2_broadening(&mut self, flag: bool) -> Result<(), AppError>;
    /// Replace NLTE departure coefficients.
    fn input_nlte(&mut self, nlte: &NlteSpec) -> Result<(), AppError>;
    /// Set the active segment range.
    fn input_wave_range(&mut self, begin: f64, end: f64) -> Result<(), AppError>;
    /// Recompute continuum (and, unless kept, line) opacities.
    fn compute_opacity(&mut self, keep_line_opacity: bool) -> Result<(), AppError>;
    /// Integrate the transfer equation for the active segment.
    fn transfer(&mut self, request: &TransferRequest<'_>) -> Result<TransferOutput, AppError>;
    /// Effective wavelength range of each line of the active list.
    fn line_effective_ranges(&self) -> Vec<(f64, f64)>;
    /// Per-line flags: NLTE correction applied.
    fn nlte_flags(&self) -> Vec<bool>;
}

/// Contract of an atmosphere grid.
pub trait AtmosphereGrid {
    /// Parameter extents covered by the grid named `source`.
    fn extent(&self, source: &str) -> Result<GridExtent, AppError>;
    /// Interpolate a model at (teff, logg, monh).
    ///
    /// Fails with [`AppError::out_of_range`] outside the grid.
    fn interpolate(
        &self,
        teff: f64,
        logg: f64,
        monh: f64,
        spec: &AtmosphereSpec,
    ) -> Result<Atmosphere, AppError>;
}
