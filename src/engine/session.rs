//! Exclusive session on a radiative transfer engine.
//!
//! The session is the only path into the engine. It owns the engine value,
//! remembers whether the support path has been configured, and counts the
//! calls that matter for diagnostics. Because it hands out no shared
//! references, there is always at most one writer to the engine state.

use std::path::{Path, PathBuf};

use crate::domain::{Abundances, Atmosphere, LineList, NlteSpec};
use crate::engine::{RadiativeTransfer, TransferOutput, TransferRequest};
use crate::error::AppError;

/// Counters of engine work, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub line_list_uploads: usize,
    pub model_uploads: usize,
    pub full_opacity_runs: usize,
    pub kept_opacity_runs: usize,
    pub transfers: usize,
}

pub struct EngineSession<E: RadiativeTransfer> {
    engine: E,
    data_dir: Option<PathBuf>,
    path_configured: bool,
    stats: SessionStats,
}

impl<E: RadiativeTransfer> EngineSession<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            data_dir: None,
            path_configured: false,
            stats: SessionStats::default(),
        }
    }

    /// Use `dir` as the engine support path (applied once, on first use).
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    fn ensure_path(&mut self) -> Result<(), AppError> {
        if self.path_configured {
            return Ok(());
        }
        if let Some(dir) = self.data_dir.clone() {
            self.engine.set_path(&dir)?;
        }
        self.path_configured = true;
        Ok(())
    }

    pub fn set_path(&mut self, path: &Path) -> Result<(), AppError> {
        self.engine.set_path(path)?;
        self.path_configured = true;
        Ok(())
    }

    pub fn input_line_list(&mut self, linelist: &LineList) -> Result<(), AppError> {
        self.ensure_path()?;
        self.stats.line_list_uploads += 1;
        self.engine.input_line_list(linelist)
    }

    pub fn input_model(
        &mut self,
        teff: f64,
        logg: f64,
        vmic: f64,
        atmosphere: &Atmosphere,
    ) -> Result<(), AppError> {
        self.ensure_path()?;
        self.stats.model_uploads += 1;
        self.engine.input_model(teff, logg, vmic, atmosphere)
    }

    pub fn input_abund(&mut self, abund: &Abundances, monh: f64) -> Result<(), AppError> {
        self.engine.input_abund(abund, monh)
    }

    pub fn set_ionization(&mut self, flag: i32) -> Result<(), AppError> {
        self.engine.set_ionization(flag)
    }

    pub fn set_van_der_waals_scale(&mut self, value: f64) -> Result<(), AppError> {
        self.engine.set_van_der_waals_scale(value)
    }

    pub fn set_h2_broadening(&mut self, flag: bool) -> Result<(), AppError> {
        self.engine.set_h2_broadening(flag)
    }

    pub fn input_nlte(&mut self, nlte: &NlteSpec) -> Result<(), AppError> {
        self.engine.input_nlte(nlte)
    }

    pub fn input_wave_range(&mut self, begin: f64, end: f64) -> Result<(), AppError> {
        if !(begin.is_finite() && end.is_finite() && begin > 0.0 && end > begin) {
            return Err(AppError::new(
                4,
                format!("Invalid synthesis range [{begin}, {end}]."),
            ));
        }
        self.engine.input_wave_range(begin, end)
    }

    pub fn compute_opacity(&mut self, keep_line_opacity: bool) -> Result<(), AppError> {
        if keep_line_opacity {
            self.stats.kept_opacity_runs += 1;
        } else {
            self.stats.full_opacity_runs += 1;
        }
        self.engine.compute_opacity(keep_line_opacity)
    }

    pub fn transfer(&mut self, request: &TransferRequest<'_>) -> Result<TransferOutput, AppError> {
        self.stats.transfers += 1;
        let out = self.engine.transfer(request)?;
        validate_transfer(&out, request.mu.len())?;
        Ok(out)
    }

    pub fn line_effective_ranges(&self) -> Vec<(f64, f64)> {
        self.engine.line_effective_ranges()
    }

    pub fn nlte_flags(&self) -> Vec<bool> {
        self.engine.nlte_flags()
    }
}

fn validate_transfer(out: &TransferOutput, n_mu: usize) -> Result<(), AppError> {
    let n = out.wint.len();
    if n < 2 {
        return Err(AppError::new(
            4,
            format!("Engine returned an intrinsic grid with {n} points."),
        ));
    }
    if out.wint.windows(2).any(|w| !(w[1] > w[0])) {
        return Err(AppError::new(4, "Engine returned a non-increasing intrinsic grid."));
    }
    if out.flux.len() != n_mu || out.continuum.len() != n_mu {
        return Err(AppError::new(
            4,
            format!(
                "Engine returned {} flux / {} continuum angles, expected {n_mu}.",
                out.flux.len(),
                out.continuum.len()
            ),
        ));
    }
    if out.flux.iter().chain(out.continuum.iter()).any(|row| row.len() != n) {
        return Err(AppError::new(4, "Engine intensity rows do not match the intrinsic grid."));
    }
    Ok(())
}
