//! Last-value cache for interpolated atmospheres.

use crate::domain::{AtmoMethod, Atmosphere, AtmosphereSpec};
use crate::engine::AtmosphereGrid;
use crate::error::AppError;

#[derive(Debug, Clone, PartialEq)]
struct CacheKey {
    teff: f64,
    logg: f64,
    monh: f64,
    source: String,
}

/// Remembers the last grid interpolation, keyed by (teff, logg, monh, source).
#[derive(Debug, Clone, Default)]
pub struct AtmosphereCache {
    entry: Option<(CacheKey, Atmosphere)>,
    hits: usize,
    misses: usize,
}

impl AtmosphereCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }

    /// Resolve the atmosphere for a synthesis call.
    ///
    /// Embedded atmospheres are returned as stored; grid atmospheres are
    /// interpolated unless the key matches the previous call.
    pub fn resolve<A: AtmosphereGrid>(
        &mut self,
        grid: &A,
        teff: f64,
        logg: f64,
        monh: f64,
        spec: &AtmosphereSpec,
    ) -> Result<Atmosphere, AppError> {
        match spec.method {
            AtmoMethod::Embedded => spec.model.clone().ok_or_else(|| {
                AppError::new(2, format!("Embedded atmosphere '{}' has no model.", spec.source))
            }),
            AtmoMethod::Grid => {
                let key = CacheKey {
                    teff,
                    logg,
                    monh,
                    source: spec.source.clone(),
                };
                if let Some((cached_key, atmo)) = &self.entry {
                    if *cached_key == key {
                        self.hits += 1;
                        return Ok(atmo.clone());
                    }
                }
                self.misses += 1;
                let atmo = grid.interpolate(teff, logg, monh, spec)?;
                self.entry = Some((key, atmo.clone()));
                Ok(atmo)
            }
        }
    }
}
