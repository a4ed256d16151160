//! Model atmosphere description.
//!
//! The state carries an [`AtmosphereSpec`] saying *where* the atmosphere comes
//! from (a grid keyed by teff/logg/monh, or an atmosphere embedded in the state)
//! and, once resolved, the concrete [`Atmosphere`] layers passed to the engine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// How the atmosphere is obtained for a synthesis call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AtmoMethod {
    /// Interpolate in a grid of models at the current (teff, logg, monh).
    Grid,
    /// Use the atmosphere stored in the state as is.
    Embedded,
}

impl std::str::FromStr for AtmoMethod {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "grid" => Ok(AtmoMethod::Grid),
            "embedded" => Ok(AtmoMethod::Embedded),
            other => Err(AppError::new(
                2,
                format!("Unsupported atmosphere method '{other}' (expected 'grid' or 'embedded')."),
            )),
        }
    }
}

/// Depth-dependent structure of a model atmosphere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atmosphere {
    pub teff: f64,
    pub logg: f64,
    pub monh: f64,
    /// Depth scale (log τ at 5000 Å).
    pub depth: Vec<f64>,
    /// Temperature per layer (K).
    pub temperature: Vec<f64>,
    /// Electron number density per layer (cm⁻³).
    pub electron_density: Vec<f64>,
    /// Mass density per layer (g cm⁻³).
    pub density: Vec<f64>,
}

impl Atmosphere {
    pub fn n_layers(&self) -> usize {
        self.depth.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtmosphereSpec {
    pub method: AtmoMethod,
    /// Grid or model file identifier. Its extension selects the bounds source.
    pub source: String,
    /// The resolved (or embedded) atmosphere.
    #[serde(default)]
    pub model: Option<Atmosphere>,
}

impl AtmosphereSpec {
    pub fn grid(source: impl Into<String>) -> Self {
        Self {
            method: AtmoMethod::Grid,
            source: source.into(),
            model: None,
        }
    }

    pub fn embedded(source: impl Into<String>, model: Atmosphere) -> Self {
        Self {
            method: AtmoMethod::Embedded,
            source: source.into(),
            model: Some(model),
        }
    }

    /// Format of the source file, inferred from its extension.
    pub fn source_format(&self) -> Result<SourceFormat, AppError> {
        let ext = Path::new(&self.source)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "sav" => Ok(SourceFormat::Grid),
            "krz" => Ok(SourceFormat::SingleModel),
            _ => Err(AppError::new(
                2,
                format!(
                    "Atmosphere source '{}' has unrecognized extension '.{ext}' (expected .sav or .krz).",
                    self.source
                ),
            )),
        }
    }
}

/// Kind of atmosphere source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// A grid of models spanning ranges of teff/logg/monh.
    Grid,
    /// One fixed model.
    SingleModel,
}

/// Parameter extents covered by an atmosphere grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridExtent {
    pub teff: (f64, f64),
    pub logg: (f64, f64),
    pub monh: (f64, f64),
}

impl GridExtent {
    pub fn contains(&self, teff: f64, logg: f64, monh: f64) -> bool {
        let inside = |v: f64, (lo, hi): (f64, f64)| v >= lo && v <= hi;
        inside(teff, self.teff) && inside(logg, self.logg) && inside(monh, self.monh)
    }
}
