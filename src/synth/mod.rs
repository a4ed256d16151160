//! Spectral synthesis pipeline.
//!
//! Leaves first:
//!
//! - `range`: padded synthesis range of a segment
//! - `grid`: uniform-in-velocity output grid
//! - `flux`: disk integration, rotation/macroturbulence and instrumental profile
//! - `cache`: last-value atmosphere cache
//! - `segment`: one segment through the engine
//! - `orchestrator`: all segments, RV/continuum, resampling

pub mod cache;
pub mod flux;
pub mod grid;
pub mod orchestrator;
pub mod range;
pub mod segment;

pub use cache::*;
pub use flux::*;
pub use grid::*;
pub use orchestrator::*;
pub use range::*;
pub use segment::*;

/// Speed of light (km/s).
pub const CLIGHT: f64 = 299_792.458;

/// Relativistic Doppler factor for a radial velocity `v` (km/s).
pub fn doppler_factor(v: f64) -> f64 {
    ((1.0 + v / CLIGHT) / (1.0 - v / CLIGHT)).sqrt()
}
