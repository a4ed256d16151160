//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the model state carried through synthesis and fitting (`ModelState`)
//! - the fit parameter registry (`ParamName`, name normalization)
//! - elements, line lists and atmosphere descriptions

pub mod atmosphere;
pub mod elements;
pub mod linelist;
pub mod params;
pub mod types;

pub use atmosphere::*;
pub use elements::*;
pub use linelist::*;
pub use params::*;
pub use types::*;
