//! Demo data.
//!
//! - synthetic noisy observations with a known answer (`sample`)

pub mod sample;

pub use sample::*;
