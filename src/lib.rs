//! `specfit` library crate.
//!
//! The binary (`specfit`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the synthesis and fit loop can be driven with any engine implementation
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod plot;
pub mod report;
pub mod rvcont;
pub mod synth;
