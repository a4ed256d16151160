//! Reporting utilities: formatted terminal output for synthesis and fit runs.

pub mod format;

pub use format::*;
