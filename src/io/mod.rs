//! Input/output helpers.
//!
//! - Model State snapshots (JSON) (`snapshot`)
//! - spectrum export (CSV) (`export`)

pub mod export;
pub mod snapshot;

pub use export::*;
pub use snapshot::*;
