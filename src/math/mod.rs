//! Mathematical utilities: least squares, interpolation, polynomials, medians.

pub mod interp;
pub mod ols;
pub mod poly;
pub mod stats;

pub use interp::*;
pub use ols::*;
pub use poly::*;
pub use stats::*;
