//! Parameter fitting.
//!
//! Responsibilities:
//!
//! - bounds, scales and default values of fit parameters (`bounds`)
//! - residuals of the synthetic against the observed spectrum (`residuals`)
//! - finite-difference Jacobian on a frozen wavelength grid (`jacobian`)
//! - bounded robust least squares (`solver`)
//! - the fit driver and its uncertainty estimates (`driver`)
//! - line data systematics (`systematics`)

pub mod bounds;
pub mod driver;
pub mod jacobian;
pub mod residuals;
pub mod solver;
pub mod systematics;

pub use bounds::*;
pub use driver::*;
pub use jacobian::*;
pub use residuals::*;
pub use solver::*;
pub use systematics::*;
