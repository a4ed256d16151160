//! Environment-driven settings.
//!
//! Values come from the process environment, optionally seeded from a `.env`
//! file in the working directory:
//!
//! - `SPECFIT_DATA_DIR`   support data path handed to the engine (default `./data`)
//! - `SPECFIT_VRAD_LIMIT` half-width of the radial velocity search in km/s (default 100)
//! - `SPECFIT_MAX_NFEV`   default cap on residual evaluations during a fit

use std::path::PathBuf;

use crate::error::AppError;

/// Default half-width of the radial velocity search (km/s).
pub const DEFAULT_VRAD_LIMIT: f64 = 100.0;

#[derive(Debug, Clone)]
pub struct Settings {
    pub data_dir: PathBuf,
    pub vrad_limit: f64,
    pub max_nfev: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            vrad_limit: DEFAULT_VRAD_LIMIT,
            max_nfev: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        let mut settings = Settings::default();

        if let Ok(dir) = std::env::var("SPECFIT_DATA_DIR") {
            settings.data_dir = PathBuf::from(dir);
        }
        if let Ok(raw) = std::env::var("SPECFIT_VRAD_LIMIT") {
            settings.vrad_limit = parse_positive(&raw, "SPECFIT_VRAD_LIMIT")?;
        }
        if let Ok(raw) = std::env::var("SPECFIT_MAX_NFEV") {
            let n: usize = raw.trim().parse().map_err(|_| {
                AppError::new(2, format!("SPECFIT_MAX_NFEV must be a positive integer, got '{raw}'."))
            })?;
            if n == 0 {
                return Err(AppError::new(2, "SPECFIT_MAX_NFEV must be > 0."));
            }
            settings.max_nfev = Some(n);
        }

        Ok(settings)
    }
}

fn parse_positive(raw: &str, key: &str) -> Result<f64, AppError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| AppError::new(2, format!("{key} must be a number, got '{raw}'.")))?;
    if !(value.is_finite() && value > 0.0) {
        return Err(AppError::new(2, format!("{key} must be finite and > 0, got {value}.")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_positive_rejects_garbage() {
        assert!(parse_positive("abc", "K").is_err());
        assert!(parse_positive("-1", "K").is_err());
        assert!((parse_positive(" 50 ", "K").unwrap() - 50.0).abs() < 1e-12);
    }
}
