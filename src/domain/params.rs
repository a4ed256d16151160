//! Fit parameter registry.
//!
//! Every quantity the solver may vary is a [`ParamName`]: a fixed set of scalar
//! stellar parameters plus one entry per element abundance. Names coming from
//! users are normalized here (case folding, synonyms such as `grav` → `logg`
//! and `feh` → `monh`, `"fe abund"` → `Fe abund`) before being deduplicated.
//!
//! Two names are not continuous parameters at all: `vrad` switches on
//! per-segment radial velocity fitting and `cont` switches on continuum fitting.

use crate::domain::elements::Element;
use crate::error::AppError;

/// A continuous parameter that can be read from and written to the model state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamName {
    Teff,
    Logg,
    Monh,
    Vmic,
    Vmac,
    Vsini,
    Abund(Element),
}

impl ParamName {
    /// Canonical label (`teff`, `logg`, …, `Fe abund`).
    pub fn label(self) -> String {
        match self {
            ParamName::Teff => "teff".to_string(),
            ParamName::Logg => "logg".to_string(),
            ParamName::Monh => "monh".to_string(),
            ParamName::Vmic => "vmic".to_string(),
            ParamName::Vmac => "vmac".to_string(),
            ParamName::Vsini => "vsini".to_string(),
            ParamName::Abund(el) => format!("{} abund", el.symbol()),
        }
    }

    /// Parse a single user-facing name.
    pub fn parse(raw: &str) -> Result<ParamToken, AppError> {
        let name = raw.trim().to_lowercase();
        let name = name.split_whitespace().collect::<Vec<_>>().join(" ");

        let token = match name.as_str() {
            "teff" => ParamToken::Param(ParamName::Teff),
            "logg" | "grav" => ParamToken::Param(ParamName::Logg),
            "monh" | "feh" => ParamToken::Param(ParamName::Monh),
            "vmic" => ParamToken::Param(ParamName::Vmic),
            "vmac" => ParamToken::Param(ParamName::Vmac),
            "vsini" => ParamToken::Param(ParamName::Vsini),
            "vrad" => ParamToken::FitVrad,
            "cont" => ParamToken::FitContinuum,
            other => {
                let Some(symbol) = other.strip_suffix("abund").map(str::trim) else {
                    return Err(unknown_param(raw));
                };
                match Element::from_symbol(symbol) {
                    Some(el) if !symbol.is_empty() => ParamToken::Param(ParamName::Abund(el)),
                    _ => return Err(unknown_param(raw)),
                }
            }
        };
        Ok(token)
    }
}

impl std::fmt::Display for ParamName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.label())
    }
}

/// One parsed name: either a parameter or an auxiliary fit-mode switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamToken {
    Param(ParamName),
    FitVrad,
    FitContinuum,
}

/// Normalized fit selection: ordered unique parameters plus mode switches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamSelection {
    pub params: Vec<ParamName>,
    pub fit_vrad: bool,
    pub fit_continuum: bool,
}

/// Normalize and deduplicate parameter names, preserving first occurrence order.
pub fn normalize_param_names<S: AsRef<str>>(names: &[S]) -> Result<ParamSelection, AppError> {
    let mut selection = ParamSelection::default();
    for raw in names {
        match ParamName::parse(raw.as_ref())? {
            ParamToken::Param(p) => {
                if !selection.params.contains(&p) {
                    selection.params.push(p);
                }
            }
            ParamToken::FitVrad => selection.fit_vrad = true,
            ParamToken::FitContinuum => selection.fit_continuum = true,
        }
    }
    Ok(selection)
}

fn unknown_param(raw: &str) -> AppError {
    AppError::new(2, format!("Unknown fit parameter '{raw}'."))
}
