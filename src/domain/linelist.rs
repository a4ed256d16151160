//! Atomic line data handed to the radiative transfer engine.
//!
//! Parsing catalog formats is not done here; the line list arrives already
//! normalized. What this module adds is the data-quality side: turning the
//! reference flags of a line into a relative error.

use serde::{Deserialize, Serialize};

/// A single spectral line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// Species label, e.g. `"Fe 1"`.
    pub species: String,
    /// Central wavelength (Å).
    pub wlcent: f64,
    /// Lower level excitation energy (eV).
    pub excit: f64,
    /// log(gf).
    pub gflog: f64,
    /// Radiative damping constant.
    pub gamrad: f64,
    /// Stark damping constant.
    pub gamqst: f64,
    /// Van der Waals damping constant.
    pub gamvw: f64,
    /// Expected central depth (0..1).
    pub depth: f64,
    /// Relative error of the line data (see [`relative_error_from_flag`]).
    #[serde(default = "default_line_error")]
    pub error: f64,
}

fn default_line_error() -> f64 {
    UNDEFINED_LINE_ERROR
}

/// Relative error assigned to lines without a usable quality flag.
pub const UNDEFINED_LINE_ERROR: f64 = 0.5;

impl Line {
    /// Element symbol of the species (`"Fe 1"` → `"Fe"`).
    pub fn element_symbol(&self) -> &str {
        self.species.split_whitespace().next().unwrap_or("")
    }

    /// Ionization stage encoded in the species label (`"Fe 2"` → 2, default 1).
    pub fn ion_stage(&self) -> u8 {
        self.species
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(1)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineList {
    pub lines: Vec<Line>,
}

impl LineList {
    pub fn new(lines: Vec<Line>) -> Self {
        Self { lines }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn errors(&self) -> Vec<f64> {
        self.lines.iter().map(|l| l.error).collect()
    }
}

/// NIST accuracy classes and their relative errors.
const NIST_CLASSES: [(&str, f64); 13] = [
    ("AAA", 0.003),
    ("AA", 0.01),
    ("A+", 0.02),
    ("A", 0.03),
    ("B+", 0.07),
    ("B", 0.1),
    ("C+", 0.18),
    ("C", 0.25),
    ("C-", 0.3),
    ("D+", 0.4),
    ("D", 0.5),
    ("D-", 0.6),
    ("E", 0.7),
];

/// Convert a line reference quality flag into a relative error.
///
/// - blank / `_` / `P` (undefined or predicted): 0.5
/// - `E<x>`: error given in dex, `10^x`
/// - `C<x>`: cancellation factor, `|x|`
/// - `N<class>`: NIST accuracy class (`AAA` … `E`)
///
/// Flags that cannot be interpreted fall back to the undefined value.
pub fn relative_error_from_flag(flag: &str) -> f64 {
    let mut chars = flag.chars();
    let Some(kind) = chars.next() else {
        return UNDEFINED_LINE_ERROR;
    };
    let rest = chars.as_str();

    match kind {
        ' ' | '_' | 'P' => UNDEFINED_LINE_ERROR,
        'E' => rest
            .trim()
            .parse::<f64>()
            .map(|x| 10f64.powf(x))
            .unwrap_or(UNDEFINED_LINE_ERROR),
        'C' => rest
            .trim()
            .parse::<f64>()
            .map(f64::abs)
            .unwrap_or(UNDEFINED_LINE_ERROR),
        'N' => {
            let class: String = rest.chars().take(4).collect();
            let class = class.trim();
            NIST_CLASSES
                .iter()
                .find(|(name, _)| *name == class)
                .map(|(_, err)| *err)
                .unwrap_or(UNDEFINED_LINE_ERROR)
        }
        _ => UNDEFINED_LINE_ERROR,
    }
}
