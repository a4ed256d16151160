//! Chemical elements and the solar abundance pattern.
//!
//! Abundances are kept on the astronomical `log ε` scale (`log N_X/N_H + 12`).
//! Elements without a measured photospheric value have no solar default.

use serde::{Deserialize, Serialize};

/// Element symbols ordered by atomic number (H = 1 … Es = 99).
pub const SYMBOLS: [&str; 99] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es",
];

/// Solar photospheric abundances (Asplund et al. 2009), indexed like [`SYMBOLS`].
const SOLAR: [Option<f64>; 99] = [
    Some(12.00), Some(10.93), Some(1.05), Some(1.38), Some(2.70), Some(8.43), Some(7.83),
    Some(8.69), Some(4.56), Some(7.93), Some(6.24), Some(7.60), Some(6.45), Some(7.51),
    Some(5.41), Some(7.12), Some(5.50), Some(6.40), Some(5.03), Some(6.34), Some(3.15),
    Some(4.95), Some(3.93), Some(5.64), Some(5.43), Some(7.50), Some(4.99), Some(6.22),
    Some(4.19), Some(4.56), Some(3.04), Some(3.65), Some(2.30), Some(3.34), Some(2.54),
    Some(3.25), Some(2.52), Some(2.87), Some(2.21), Some(2.58), Some(1.46), Some(1.88), None,
    Some(1.75), Some(0.91), Some(1.57), Some(0.94), Some(1.71), Some(0.80), Some(2.04),
    Some(1.01), Some(2.18), Some(1.55), Some(2.24), Some(1.08), Some(2.18), Some(1.10),
    Some(1.58), Some(0.72), Some(1.42), None, Some(0.96), Some(0.52), Some(1.07), Some(0.30),
    Some(1.10), Some(0.48), Some(0.92), Some(0.10), Some(0.84), Some(0.10), Some(0.85),
    Some(-0.12), Some(0.85), Some(0.26), Some(1.40), Some(1.38), Some(1.62), Some(0.92),
    Some(1.17), Some(0.90), Some(1.75), Some(0.65), None, None, None, None, None, None, Some(0.02),
    None, Some(-0.54), None, None, None, None, None, None, None,
];

/// A chemical element, identified by atomic number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Element(u8);

impl Element {
    pub fn from_atomic_number(z: u8) -> Option<Self> {
        if (1..=SYMBOLS.len() as u8).contains(&z) {
            Some(Self(z))
        } else {
            None
        }
    }

    /// Case-insensitive symbol lookup (`"fe"`, `"Fe"`, `"FE"`).
    pub fn from_symbol(symbol: &str) -> Option<Self> {
        let symbol = symbol.trim();
        SYMBOLS
            .iter()
            .position(|s| s.eq_ignore_ascii_case(symbol))
            .map(|idx| Self(idx as u8 + 1))
    }

    pub fn atomic_number(self) -> u8 {
        self.0
    }

    pub fn symbol(self) -> &'static str {
        SYMBOLS[self.0 as usize - 1]
    }

    /// Solar `log ε`, if the element has a photospheric measurement.
    pub fn solar(self) -> Option<f64> {
        SOLAR[self.0 as usize - 1]
    }

    /// Metals are everything heavier than helium.
    pub fn is_metal(self) -> bool {
        self.0 > 2
    }
}

impl TryFrom<String> for Element {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Element::from_symbol(&value).ok_or_else(|| format!("unknown element symbol '{value}'"))
    }
}

impl From<Element> for String {
    fn from(value: Element) -> Self {
        value.symbol().to_string()
    }
}

impl std::fmt::Display for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}
