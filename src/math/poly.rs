//! Polynomial helpers. Coefficients are ordered highest power first.

/// Evaluate a polynomial with Horner's scheme.
pub fn polyval(coeffs: &[f64], x: f64) -> f64 {
    coeffs.iter().fold(0.0, |acc, &c| acc * x + c)
}

/// True when the polynomial is identically zero (no usable correction).
pub fn is_zero_poly(coeffs: &[f64]) -> bool {
    coeffs.iter().all(|&c| c == 0.0)
}
