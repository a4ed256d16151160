//! Disk integration and broadening.
//!
//! Specific intensities at a few disk positions μ are turned into a flux
//! spectrum. Rotational and radial-tangential macroturbulent broadening depend
//! on the disk position, so they are applied per annulus while summing.
//! Instrumental broadening is a separate final pass.
//!
//! All convolutions work on a uniform velocity grid and clamp at the edges.

use crate::domain::InstrumentProfile;
use crate::error::AppError;
use crate::synth::CLIGHT;

/// Kernels are truncated at this many Gaussian widths.
const GAUSS_REACH: f64 = 4.0;
/// FWHM / Gaussian sigma.
const FWHM_PER_SIGMA: f64 = 2.354_820_045;
/// FWHM of `sinc(πu)` in units of `u`.
const SINC_FWHM: f64 = 1.206_709_128;

/// One disk annulus: its μ, inner and outer radius.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Annulus {
    index: usize,
    mu: f64,
    r_in: f64,
    r_out: f64,
}

impl Annulus {
    /// Projected area fraction of the disk.
    fn weight(&self) -> f64 {
        self.r_out * self.r_out - self.r_in * self.r_in
    }
}

/// Split the disk into annuli centered on the given μ values.
fn annuli(mu: &[f64]) -> Vec<Annulus> {
    let mut order: Vec<(usize, f64)> = mu
        .iter()
        .enumerate()
        .map(|(i, &m)| (i, (1.0 - m * m).max(0.0).sqrt()))
        .collect();
    order.sort_by(|a, b| a.1.total_cmp(&b.1));

    let n = order.len();
    let mut out = Vec::with_capacity(n);
    for k in 0..n {
        let r_in = if k == 0 { 0.0 } else { 0.5 * (order[k - 1].1 + order[k].1) };
        let r_out = if k + 1 == n { 1.0 } else { 0.5 * (order[k].1 + order[k + 1].1) };
        out.push(Annulus {
            index: order[k].0,
            mu: mu[order[k].0],
            r_in,
            r_out,
        });
    }
    out
}

/// Convolve `y` with a centered odd-length `kernel`, clamping at the edges.
pub fn convolve_clamped(y: &[f64], kernel: &[f64]) -> Vec<f64> {
    if kernel.len() <= 1 || y.is_empty() {
        return y.to_vec();
    }
    let half = (kernel.len() / 2) as isize;
    let last = y.len() as isize - 1;
    (0..y.len() as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| {
                    let j = (i + k as isize - half).clamp(0, last);
                    w * y[j as usize]
                })
                .sum()
        })
        .collect()
}

fn normalize(mut kernel: Vec<f64>) -> Vec<f64> {
    let total: f64 = kernel.iter().sum();
    if !(total.is_finite() && total > 0.0) {
        return vec![1.0];
    }
    kernel.iter_mut().for_each(|w| *w /= total);
    kernel
}

/// Sampled Gaussian `exp(-(v/width)^2)` on a grid of step `vstep`.
fn gaussian_kernel(width: f64, vstep: f64) -> Vec<f64> {
    if !(width > 0.0 && vstep > 0.0) {
        return vec![1.0];
    }
    let half = (GAUSS_REACH * width / vstep).ceil() as isize;
    normalize(
        (-half..=half)
            .map(|j| {
                let x = j as f64 * vstep / width;
                (-x * x).exp()
            })
            .collect(),
    )
}

/// Radial-tangential macroturbulence kernel at one disk position.
fn macroturbulence_kernel(vmac: f64, mu: f64, vstep: f64) -> Vec<f64> {
    if !(vmac > 0.0) {
        return vec![1.0];
    }
    let sin_theta = (1.0 - mu * mu).max(0.0).sqrt();
    let radial = gaussian_kernel(vmac * mu, vstep);
    let tangential = gaussian_kernel(vmac * sin_theta, vstep);
    let len = radial.len().max(tangential.len());
    let mut kernel = vec![0.0; len];
    for part in [&radial, &tangential] {
        let offset = (len - part.len()) / 2;
        for (k, w) in part.iter().enumerate() {
            kernel[offset + k] += 0.5 * w;
        }
    }
    kernel
}

/// Rotation kernel of an annulus: projected length of the chord at each velocity.
fn rotation_kernel(vsini: f64, annulus: &Annulus, vstep: f64) -> Vec<f64> {
    if !(vsini > 0.0 && vstep > 0.0) {
        return vec![1.0];
    }
    let half = (vsini * annulus.r_out / vstep).ceil() as isize;
    normalize(
        (-half..=half)
            .map(|j| {
                let x = j as f64 * vstep / vsini;
                let outer = (annulus.r_out * annulus.r_out - x * x).max(0.0).sqrt();
                let inner = (annulus.r_in * annulus.r_in - x * x).max(0.0).sqrt();
                outer - inner
            })
            .collect(),
    )
}

/// Integrate specific intensities over the disk into a flux spectrum.
///
/// `intensities[i]` is the intensity at `mu[i]`, sampled on a grid with a
/// constant velocity step `vstep` (km/s). With `vsini = vmac = 0` this is the
/// plain area-weighted sum over annuli.
pub fn integrate_flux(
    mu: &[f64],
    intensities: &[Vec<f64>],
    vstep: f64,
    vsini: f64,
    vmac: f64,
) -> Result<Vec<f64>, AppError> {
    if mu.is_empty() || mu.len() != intensities.len() {
        return Err(AppError::new(
            4,
            format!(
                "Disk integration needs one intensity row per angle (mu={}, rows={}).",
                mu.len(),
                intensities.len()
            ),
        ));
    }
    let n = intensities[0].len();
    if intensities.iter().any(|row| row.len() != n) {
        return Err(AppError::new(4, "Intensity rows have different lengths."));
    }

    let mut flux = vec![0.0; n];
    for annulus in annuli(mu) {
        let row = &intensities[annulus.index];
        let macro_kernel = macroturbulence_kernel(vmac, annulus.mu, vstep);
        let rot_kernel = rotation_kernel(vsini, &annulus, vstep);
        let broadened = convolve_clamped(&convolve_clamped(row, &macro_kernel), &rot_kernel);
        let w = annulus.weight();
        for (f, b) in flux.iter_mut().zip(broadened) {
            *f += w * b;
        }
    }
    Ok(flux)
}

/// Apply the instrumental profile for resolving power `ipres`.
///
/// A resolving power of 0 (or any non-positive value) leaves the flux unchanged.
pub fn apply_instrumental(
    flux: &[f64],
    vstep: f64,
    ipres: f64,
    profile: InstrumentProfile,
) -> Vec<f64> {
    if !(ipres > 0.0 && vstep > 0.0) {
        return flux.to_vec();
    }
    let fwhm = CLIGHT / ipres / vstep;
    let kernel = match profile {
        InstrumentProfile::Gauss => {
            let sigma = fwhm / FWHM_PER_SIGMA;
            gaussian_kernel(sigma * std::f64::consts::SQRT_2, 1.0)
        }
        InstrumentProfile::Sinc => {
            let width = fwhm / SINC_FWHM;
            let half = (GAUSS_REACH * fwhm).ceil() as isize;
            normalize(
                (-half..=half)
                    .map(|j| {
                        let u = std::f64::consts::PI * j as f64 / width;
                        if j == 0 { 1.0 } else { u.sin() / u }
                    })
                    .collect(),
            )
        }
    };
    convolve_clamped(flux, &kernel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::DEFAULT_MU;

    fn absorption_line(n: usize) -> Vec<f64> {
        let c = (n / 2) as f64;
        (0..n)
            .map(|i| {
                let x = (i as f64 - c) / 3.0;
                1.0 - 0.6 * (-x * x).exp()
            })
            .collect()
    }

    #[test]
    fn annulus_weights_cover_the_disk() {
        let total: f64 = annuli(&DEFAULT_MU).iter().map(Annulus::weight).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn flat_intensity_integrates_to_itself() {
        let rows = vec![vec![2.0; 25]; DEFAULT_MU.len()];
        let flux = integrate_flux(&DEFAULT_MU, &rows, 1.0, 0.0, 0.0).unwrap();
        assert!(flux.iter().all(|f| (f - 2.0).abs() < 1e-12));

        let broadened = integrate_flux(&DEFAULT_MU, &rows, 0.5, 10.0, 3.0).unwrap();
        assert!(broadened.iter().all(|f| (f - 2.0).abs() < 1e-12));
    }

    #[test]
    fn broadening_conserves_equivalent_width_and_fills_core() {
        let n = 201;
        let rows = vec![absorption_line(n); DEFAULT_MU.len()];
        let sharp = integrate_flux(&DEFAULT_MU, &rows, 0.5, 0.0, 0.0).unwrap();
        let wide = integrate_flux(&DEFAULT_MU, &rows, 0.5, 8.0, 4.0).unwrap();

        let ew = |f: &[f64]| f.iter().map(|v| 1.0 - v).sum::<f64>();
        assert!((ew(&sharp) - ew(&wide)).abs() < 1e-6 * ew(&sharp));
        assert!(wide[n / 2] > sharp[n / 2]);
    }

    #[test]
    fn zero_resolution_disables_instrumental_profile() {
        let flux = absorption_line(51);
        assert_eq!(apply_instrumental(&flux, 1.0, 0.0, InstrumentProfile::Gauss), flux);
    }

    #[test]
    fn instrumental_profiles_smooth_the_core() {
        let flux = absorption_line(301);
        for profile in [InstrumentProfile::Gauss, InstrumentProfile::Sinc] {
            let out = apply_instrumental(&flux, 0.5, 50_000.0, profile);
            assert_eq!(out.len(), flux.len());
            assert!(out[150] > flux[150]);
            assert!((out[0] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn mismatched_rows_are_rejected() {
        let rows = vec![vec![1.0; 5]; 2];
        assert!(integrate_flux(&DEFAULT_MU, &rows, 1.0, 0.0, 0.0).is_err());
    }
}
