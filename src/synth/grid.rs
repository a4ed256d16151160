//! Uniform-in-velocity output grid.
//!
//! Broadening kernels are convolved on a grid with a constant velocity step,
//! i.e. geometric in wavelength. The step is the largest of:
//!
//! 1. the smallest step of the intrinsic grid
//! 2. 10% of the mean dispersion of the intrinsic grid
//! 3. 0.05 km/s (about 1% of the width of a solar line)

use crate::error::AppError;
use crate::synth::CLIGHT;

/// Lower limit on the output velocity step (km/s).
pub const MIN_VELOCITY_STEP: f64 = 0.05;

/// Geometric output grid for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformGrid {
    pub wave: Vec<f64>,
    /// Step selected from the candidates (km/s).
    pub requested_step: f64,
    /// Step realized by the endpoint-exact geometric spacing (km/s).
    pub vstep: f64,
}

/// The three candidate velocity steps, in km/s.
pub fn step_candidates(wint: &[f64]) -> Result<[f64; 3], AppError> {
    if wint.len() < 2 {
        return Err(AppError::new(
            4,
            format!("Intrinsic grid needs at least 2 points, got {}.", wint.len()),
        ));
    }
    let begin = wint[0];
    let end = wint[wint.len() - 1];

    let (jmin, dmin) = wint
        .windows(2)
        .map(|w| w[1] - w[0])
        .enumerate()
        .fold((0, f64::INFINITY), |best, (j, d)| if d < best.1 { (j, d) } else { best });
    if !(dmin > 0.0) {
        return Err(AppError::new(4, "Intrinsic grid is not strictly increasing."));
    }

    let smallest = dmin / wint[jmin] * CLIGHT;
    let mid = 0.5 * (begin + end);
    let dispersion = 0.1 * (end - begin) / (wint.len() as f64 - 1.0) / mid * CLIGHT;
    Ok([smallest, dispersion, MIN_VELOCITY_STEP])
}

/// Build the geometric grid spanning the intrinsic grid's endpoints.
///
/// The point count is always odd and the endpoints are reproduced exactly.
pub fn build_uniform_grid(wint: &[f64]) -> Result<UniformGrid, AppError> {
    let candidates = step_candidates(wint)?;
    let requested_step = candidates.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

    let begin = wint[0];
    let end = wint[wint.len() - 1];
    let span = (end / begin).log10().abs();
    let mut n = (span / (1.0 + requested_step / CLIGHT).log10() + 1.0) as usize;
    if n % 2 == 0 {
        n += 1;
    }
    let n = n.max(3);

    let ratio = (end / begin).ln() / (n as f64 - 1.0);
    let mut wave: Vec<f64> = (0..n).map(|i| begin * (ratio * i as f64).exp()).collect();
    wave[0] = begin;
    wave[n - 1] = end;

    let vstep = CLIGHT * (wave[1] / wave[0]).ln();
    Ok(UniformGrid {
        wave,
        requested_step,
        vstep,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clustered_grid() -> Vec<f64> {
        let mut w: Vec<f64> = (0..=200).map(|i| 5000.0 + 0.05 * i as f64).collect();
        w.extend([5004.001, 5004.002, 5004.0035]);
        w.sort_by(|a, b| a.total_cmp(b));
        w
    }

    #[test]
    fn grid_is_odd_with_exact_endpoints() {
        for wint in [
            clustered_grid(),
            vec![4000.0, 4000.5, 4001.0, 4003.0],
            (0..50).map(|i| 6500.0 + 0.013 * i as f64).collect(),
        ] {
            let grid = build_uniform_grid(&wint).unwrap();
            assert_eq!(grid.wave.len() % 2, 1);
            assert_eq!(grid.wave[0], wint[0]);
            assert_eq!(grid.wave[grid.wave.len() - 1], wint[wint.len() - 1]);
        }
    }

    #[test]
    fn chosen_step_dominates_every_candidate() {
        let wint = clustered_grid();
        let candidates = step_candidates(&wint).unwrap();
        let grid = build_uniform_grid(&wint).unwrap();
        for c in candidates {
            assert!(grid.requested_step >= c);
        }
        assert!(candidates.contains(&grid.requested_step));
    }

    #[test]
    fn velocity_step_is_constant() {
        let grid = build_uniform_grid(&clustered_grid()).unwrap();
        let steps: Vec<f64> = grid
            .wave
            .windows(2)
            .map(|w| CLIGHT * (w[1] / w[0]).ln())
            .collect();
        for s in steps {
            assert!((s - grid.vstep).abs() < 1e-5);
        }
        assert!((grid.vstep / grid.requested_step - 1.0).abs() < 1e-2);
    }

    #[test]
    fn degenerate_grids_are_rejected() {
        assert!(build_uniform_grid(&[5000.0]).is_err());
        assert!(build_uniform_grid(&[5000.0, 5000.0, 5001.0]).is_err());
    }
}
