//! Synthesis range planning.
//!
//! A segment is synthesized over a range wider than its nominal bounds so that
//! lines Doppler shifted into the segment (by the radial velocity, rotation or
//! the barycentric motion) are included.

use crate::synth::CLIGHT;

/// Maximum expected barycentric correction (km/s).
pub const BARYCENTRIC_PAD: f64 = 30.0;

/// Velocity pads `(blue, red)` in km/s for a radial velocity and `v sin i`.
///
/// A positive velocity widens the blue side only, a negative one the red side.
pub fn velocity_pad(vrad: f64, vsini: f64) -> (f64, f64) {
    let base = BARYCENTRIC_PAD + 0.5 * vsini.max(0.0);
    let blue = base + vrad.max(0.0);
    let red = base - vrad.min(0.0);
    (blue, red)
}

/// Padded `(begin, end)` wavelength range to synthesize for the nominal `wran`.
pub fn synthesis_range(wran: [f64; 2], vrad: f64, vsini: f64) -> (f64, f64) {
    let (blue, red) = velocity_pad(vrad, vsini);
    let begin = wran[0] * (1.0 - blue / CLIGHT);
    let end = wran[1] * (1.0 + red / CLIGHT);
    (begin, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_velocities_give_barycentric_pad_only() {
        let (begin, end) = synthesis_range([5000.0, 5010.0], 0.0, 0.0);
        assert!((begin - 5000.0 * (1.0 - 30.0 / CLIGHT)).abs() < 1e-12);
        assert!((end - 5010.0 * (1.0 + 30.0 / CLIGHT)).abs() < 1e-12);
    }

    #[test]
    fn negative_rotation_is_clamped() {
        assert_eq!(synthesis_range([5000.0, 5010.0], 0.0, -8.0), synthesis_range([5000.0, 5010.0], 0.0, 0.0));
    }

    #[test]
    fn radial_velocity_widens_one_side() {
        let (b0, e0) = synthesis_range([5000.0, 5010.0], 0.0, 0.0);
        let (b1, e1) = synthesis_range([5000.0, 5010.0], 20.0, 0.0);
        let (b2, e2) = synthesis_range([5000.0, 5010.0], -20.0, 0.0);
        assert!(b1 < b0 && (e1 - e0).abs() < 1e-12);
        assert!(e2 > e0 && (b2 - b0).abs() < 1e-12);
    }

    #[test]
    fn padding_is_monotonic_in_velocities() {
        let mut last = (f64::INFINITY, 0.0);
        for v in [0.0, 5.0, 10.0, 50.0, 200.0] {
            let (b, e) = synthesis_range([6000.0, 6010.0], v, v);
            assert!(b <= last.0 && e >= last.1);
            last = (b, e);
        }
        let mut last_width = 0.0;
        for v in [0.0, -5.0, -10.0, -50.0] {
            let (b, e) = synthesis_range([6000.0, 6010.0], v, 0.0);
            assert!(e - b >= last_width);
            last_width = e - b;
        }
    }
}
