//! ASCII plotting of one spectral segment for terminal output.
//!
//! This is intentionally "dumb" (fixed-size grid), optimized for:
//! - quick visual sanity checks in a terminal
//! - deterministic output (helpful for golden tests)
//!
//! Plot elements:
//! - observed points: `o` (used in the fit), `.` (masked out)
//! - synthetic spectrum: `-`, sampled once per column

use crate::domain::ModelState;
use crate::error::AppError;
use crate::math::interp_at;

/// Render observed and synthetic flux of `segment`.
pub fn render_spectrum_plot(
    state: &ModelState,
    segment: usize,
    width: usize,
    height: usize,
) -> Result<String, AppError> {
    let wave = state
        .wave
        .get(segment)
        .filter(|w| !w.is_empty())
        .ok_or_else(|| AppError::new(2, format!("Segment {segment} has no wavelength grid to plot.")))?;

    let synth: Vec<(f64, f64)> = state
        .synth
        .get(segment)
        .map(|s| wave.iter().copied().zip(s.iter().copied()).collect())
        .unwrap_or_default();
    let good = state.mask_good(segment);
    let observed: Vec<(f64, f64, bool)> = state
        .spec
        .get(segment)
        .map(|s| {
            wave.iter()
                .zip(s.iter())
                .zip(good.iter())
                .map(|((w, f), g)| (*w, *f, *g))
                .collect()
        })
        .unwrap_or_default();

    let w_min = wave[0];
    let w_max = wave[wave.len() - 1];
    Ok(render_plot(segment, &observed, &synth, w_min, w_max, width, height))
}

fn render_plot(
    segment: usize,
    observed: &[(f64, f64, bool)],
    synth: &[(f64, f64)],
    w_min: f64,
    w_max: f64,
    width: usize,
    height: usize,
) -> String {
    let width = width.max(10);
    let height = height.max(5);

    let values = observed.iter().map(|p| p.1).chain(synth.iter().map(|p| p.1));
    let (f_min, f_max) = flux_range(values).unwrap_or((0.0, 1.0));
    let (f_min, f_max) = pad_range(f_min, f_max, 0.05);

    let mut grid = vec![vec![' '; width]; height];

    // Synthetic flux first so observed points overlay it.
    for (x, f) in sample_columns(synth, w_min, w_max, width) {
        grid[map_y(f, f_min, f_max, height)][x] = '-';
    }

    for &(w, f, used) in observed {
        if !f.is_finite() {
            continue;
        }
        let x = map_x(w, w_min, w_max, width);
        let y = map_y(f, f_min, f_max, height);
        grid[y][x] = if used { 'o' } else { '.' };
    }

    let mut out = format!("Plot: segment {segment} | wave=[{w_min:.3}, {w_max:.3}] | flux=[{f_min:.3}, {f_max:.3}]\n");
    for row in grid {
        out.extend(row);
        out.push('\n');
    }
    out
}

/// Synthetic flux interpolated at the wavelength of every plot column it covers.
fn sample_columns(synth: &[(f64, f64)], w_min: f64, w_max: f64, width: usize) -> Vec<(usize, f64)> {
    let (xp, fp): (Vec<f64>, Vec<f64>) = synth.iter().filter(|p| p.1.is_finite()).copied().unzip();
    let (Some(&lo), Some(&hi)) = (xp.first(), xp.last()) else {
        return Vec::new();
    };
    let step = if width > 1 { (w_max - w_min) / (width as f64 - 1.0) } else { 0.0 };
    (0..width)
        .map(|x| (x, w_min + step * x as f64))
        .filter(|&(_, w)| w >= lo && w <= hi)
        .map(|(x, w)| (x, interp_at(w, &xp, &fp)))
        .collect()
}

fn flux_range<I: Iterator<Item = f64>>(values: I) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return None;
    }
    if hi > lo { Some((lo, hi)) } else { Some((lo - 0.5, hi + 0.5)) }
}

fn pad_range(min: f64, max: f64, frac: f64) -> (f64, f64) {
    let pad = ((max - min).abs() * frac).max(1e-12);
    (min - pad, max + pad)
}

fn map_x(w: f64, w_min: f64, w_max: f64, width: usize) -> usize {
    if w_max <= w_min || width < 2 {
        return 0;
    }
    let u = ((w - w_min) / (w_max - w_min)).clamp(0.0, 1.0);
    (u * (width - 1) as f64).round() as usize
}

/// Row 0 is the top of the plot (highest flux).
fn map_y(f: f64, f_min: f64, f_max: f64, height: usize) -> usize {
    let u = ((f - f_min) / (f_max - f_min)).clamp(0.0, 1.0);
    ((1.0 - u) * (height.max(2) - 1) as f64).round() as usize
}
