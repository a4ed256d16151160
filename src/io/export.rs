//! Export observed and synthetic spectra to CSV.
//!
//! One row per output wavelength point, all segments in one file. Missing
//! columns (no observation yet, no synthesis yet) are left empty.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::domain::ModelState;
use crate::error::AppError;

fn cell(values: Option<&Vec<f64>>, i: usize) -> String {
    values
        .and_then(|v| v.get(i))
        .map(|v| format!("{v:.6}"))
        .unwrap_or_default()
}

/// Write all segments of `state` to a CSV file.
pub fn write_spectrum_csv(path: &Path, state: &ModelState) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create spectrum CSV '{}': {e}", path.display())))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "segment,wavelength,observed,uncertainty,mask,synthetic")
        .map_err(|e| AppError::new(2, format!("Failed to write spectrum CSV header: {e}")))?;

    for (seg, wave) in state.wave.iter().enumerate() {
        let uncs = state.uncs.as_ref().and_then(|u| u.get(seg));
        for (i, w) in wave.iter().enumerate() {
            let mask = state
                .mask
                .get(seg)
                .and_then(|m| m.get(i))
                .map(|m| m.to_string())
                .unwrap_or_default();
            writeln!(
                out,
                "{},{:.6},{},{},{},{}",
                seg,
                w,
                cell(state.spec.get(seg), i),
                cell(uncs, i),
                mask,
                cell(state.synth.get(seg), i),
            )
            .map_err(|e| AppError::new(2, format!("Failed to write spectrum CSV row: {e}")))?;
        }
    }
    out.flush()
        .map_err(|e| AppError::new(2, format!("Failed to write spectrum CSV: {e}")))?;
    Ok(())
}
