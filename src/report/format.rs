//! Formatted terminal output for synthesis and fit runs.
//!
//! We keep formatting code in one place so:
//! - the synthesis/fitting code stays clean and testable
//! - output changes are localized

use crate::domain::{CscaleFlag, ModelState, VradFlag};

/// Stellar parameters and per-segment layout of a state.
pub fn format_state_summary(state: &ModelState) -> String {
    let mut out = String::new();

    out.push_str("=== specfit - spectral synthesis ===\n");
    out.push_str(&format!(
        "Teff={:.1} K | logg={:.3} | [M/H]={:+.3} | vmic={:.3} | vmac={:.3} | vsini={:.3} km/s\n",
        state.teff, state.logg, state.monh, state.vmic, state.vmac, state.vsini
    ));
    out.push_str(&format!(
        "Atmosphere: {} ({:?}) | lines: {} | RV mode: {} | continuum mode: {}\n",
        state.atmo.source,
        state.atmo.method,
        state.linelist.len(),
        vrad_label(state.vrad_flag),
        cscale_label(state.cscale_flag),
    ));

    out.push_str("\nSegments:\n");
    out.push_str(format!("{:<4} {:>22} {:>8} {:>10} {:<24}\n", "seg", "range", "points", "vrad", "continuum").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<4} {:-<22} {:-<8} {:-<10} {:-<24}\n", "", "", "", "", "").trim_end());
    out.push('\n');
    for (seg, [lo, hi]) in state.wran.iter().enumerate() {
        let points = state.wave.get(seg).map_or(0, Vec::len);
        let vrad = state.vrad.get(seg).copied().unwrap_or(0.0);
        let cont = state.cscale.get(seg).map(|c| fmt_vec(c)).unwrap_or_default();
        out.push_str(
            format!(
                "{:<4} {:>22} {:>8} {:>10.3} {:<24}\n",
                seg,
                format!("[{lo:.3}, {hi:.3}]"),
                points,
                vrad,
                cont
            )
            .trim_end(),
        );
        out.push('\n');
    }
    out
}

/// Fitted parameters with both uncertainty estimates, plus fit quality.
///
/// Empty when the state carries no fit results.
pub fn format_fit_summary(state: &ModelState) -> String {
    let Some(fit) = &state.fitresults else {
        return String::new();
    };
    let mut out = String::new();

    out.push_str("Fit results:\n");
    out.push_str(format!("{:<12} {:>14} {:>12} {:>12}\n", "parameter", "value", "unc(covar)", "unc(median)").trim_end());
    out.push('\n');
    out.push_str(format!("{:-<12} {:-<14} {:-<12} {:-<12}\n", "", "", "", "").trim_end());
    out.push('\n');
    for (i, name) in fit.parameters.iter().enumerate() {
        let value = fit.values.get(i).copied().unwrap_or(f64::NAN);
        let punc = fit.punc.get(i).copied().unwrap_or(f64::NAN);
        let punc2 = fit.punc2.get(i).copied().unwrap_or(f64::NAN);
        out.push_str(&format!("{name:<12} {value:>14.4} {punc:>12.4} {punc2:>12.4}\n"));
    }
    out.push('\n');
    out.push_str(&format!(
        "Reduced chi-square: {:.4} | residuals: {} | evaluations: {}\n",
        fit.chisq,
        fit.resid.len(),
        fit.nfev
    ));
    out.push_str(&format!("Solver: {}\n", fit.message));
    out
}

fn vrad_label(flag: VradFlag) -> &'static str {
    match flag {
        VradFlag::None => "none",
        VradFlag::Each => "each",
        VradFlag::Whole => "whole",
        VradFlag::Fix => "fix",
    }
}

fn cscale_label(flag: CscaleFlag) -> &'static str {
    match flag {
        CscaleFlag::None => "none",
        CscaleFlag::Fix => "fix",
        CscaleFlag::Constant => "constant",
        CscaleFlag::Linear => "linear",
        CscaleFlag::Quadratic => "quadratic",
    }
}

fn fmt_vec(v: &[f64]) -> String {
    let parts: Vec<String> = v.iter().map(|x| format!("{x:.6}")).collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AtmosphereSpec, FitResults, LineList};

    fn state() -> ModelState {
        let mut s = ModelState::new(
            vec![[5000.0, 5004.0], [6000.0, 6004.0]],
            LineList::default(),
            AtmosphereSpec::grid("marcs.sav"),
        );
        s.vrad = vec![1.5, -2.0];
        s.cscale = vec![vec![1.0], vec![0.001, 0.98]];
        s
    }

    #[test]
    fn state_summary_lists_every_segment() {
        let txt = format_state_summary(&state());
        assert!(txt.contains("Teff=5778.0 K"));
        assert!(txt.contains("[5000.000, 5004.000]"));
        assert!(txt.contains("[0.001000, 0.980000]"));
        assert!(txt.contains("-2.000"));
        assert!(txt.lines().all(|l| l == l.trim_end()));
    }

    #[test]
    fn fit_summary_is_empty_without_results() {
        assert!(format_fit_summary(&state()).is_empty());
    }

    #[test]
    fn fit_summary_shows_both_uncertainties() {
        let mut s = state();
        s.fitresults = Some(FitResults {
            parameters: vec!["teff".to_string(), "Fe abund".to_string()],
            values: vec![5712.25, 7.43],
            punc: vec![12.5, 0.02],
            punc2: vec![20.0, 0.05],
            chisq: 1.07,
            resid: vec![0.0; 40],
            nfev: 17,
            message: "`ftol` termination condition is satisfied.".to_string(),
            ..FitResults::default()
        });
        let txt = format_fit_summary(&s);
        assert!(txt.contains("teff              5712.2500      12.5000      20.0000"));
        assert!(txt.contains("Fe abund"));
        assert!(txt.contains("Reduced chi-square: 1.0700 | residuals: 40 | evaluations: 17"));
    }
}
