//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - initializes logging and reads the environment settings
//! - parses CLI arguments
//! - loads and saves model state snapshots
//! - runs demo generation, synthesis or fitting
//! - prints reports/plots and writes optional exports

use std::path::Path;

use clap::Parser;

use crate::cli::{Command, DemoArgs, FitArgs, PlotArgs, PlotOpts, SynthArgs};
use crate::config::Settings;
use crate::data::{generate_demo, DemoConfig};
use crate::domain::{AtmoMethod, ModelState};
use crate::engine::{AnalyticAtmospheres, AnalyticEngine};
use crate::error::AppError;
use crate::fit::{solve, FitObserver, SolveOptions};
use crate::io::{load_state, save_state, write_spectrum_csv};
use crate::synth::{SynthOptions, Synthesizer};

type DefaultSynthesizer = Synthesizer<AnalyticEngine, AnalyticAtmospheres>;

/// Entry point for the `specfit` binary.
pub fn run() -> Result<(), AppError> {
    if let Err(e) = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).try_init() {
        log::debug!("Logger already initialized: {e}");
    }
    let settings = Settings::from_env()?;
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Demo(args) => handle_demo(args, &settings),
        Command::Synth(args) => handle_synth(args, &settings),
        Command::Fit(args) => handle_fit(args, &settings),
        Command::Plot(args) => handle_plot(args),
    }
}

fn synthesizer(settings: &Settings) -> DefaultSynthesizer {
    Synthesizer::new(AnalyticEngine::new(), AnalyticAtmospheres::default())
        .with_data_dir(settings.data_dir.clone())
        .with_vrad_limit(settings.vrad_limit)
}

fn handle_demo(args: DemoArgs, settings: &Settings) -> Result<(), AppError> {
    let config = demo_config_from_args(&args);
    let mut synth = synthesizer(settings);
    let demo = generate_demo(&mut synth, &config)?;

    save_state(&args.out, &demo.observation)?;
    println!("{}", crate::report::format_state_summary(&demo.truth));
    finish(&demo.observation, args.export.as_deref(), &args.plot)
}

fn handle_synth(args: SynthArgs, settings: &Settings) -> Result<(), AppError> {
    let mut state = load_state(&args.state)?;
    apply_atmo_method(&mut state, args.atmo_method.as_deref())?;
    let mut synth = synthesizer(settings);
    let segments = (!args.segments.is_empty()).then_some(args.segments.as_slice());
    synth.synthesize_spectrum(&mut state, segments, SynthOptions::default())?;

    let out = args.out.as_deref().unwrap_or(&args.state);
    save_state(out, &state)?;
    println!("{}", crate::report::format_state_summary(&state));
    finish(&state, args.export.as_deref(), &args.plot)
}

fn handle_fit(args: FitArgs, settings: &Settings) -> Result<(), AppError> {
    let mut state = load_state(&args.state)?;
    if let Some(flag) = args.vrad_flag {
        state.vrad_flag = flag;
    }
    if let Some(flag) = args.cscale_flag {
        state.cscale_flag = flag;
    }
    apply_atmo_method(&mut state, args.atmo_method.as_deref())?;
    let opts = solve_options_from_args(&args, settings);
    let mut synth = synthesizer(settings);
    let mut progress = ProgressObserver::new(args.progress_every, args.plot.clone());

    solve(&mut synth, &mut state, args.params.as_slice(), &opts, Some(&mut progress))?;

    println!("{}", crate::report::format_state_summary(&state));
    println!("{}", crate::report::format_fit_summary(&state));
    finish(&state, args.export.as_deref(), &args.plot)
}

fn handle_plot(args: PlotArgs) -> Result<(), AppError> {
    let state = load_state(&args.state)?;
    let plot = crate::plot::render_spectrum_plot(&state, args.segment, args.width, args.height)?;
    println!("{plot}");
    Ok(())
}

/// Override how the atmosphere of `state` is obtained.
pub fn apply_atmo_method(state: &mut ModelState, method: Option<&str>) -> Result<(), AppError> {
    if let Some(raw) = method {
        state.atmo.method = raw.parse::<AtmoMethod>()?;
    }
    Ok(())
}

/// Optional CSV export and terminal plot after a command.
fn finish(state: &ModelState, export: Option<&Path>, plot: &PlotOpts) -> Result<(), AppError> {
    if let Some(path) = export {
        write_spectrum_csv(path, state)?;
    }
    if let Some(segment) = plot.plot {
        println!(
            "{}",
            crate::plot::render_spectrum_plot(state, segment, plot.width, plot.height)?
        );
    }
    Ok(())
}

pub fn demo_config_from_args(args: &DemoArgs) -> DemoConfig {
    DemoConfig {
        seed: args.seed,
        lines_per_segment: args.lines,
        teff: args.teff,
        logg: args.logg,
        monh: args.monh,
        vrad: args.vrad,
        resolution: args.resolution,
        snr: args.snr,
        ..DemoConfig::default()
    }
}

pub fn solve_options_from_args(args: &FitArgs, settings: &Settings) -> SolveOptions {
    SolveOptions {
        segments: (!args.segments.is_empty()).then(|| args.segments.clone()),
        filename: Some(args.out.clone().unwrap_or_else(|| args.state.clone())),
        max_nfev: args.max_nfev.or(settings.max_nfev),
        systematics: args.systematics,
    }
}

/// Logs fit progress and optionally redraws the plot.
pub struct ProgressObserver {
    every: usize,
    plot: PlotOpts,
}

impl ProgressObserver {
    pub fn new(every: usize, plot: PlotOpts) -> Self {
        Self {
            every: every.max(1),
            plot,
        }
    }
}

impl FitObserver for ProgressObserver {
    fn on_iteration(&mut self, iteration: usize, state: &ModelState) {
        if iteration % self.every != 0 {
            return;
        }
        let rv: Vec<String> = state.vrad.iter().map(|v| format!("{v:.2}")).collect();
        log::info!(
            "Iteration {iteration}: teff={:.1} logg={:.3} monh={:+.3} vrad=[{}]",
            state.teff,
            state.logg,
            state.monh,
            rv.join(", ")
        );
        if let Some(segment) = self.plot.plot {
            match crate::plot::render_spectrum_plot(state, segment, self.plot.width, self.plot.height) {
                Ok(txt) => eprintln!("{txt}"),
                Err(e) => log::warn!("{e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::Cli;

    #[test]
    fn fit_output_defaults_to_the_input_state() {
        let cli = Cli::try_parse_from(["specfit", "fit", "-s", "star.json", "-p", "teff", "--max-nfev", "7"]).unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        let settings = Settings {
            max_nfev: Some(50),
            ..Settings::default()
        };
        let opts = solve_options_from_args(&args, &settings);
        assert_eq!(opts.filename.as_deref(), Some(Path::new("star.json")));
        assert_eq!(opts.max_nfev, Some(7));
        assert!(opts.segments.is_none());
    }

    #[test]
    fn atmosphere_method_override_is_parsed() {
        let mut state = ModelState::new(
            vec![[5000.0, 5004.0]],
            crate::domain::LineList::default(),
            crate::domain::AtmosphereSpec::grid("grid.sav"),
        );
        apply_atmo_method(&mut state, None).unwrap();
        assert_eq!(state.atmo.method, AtmoMethod::Grid);

        apply_atmo_method(&mut state, Some("Embedded")).unwrap();
        assert_eq!(state.atmo.method, AtmoMethod::Embedded);

        let err = apply_atmo_method(&mut state, Some("routine")).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert_eq!(state.atmo.method, AtmoMethod::Embedded);
    }

    #[test]
    fn environment_cap_applies_without_flag() {
        let cli = Cli::try_parse_from(["specfit", "fit", "-s", "a.json", "-o", "b.json", "-p", "logg", "--segment", "0"])
            .unwrap();
        let Command::Fit(args) = cli.command else {
            panic!("expected fit");
        };
        let settings = Settings {
            max_nfev: Some(50),
            ..Settings::default()
        };
        let opts = solve_options_from_args(&args, &settings);
        assert_eq!(opts.filename.as_deref(), Some(Path::new("b.json")));
        assert_eq!(opts.max_nfev, Some(50));
        assert_eq!(opts.segments, Some(vec![0]));
    }
}
