//! Command-line parsing for the spectral synthesis and fitting tool.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the synthesis/fitting code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{CscaleFlag, VradFlag};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "specfit", version, about = "Stellar spectrum synthesis and parameter fitting")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate a noisy synthetic observation with a known answer.
    Demo(DemoArgs),
    /// Synthesize the spectrum of a saved model state.
    Synth(SynthArgs),
    /// Fit stellar parameters of a saved model state to its observation.
    Fit(FitArgs),
    /// Plot observed and synthetic flux of a saved model state.
    Plot(PlotArgs),
}

/// Terminal plot options shared by all commands.
#[derive(Debug, Args, Clone)]
pub struct PlotOpts {
    /// Render an ASCII plot of this segment.
    #[arg(long)]
    pub plot: Option<usize>,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}

#[derive(Debug, Parser, Clone)]
pub struct DemoArgs {
    /// Where to write the observation state (JSON).
    #[arg(short = 'o', long, value_name = "JSON")]
    pub out: PathBuf,

    /// Random seed for lines and noise.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Lines per segment.
    #[arg(long, default_value_t = 6)]
    pub lines: usize,

    /// Signal-to-noise ratio of the observation.
    #[arg(long, default_value_t = 200.0)]
    pub snr: f64,

    /// Injected radial velocity (km/s).
    #[arg(long, default_value_t = 12.0, allow_hyphen_values = true)]
    pub vrad: f64,

    #[arg(long, default_value_t = 5600.0)]
    pub teff: f64,

    #[arg(long, default_value_t = 4.2)]
    pub logg: f64,

    #[arg(long, default_value_t = -0.2, allow_hyphen_values = true)]
    pub monh: f64,

    /// Resolving power of the simulated instrument.
    #[arg(long, default_value_t = 60000.0)]
    pub resolution: f64,

    /// Also write the spectrum as CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    #[command(flatten)]
    pub plot: PlotOpts,
}

#[derive(Debug, Parser, Clone)]
pub struct SynthArgs {
    /// Model state to synthesize (JSON snapshot).
    #[arg(short = 's', long, value_name = "JSON")]
    pub state: PathBuf,

    /// Where to write the updated state (defaults to overwriting the input).
    #[arg(short = 'o', long, value_name = "JSON")]
    pub out: Option<PathBuf>,

    /// Segments to synthesize (repeatable; all when omitted).
    #[arg(long = "segment")]
    pub segments: Vec<usize>,

    /// Atmosphere source: `grid` or `embedded`.
    #[arg(long, value_name = "METHOD")]
    pub atmo_method: Option<String>,

    /// Write the spectrum as CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    #[command(flatten)]
    pub plot: PlotOpts,
}

#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Model state with an observation (JSON snapshot).
    #[arg(short = 's', long, value_name = "JSON")]
    pub state: PathBuf,

    /// Parameter to fit (repeatable): teff, logg, monh, vmic, vmac, vsini,
    /// `<El> abund`, or the switches `vrad` and `cont`.
    #[arg(short = 'p', long = "param", required = true)]
    pub params: Vec<String>,

    /// Where to write the fitted state (defaults to overwriting the input).
    #[arg(short = 'o', long, value_name = "JSON")]
    pub out: Option<PathBuf>,

    /// Segments to fit (repeatable; all when omitted).
    #[arg(long = "segment")]
    pub segments: Vec<usize>,

    /// Maximum residual evaluations (overrides SPECFIT_MAX_NFEV).
    #[arg(long)]
    pub max_nfev: Option<usize>,

    /// Radial velocity mode.
    #[arg(long, value_enum)]
    pub vrad_flag: Option<VradFlag>,

    /// Continuum correction mode.
    #[arg(long, value_enum)]
    pub cscale_flag: Option<CscaleFlag>,

    /// Atmosphere source: `grid` or `embedded`.
    #[arg(long, value_name = "METHOD")]
    pub atmo_method: Option<String>,

    /// Store per-point line data systematics in the state.
    #[arg(long)]
    pub systematics: bool,

    /// Write the fitted spectrum as CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,

    /// Log progress every N iterations.
    #[arg(long, default_value_t = 1)]
    pub progress_every: usize,

    #[command(flatten)]
    pub plot: PlotOpts,
}

#[derive(Debug, Parser, Clone)]
pub struct PlotArgs {
    /// Model state to plot (JSON snapshot).
    #[arg(short = 's', long, value_name = "JSON")]
    pub state: PathBuf,

    /// Segment to plot.
    #[arg(long, default_value_t = 0)]
    pub segment: usize,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,
}
