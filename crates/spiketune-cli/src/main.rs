//! # SpikeTune CLI
//!
//! Command-line interface for analysing recordings and fitting models.
//!
//! ```bash
//! # Features of a recording (seconds, volts)
//! spiketune analyse trace.csv --start 100 --end 900 --smooth
//!
//! # Phase-plane density error against a reference recording
//! spiketune analyse model.csv --reference target.csv --dvdt-threshold 2
//!
//! # Run a fit described by a JSON configuration
//! spiketune fit demos/sine_fit.json --output result.json
//!
//! # Feature vocabulary
//! spiketune features
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use spiketune_analysis::{load_csv_data, IClampAnalysis, Smoothing};
use spiketune_core::{AnalysisVar, AnalysisWindow, Feature};
use spiketune_tuner::FitConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "spiketune")]
#[command(author, version, about = "Fit neuron models to spiking voltage traces", long_about = None)]
struct Cli {
    /// Logging verbosity level
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the features of a recorded trace
    Analyse {
        /// Two-column file, seconds and volts
        csv: PathBuf,
        /// Analysis start (ms)
        #[arg(long, default_value_t = 0.0)]
        start: f64,
        /// Analysis end (ms); end of the recording when omitted
        #[arg(long)]
        end: Option<f64>,
        /// Minimum peak prominence (mV)
        #[arg(long, default_value_t = 0.0)]
        delta: f64,
        /// Spike width baseline (mV)
        #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
        baseline: f64,
        /// Ignore peaks below this voltage (mV)
        #[arg(long, allow_negative_numbers = true)]
        peak_threshold: Option<f64>,
        /// Phase-plane samples at or below this dV/dt are ignored (mV/ms)
        #[arg(long)]
        dvdt_threshold: Option<f64>,
        /// Reference recording for the phase-plane density error
        #[arg(long)]
        reference: Option<PathBuf>,
        /// Smooth with an 11-sample hanning window first
        #[arg(long)]
        smooth: bool,
        /// Print the features as JSON
        #[arg(long)]
        json: bool,
    },

    /// Optimize model parameters against targets
    Fit {
        /// JSON fit configuration
        config: PathBuf,
        /// Write the result as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the feature vocabulary
    Features,
}

fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn analyse(
    csv: PathBuf,
    window: AnalysisWindow,
    analysis_var: AnalysisVar,
    reference: Option<PathBuf>,
    smooth: bool,
    json: bool,
) -> anyhow::Result<()> {
    let trace = load_csv_data(&csv).with_context(|| format!("loading {}", csv.display()))?;
    info!(samples = trace.len(), "loaded {}", csv.display());

    let smoothing = smooth.then(Smoothing::default);
    let mut analysis = IClampAnalysis::new(&trace, &window, analysis_var, smoothing)
        .context("preparing trace for analysis")?;
    if let Some(path) = reference {
        let reference =
            load_csv_data(&path).with_context(|| format!("loading {}", path.display()))?;
        analysis = analysis.with_reference(Arc::new(reference));
    }

    let spikes = analysis.turning_points().maxima_number();
    let Some(features) = analysis.analyse().context("computing features")? else {
        bail!("{} spikes found, at least 3 are needed for analysis", spikes);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(features)?);
        return Ok(());
    }

    println!("{} {}", "Features of".green().bold(), csv.display());
    println!();
    for (feature, value) in features.iter() {
        println!(
            "  {:<28} {:>14.6} {}",
            feature.name().cyan(),
            value,
            feature.units()
        );
    }
    Ok(())
}

fn fit(config_path: PathBuf, output: Option<PathBuf>) -> anyhow::Result<()> {
    let config = FitConfig::load(&config_path)
        .with_context(|| format!("reading fit configuration {}", config_path.display()))?;
    let parameters = config.evaluator.parameters.clone();

    println!(
        "{} {} parameters, {} evaluations",
        "Fitting".green().bold(),
        parameters.len(),
        config.optimizer.max_evaluations
    );

    let progress = ProgressBar::new(config.optimizer.max_evaluations as u64);
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} evaluations {msg}",
        )?
        .progress_chars("#>-"),
    );

    let bar = progress.clone();
    let result = config.run(move |stats| {
        bar.set_position(stats.evaluations as u64);
        bar.set_message(format!("best {:.6}", stats.best));
    })?;
    progress.finish_and_clear();

    println!(
        "{} fitness {:.6} after {} evaluations",
        "Best candidate:".green().bold(),
        result.best_fitness,
        result.evaluations
    );
    for (name, value) in parameters.iter().zip(&result.best_candidate) {
        println!("  {:<16} {}", name.cyan(), value);
    }

    if let Some(path) = output {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
        println!("{} {}", "Result written to".green(), path.display());
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Analyse {
            csv,
            start,
            end,
            delta,
            baseline,
            peak_threshold,
            dvdt_threshold,
            reference,
            smooth,
            json,
        } => {
            let window = AnalysisWindow { start, end };
            let analysis_var = AnalysisVar {
                peak_delta: delta,
                baseline,
                dvdt_threshold,
                peak_threshold,
            };
            analyse(csv, window, analysis_var, reference, smooth, json)?;
        }

        Commands::Fit { config, output } => fit(config, output)?,

        Commands::Features => {
            println!("{}", "Trace features:".green().bold());
            println!();
            for feature in Feature::ALL {
                let units = match feature.units() {
                    "" => String::new(),
                    u => format!("({})", u),
                };
                println!("  {:<28} {}", feature.name().cyan(), units);
            }
        }
    }

    Ok(())
}
