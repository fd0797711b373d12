//! Command-line front end for fault tree risk analysis

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tracing::info;

use canopy_analysis::{
    fault_tree::{top_gates, FaultTreeAnalysis},
    probability, report, uncertainty, AnalysisError, Approximation, UncertaintyConfig,
};
use canopy_input::InputError;

/// Probabilistic risk analysis for fault trees
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input file with the fault tree description
    #[arg(short, long, value_name = "FILE")]
    input_file: Option<PathBuf>,

    /// File with probabilities for events
    #[arg(short, long, value_name = "FILE")]
    prob_file: Option<PathBuf>,

    /// Build and validate the model without running analyses
    #[arg(short, long)]
    graph_only: bool,

    /// Top-event probability approximation
    #[arg(long, default_value = "exact", value_name = "MODE")]
    approximation: String,

    /// Number of Monte Carlo trials; 0 disables uncertainty analysis
    #[arg(long, default_value_t = 1000)]
    trials: u32,

    /// Seed for the Monte Carlo sampler
    #[arg(long)]
    seed: Option<u64>,

    /// Write the report here instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Positional alternative to --input-file and --prob-file
    #[arg(value_name = "INPUT", num_args = 0..=2)]
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(classify(&err))
        }
    }
}

/// Exit codes: 1 validation failure, 2 i/o failure, 3 internal error.
fn classify(err: &anyhow::Error) -> u8 {
    if let Some(input) = err.downcast_ref::<InputError>() {
        return match input {
            InputError::Io(_) | InputError::Xml(_) => 2,
            InputError::Malformed(_) | InputError::Model(_) => 1,
        };
    }
    if err.downcast_ref::<canopy_model::ModelError>().is_some() {
        return 1;
    }
    if let Some(analysis) = err.downcast_ref::<AnalysisError>() {
        return match analysis {
            AnalysisError::Model(_)
            | AnalysisError::MissingProbability(_)
            | AnalysisError::NoTopGate => 1,
            AnalysisError::InvalidSettings(_) => 3,
        };
    }
    if err.downcast_ref::<std::io::Error>().is_some() {
        return 2;
    }
    3
}

fn run(cli: Cli) -> Result<()> {
    let mut positional = cli.files.into_iter();
    let input = match cli.input_file.or_else(|| positional.next()) {
        Some(path) => path,
        None => {
            return Err(anyhow!(InputError::Io(
                "an input file with the fault tree description is required".into()
            )))
        }
    };
    let probabilities = cli.prob_file.or_else(|| positional.next());

    let approximation = Approximation::parse(&cli.approximation).ok_or_else(|| {
        anyhow!(InputError::Malformed(format!(
            "unknown approximation '{}'",
            cli.approximation
        )))
    })?;

    let mut model = canopy_input::read_files(&input, probabilities.as_deref())?;
    model.validate()?;
    model.apply_ccf()?;

    if cli.graph_only {
        info!("model built and validated; analyses skipped");
        return Ok(());
    }

    // Every fault tree contributes one top event; analyze each of them.
    let tops = top_gates(&model);
    if tops.is_empty() {
        return Err(AnalysisError::NoTopGate.into());
    }
    let config = UncertaintyConfig {
        trials: cli.trials,
        seed: cli.seed,
        ..UncertaintyConfig::default()
    };
    let mut analyses = Vec::with_capacity(tops.len());
    let mut prob_results = Vec::with_capacity(tops.len());
    let mut uncertainty_results = Vec::with_capacity(tops.len());
    for top in tops {
        let analysis = FaultTreeAnalysis::new(&model, top)?;
        prob_results.push(probability::analyze(&model, &analysis, approximation)?);
        uncertainty_results.push(if cli.trials > 0 {
            Some(uncertainty::analyze(&model, &analysis, &config)?)
        } else {
            None
        });
        analyses.push(analysis);
    }

    let results: Vec<report::TreeResults<'_>> = analyses
        .iter()
        .zip(&prob_results)
        .zip(&uncertainty_results)
        .map(|((analysis, probability), uncertainty)| report::TreeResults {
            analysis,
            probability: Some(probability),
            uncertainty: uncertainty.as_ref(),
        })
        .collect();
    let xml = report::render(&model, &results);
    match cli.output {
        Some(path) => {
            fs::write(&path, xml).with_context(|| format!("writing report to {}", path.display()))?
        }
        None => print!("{}", xml),
    }
    Ok(())
}
