//! predmaint - equipment failure classifier
//!
//! Trains, registers and persists the "verge of failing" classifier, and
//! scores new equipment logs with the published model.
//!
//! # Usage
//!
//! ```bash
//! # Full training run with ./pipeline_config.toml (or built-in defaults)
//! predmaint train
//!
//! # Score a batch with the model behind the configured alias
//! predmaint predict --input data/new.csv --output data/predictions.csv
//!
//! # Scheduler-style dispatch
//! predmaint task pipeline train
//! ```
//!
//! # Environment Variables
//!
//! - `PREDMAINT_CONFIG`: Path to the pipeline TOML file
//! - `PREDMAINT_DATA_SOURCE`, `PREDMAINT_REGISTRY_URI`, `PREDMAINT_ARTIFACT_ROOT`,
//!   `PREDMAINT_WORKERS`: Overrides applied after the file is loaded
//! - `RUST_LOG`: Logging level (default: info)

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};

use predmaint::config::{self, PipelineConfig};
use predmaint::ModelSource;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "predmaint")]
#[command(about = "Equipment failure classifier training pipeline")]
#[command(version)]
struct CliArgs {
    /// Pipeline config file (overrides PREDMAINT_CONFIG and ./pipeline_config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full training pipeline and print a summary
    Train,

    /// Score new records with the published model
    Predict {
        /// CSV to score (default: inference.input)
        #[arg(long)]
        input: Option<PathBuf>,
        /// Where to write predictions (default: inference.output)
        #[arg(long)]
        output: Option<PathBuf>,
        /// Load the model from the artifact store instead of the registry alias
        #[arg(long)]
        from_artifact: bool,
    },

    /// Run a named task of a named dag
    Task {
        dag: String,
        task: String,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

// ============================================================================
// Task Dispatch
// ============================================================================

/// Dag name accepted by `task`.
const PIPELINE_DAG: &str = "pipeline";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineTask {
    Train,
    Predict,
}

impl PipelineTask {
    fn lookup(name: &str) -> Option<Self> {
        match name {
            "train" => Some(Self::Train),
            "predict" => Some(Self::Predict),
            _ => None,
        }
    }
}

fn run_train(config: &PipelineConfig) -> Result<()> {
    let report = predmaint::train(config).context("Training run failed")?;
    println!("{report}");
    Ok(())
}

fn run_predict(
    config: &PipelineConfig,
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    from_artifact: bool,
) -> Result<()> {
    let input = input.unwrap_or_else(|| config.inference.input.clone());
    let output = output.unwrap_or_else(|| config.inference.output.clone());
    let source = if from_artifact {
        ModelSource::Artifact
    } else {
        ModelSource::Registry
    };
    let summary = predmaint::predict(config, &input, &output, source)
        .with_context(|| format!("Scoring {} failed", input.display()))?;
    println!("{summary}");
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<PipelineConfig> {
    match path {
        Some(path) => {
            let mut config = PipelineConfig::load_from_file(path)
                .with_context(|| format!("Loading config from {}", path.display()))?;
            config.apply_env_overrides();
            info!(path = %path.display(), model = %config.registry.model_name, "Loaded pipeline config");
            Ok(config)
        }
        None => Ok(PipelineConfig::load()),
    }
}

fn run(args: CliArgs) -> Result<ExitCode> {
    config::init(load_config(args.config.as_ref())?);
    let config = config::get();

    match args.command {
        Command::Train => run_train(config)?,
        Command::Predict {
            input,
            output,
            from_artifact,
        } => run_predict(config, input, output, from_artifact)?,
        Command::Task { dag, task } => {
            if dag != PIPELINE_DAG {
                eprintln!("Dag not found");
                return Ok(ExitCode::FAILURE);
            }
            match PipelineTask::lookup(&task) {
                Some(PipelineTask::Train) => run_train(config)?,
                Some(PipelineTask::Predict) => run_predict(config, None, None, false)?,
                None => {
                    eprintln!("Task not found");
                    return Ok(ExitCode::FAILURE);
                }
            }
        }
        Command::ShowConfig => {
            print!("{}", config.to_toml().context("Serializing config")?);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = CliArgs::parse();
    init_logging(args.log_format);

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "predmaint failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
