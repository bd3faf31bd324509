use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

mod client;
mod config;
mod data_source;
mod definition;
mod error;
mod generation;
mod models;
mod output;
mod poll;
mod runner;
mod workflow;

use crate::client::ProjectClient;
use crate::config::{EvaluatorsFile, Settings};
use crate::generation::{AgentGenerator, ModelGenerator, ResponseGenerator};
use crate::output::OutputFormat;
use crate::poll::{PollPolicy, TokioWaiter};
use crate::runner::{DatasetInput, RunOptions, Runner};

/// Project evaluation CLI - submit evaluation runs to a hosted project and collect the scores
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// TOML file replacing the built-in evaluators
    #[arg(long, global = true)]
    evaluators: Option<PathBuf>,

    /// Directory for the results artifact
    #[arg(long, global = true, default_value = ".")]
    output_dir: PathBuf,

    /// Seconds between run status checks
    #[arg(long, global = true, default_value_t = 5)]
    poll_interval_secs: u64,

    /// Give up after this many status checks (default: wait for a terminal status)
    #[arg(long, global = true)]
    max_polls: Option<u32>,

    /// Report format: plain or json
    #[arg(short, long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Dotenv file to load before reading the environment
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Verbose output - log every remote call
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a dataset file held by the project
    Batch {
        /// Id of an already uploaded dataset
        #[arg(long, conflicts_with = "dataset_path", required_unless_present = "dataset_path")]
        dataset_id: Option<String>,

        /// Local JSONL file to upload first
        #[arg(long)]
        dataset_path: Option<PathBuf>,
    },
    /// Generate answers for a ground-truth file, then evaluate them inline
    Rag {
        /// JSONL file of {"query", "ground_truth"} records
        records: PathBuf,

        /// What answers the queries
        #[arg(long, value_enum, default_value = "agent")]
        generator: GeneratorKind,

        /// Milliseconds to wait before each generation call
        #[arg(long, default_value_t = 2000)]
        row_delay_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GeneratorKind {
    /// The agent named by AZURE_AI_AGENT_NAME
    Agent,
    /// The model deployment named by AZURE_AI_AGENT_DEPLOYMENT_NAME
    Model,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    config::load_env_file(args.env_file.as_deref())?;
    let settings = Settings::from_env()?;

    let mut options = RunOptions::new(&settings.deployment_name);
    options.output_dir = args.output_dir.clone();
    options.poll = PollPolicy {
        interval: Duration::from_secs(args.poll_interval_secs),
        max_polls: args.max_polls,
    };
    if let Some(path) = &args.evaluators {
        options.evaluators = Some(EvaluatorsFile::from_file(path)?);
    }

    let report = match args.command {
        Command::Batch {
            dataset_id,
            dataset_path,
        } => {
            let dataset = match (dataset_id, dataset_path) {
                (Some(id), _) => DatasetInput::Existing(id),
                (None, Some(path)) => DatasetInput::Upload(path),
                (None, None) => anyhow::bail!("either --dataset-id or --dataset-path is required"),
            };

            let client = ProjectClient::new(&settings)?;
            Runner::new(&client, &TokioWaiter, options)
                .run_batch(&dataset)
                .await
                .context("Batch evaluation failed")?
        }
        Command::Rag {
            records,
            generator,
            row_delay_ms,
        } => {
            options.row_delay = Duration::from_millis(row_delay_ms);
            let records = data_source::read_records(&records)?;
            if matches!(generator, GeneratorKind::Agent) {
                settings.require_agent_name()?;
            }

            let client = ProjectClient::new(&settings)?;
            let generator: Box<dyn ResponseGenerator + '_> = match generator {
                GeneratorKind::Agent => {
                    Box::new(AgentGenerator::new(&client, settings.require_agent_name()?))
                }
                GeneratorKind::Model => Box::new(ModelGenerator::new(&settings)?),
            };

            Runner::new(&client, &TokioWaiter, options)
                .run_rag(&records, generator.as_ref())
                .await
                .context("RAG evaluation failed")?
        }
    };

    output::print_report(&report, args.format);

    Ok(())
}
