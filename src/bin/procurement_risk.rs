//! Procurement risk CLI
//!
//! Usage:
//!   cargo run --bin procurement_risk -- run \
//!     --config config/pipeline.yaml \
//!     --procurements data/awards.csv \
//!     --candidates data/orbis_companies.csv \
//!     --shareholders data/orbis_shareholders.csv \
//!     --subsidiaries data/orbis_subsidiaries.csv \
//!     --jurisdiction GB
//!
//!   cargo run --bin procurement_risk -- resolve \
//!     --procurements data/awards.csv --candidates data/orbis_companies.csv \
//!     --output output/matches.csv
//!
//!   cargo run --bin procurement_risk -- summary --jurisdiction GB

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use procurement_risk::pipeline::{latest_summary, resolve_only};
use procurement_risk::screening::{HttpScreeningClient, Screener};
use procurement_risk::{Pipeline, PipelineConfig, PipelineInputs};

/// Default configuration path
const DEFAULT_CONFIG_PATH: &str = "config/pipeline.yaml";

#[derive(Parser, Debug)]
#[command(name = "procurement_risk")]
#[command(about = "Link procurement winners to ownership networks and rank contracts by urgency")]
struct Cli {
    /// Pipeline configuration file
    #[arg(long, short = 'c', global = true, env = "PROCUREMENT_RISK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every stage and write snapshots and reports
    Run {
        #[command(flatten)]
        inputs: InputArgs,

        /// Jurisdictions to process (default: all in the procurement table)
        #[arg(long, short = 'j')]
        jurisdiction: Vec<String>,

        /// Skip screening and keep risk scores from earlier snapshots
        #[arg(long)]
        no_screening: bool,
    },

    /// Resolve winners only and write the match table
    Resolve {
        #[command(flatten)]
        inputs: InputArgs,

        /// Match table path
        #[arg(long, short = 'o', default_value = "output/matches.csv")]
        output: PathBuf,
    },

    /// Print the summary of the latest snapshot
    Summary {
        #[arg(long, short = 'j')]
        jurisdiction: String,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// Contract award table
    #[arg(long, short = 'p')]
    procurements: PathBuf,

    /// Company register tables (repeatable, searched in order)
    #[arg(long, required = true)]
    candidates: Vec<PathBuf>,

    #[arg(long)]
    shareholders: Option<PathBuf>,

    #[arg(long)]
    subsidiaries: Option<PathBuf>,
}

impl From<InputArgs> for PipelineInputs {
    fn from(args: InputArgs) -> Self {
        PipelineInputs {
            procurements: args.procurements,
            candidates: args.candidates,
            shareholders: args.shareholders,
            subsidiaries: args.subsidiaries,
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            PipelineConfig::from_file(Path::new(DEFAULT_CONFIG_PATH))
                .with_context(|| format!("Failed to load config {}", DEFAULT_CONFIG_PATH))
        }
        None => {
            tracing::info!("No config file, using defaults");
            let mut config = PipelineConfig::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "procurement_risk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run {
            inputs,
            jurisdiction,
            no_screening,
        } => {
            let inputs = PipelineInputs::from(inputs);
            let screener = if config.screening.enabled && !no_screening {
                let client = HttpScreeningClient::from_config(&config.screening)
                    .context("Failed to create screening client")?;
                tracing::info!(url = %client.base_url(), "Screening enabled");
                Some(Screener::new(client, config.screening.clone()))
            } else {
                None
            };

            let report = Pipeline::new(&config, screener.as_ref())
                .run(&inputs, &jurisdiction)
                .await?;
            print!("{}", report);
        }
        Command::Resolve { inputs, output } => {
            let accounting = resolve_only(&config, &PipelineInputs::from(inputs), &output)?;
            println!(
                "Resolved {} rows: {} matched, {} unmatched, {} errored -> {}",
                accounting.total,
                accounting.matched,
                accounting.unmatched,
                accounting.errored,
                output.display()
            );
        }
        Command::Summary { jurisdiction } => match latest_summary(&config, &jurisdiction)? {
            Some((entry, summary, integrity)) => {
                println!("Snapshot {} ({})", entry.path.display(), entry.stage);
                print!("{}", summary);
                print!("{}", integrity);
            }
            None => println!("No snapshots for {}", jurisdiction.to_uppercase()),
        },
    }

    Ok(())
}
