//! CLI entry point for cloudsight.
//!
//! Reads a JSON array of resource records from a file (or stdin) and writes
//! the requested analysis as JSON to stdout. Logs go to stderr.

use std::io::Read;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

use cloudsight_core::{AnalysisConfig, Resource};
use cloudsight_engine::{read_resources, AnalysisEngine, ReportEnvelope, Watcher};

#[derive(Parser)]
#[command(name = "cloudsight")]
#[command(about = "Network topology, traffic, and security posture analysis for cloud infrastructure")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file prefix (default: cloudsight).
    #[arg(short, long, default_value = "cloudsight", global = true)]
    config: String,

    /// Posture rule table (TOML), replacing the built-in rules.
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    /// Score and simulate on a single thread.
    #[arg(long, global = true)]
    sequential: bool,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    log_json: bool,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Args)]
struct InputArgs {
    /// Resources JSON file (stdin when omitted).
    #[arg(short, long)]
    input: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Full analysis: topology, flows, posture, summary, and fingerprint.
    Analyze(InputArgs),
    /// Reconstructed network topology only.
    Topology(InputArgs),
    /// Simulated traffic flows only.
    Flows(InputArgs),
    /// Per-resource posture and summary only.
    Posture(InputArgs),
    /// Re-run the full analysis whenever the input file changes.
    Watch {
        /// Resources JSON file to watch.
        #[arg(short, long)]
        input: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = AnalysisConfig::load(&cli.config)?;
    if let Some(rules) = &cli.rules {
        config.rules_file = Some(rules.display().to_string());
    }
    if cli.sequential {
        config.parallel = false;
    }
    let engine = AnalysisEngine::new(config)?;

    match &cli.command {
        Command::Analyze(args) => {
            let envelope = engine.analyze_async(load_input(args)?).await?;
            emit(&envelope, cli.pretty)?;
        }
        Command::Topology(args) => emit(&engine.topology(load_input(args)?)?, cli.pretty)?,
        Command::Flows(args) => emit(&engine.flows(load_input(args)?)?, cli.pretty)?,
        Command::Posture(args) => emit(&engine.posture(load_input(args)?)?, cli.pretty)?,
        Command::Watch { input } => {
            let pretty = cli.pretty;
            Watcher::new(engine, input.clone())
                .run(move |envelope: ReportEnvelope| {
                    if let Err(e) = emit(&envelope, pretty) {
                        tracing::error!(error = %e, "Failed to write report");
                    }
                })
                .await?;
        }
    }

    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_input(args: &InputArgs) -> anyhow::Result<Vec<Resource>> {
    match &args.input {
        Some(path) => Ok(read_resources(path)?),
        None => {
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;
            Ok(cloudsight_core::parse_resources(&input)?)
        }
    }
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> anyhow::Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{json}");
    Ok(())
}
