use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kilofly_cli::cli::{print_event, run_script, CliConfig, Script};
use kilofly_core::tracing_setup::{init_tracing, LOG_FILE_ENV};
use kilofly_core::TrustLevel;

#[derive(Parser)]
#[command(name = "kilofly-cli")]
#[command(about = "Drive KiloFly live counts against an in-memory change feed")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, short, global = true)]
    pretty: bool,

    /// Path to JSON config file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON script and print every core event
    Simulate {
        /// Script file (seed rows and steps)
        script: PathBuf,
    },

    /// Print the trust level for a score
    Level {
        score: u32,
    },

    /// Print the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = CliConfig::resolve(cli.config.as_deref())?;

    if let Some(ref log_file) = config.log_file {
        if std::env::var_os(LOG_FILE_ENV).is_none() {
            std::env::set_var(LOG_FILE_ENV, log_file);
        }
    }
    init_tracing().context("Failed to initialize logging")?;

    match cli.command {
        Commands::Simulate { script } => {
            let script = Script::load(&script)?;
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            let summary = runtime.block_on(run_script(&script, &config, |event| {
                print_event(event, cli.pretty)
            }))?;
            print_event(&summary, cli.pretty)
        }
        Commands::Level { score } => {
            let level = TrustLevel::from_score(score);
            print_event(
                &serde_json::json!({
                    "score": score,
                    "level": level,
                    "label": level.label(),
                    "icon": level.icon(),
                }),
                cli.pretty,
            )
        }
        Commands::Config => {
            println!("{}", config.to_json(cli.pretty)?);
            Ok(())
        }
    }
}
