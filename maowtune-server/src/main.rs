use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use maowtune_core::config::PlayerConfig;
use maowtune_core::converter::ConversionEngine;

mod commands;

#[derive(Parser, Debug, Clone)]
#[command(name = "maowtune")]
#[command(author, version, about = "maowtune - guild voice playback core tools")]
struct Args {
    /// Path to the JSON config. Created with defaults if missing.
    #[arg(long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug, Clone)]
enum CliCommand {
    /// Locate the transcoder and print which binary will be used
    Check,
    /// Print artist, title and duration of a file or URL
    Probe {
        /// File path or http(s) URL
        input: String,
    },
    /// Convert a file or URL to Opus-in-Ogg
    Convert {
        /// File path or http(s) URL
        input: String,
        /// Where to write the converted stream
        output: PathBuf,
    },
}

fn init_tracing() {
    let filter = EnvFilter::from_default_env()
        .add_directive("maowtune=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(sub) {
        eprintln!("Failed to set global subscriber: {e}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();
    let args = Args::parse();

    let config_path = PlayerConfig::resolve_path(args.config.as_deref());
    let config = PlayerConfig::load_or_create(&config_path)?;
    info!("maowtune starting with config {}", config_path.display());

    let engine = ConversionEngine::new(config.transcoder.clone());
    let command = match engine.initialize().await {
        Ok(cmd) => cmd,
        Err(e) => {
            error!("{e}");
            return Err(e.into());
        }
    };

    match args.command {
        CliCommand::Check => commands::check(&command),
        CliCommand::Probe { input } => commands::probe(&engine, &input).await?,
        CliCommand::Convert { input, output } => {
            commands::convert(&engine, &input, &output).await?
        }
    }

    info!("Main finished. Goodbye!");
    Ok(())
}
