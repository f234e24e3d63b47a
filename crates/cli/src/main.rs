use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tapeflow_core::EngineConfig;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "tapeflow")]
#[command(about = "Tape-reading trading engine — order-flow signals over a live or simulated feed")]
#[command(version)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine and the dashboard API server
    Run {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::Config => {
            let toml = toml::to_string_pretty(&EngineConfig::default())?;
            print!("{toml}");
            Ok(())
        }
    }
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    // An invalid configuration is the only fatal startup path.
    let config = match config_path {
        Some(path) => EngineConfig::load(&path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let config = EngineConfig::default();
            config
                .validate()
                .context("default configuration is invalid")?;
            config
        }
    };

    let bind = config.api_bind.clone();
    let handle = tapeflow_engine::start(config).context("starting engine")?;

    tapeflow_api::start_server(handle, &bind).await
}
