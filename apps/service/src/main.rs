use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use logger::{LevelFilter, LogFormat};
use tracing::{info, warn};

use monitor_bee::config::Config;
use monitor_bee::database::initialize_pool;
use monitor_bee::pool::open_local;
use monitor_bee::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// Schedule monitors until interrupted
    #[default]
    Run,
    /// Apply database migrations and exit
    Migrate,
    /// Print the effective configuration
    ShowConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_config(args.config.as_ref())?;

    let command = args.command.unwrap_or_default();
    if let Command::ShowConfig = command {
        println!("{config}");
        return Ok(());
    }

    init_logging(&config);

    if let Some(parent) = config.database.path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create database directory {}", parent.display()))?;
    }
    let pool = open_local(&config.database.path, config.database.max_connections).await?;

    match command {
        Command::Migrate => {
            initialize_pool(&pool).await?;
            info!("Migrations applied to {}", config.database.path.display());
        }
        Command::Run => run(config, pool).await?,
        Command::ShowConfig => {}
    }

    Ok(())
}

async fn run(config: Config, pool: monitor_bee::pool::LibsqlPool) -> anyhow::Result<()> {
    info!(database = %config.database.path.display(), "Starting monitor-bee");

    let supervisor = Supervisor::new(config, pool).await?;
    supervisor.start().await?;

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    supervisor.shutdown().await;
    Ok(())
}

fn init_logging(config: &Config) {
    let level = config.logging.level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    let configured = config.logging.format.parse::<LogFormat>();

    // RUST_LOG_FORMAT wins over the file, like RUST_LOG does for the level
    let format = match std::env::var_os("RUST_LOG_FORMAT") {
        Some(_) => None,
        None => configured.clone().ok(),
    };

    if let Err(e) = logger::init(level, format) {
        eprintln!("Failed to initialize logging: {e}");
        return;
    }

    if let Err(e) = configured {
        warn!("Ignoring logging.format: {e}");
    }
}
