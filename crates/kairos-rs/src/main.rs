//! `kairos`: run the proactive assistant.

use anyhow::Context;
use clap::{Parser, Subcommand};
use kairos_rs::config::{KairosConfig, LayeredConfigOptions};
use kairos_rs::server::App;
use log::{debug, info};
use std::path::PathBuf;

/// Command-line options for the assistant.
#[derive(Parser)]
#[command(name = "kairos", version)]
struct Cli {
    /// Extra kairos.json5 files applied on top of the user and cwd layers
    #[arg(long = "config", value_name = "FILE")]
    configs: Vec<PathBuf>,
    /// Directory used for the cwd layer and relative paths
    #[arg(long)]
    cwd: Option<PathBuf>,
    /// Override storage.data_dir
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Ignore KAIROS_* environment overrides
    #[arg(long)]
    no_env: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Serve webhooks and run the heartbeat (default)
    Serve,
    /// Print the status snapshot
    Status,
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kairos_rs::init_logging();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            let app = App::build(config).context("failed to start assistant")?;
            app.serve().await
        }
        Command::Status => {
            let app = App::build(config).context("failed to open assistant state")?;
            let rendered = app.status.render().context("failed to render status")?;
            println!("{rendered}");
            Ok(())
        }
        Command::Config => {
            let json =
                serde_json::to_string_pretty(&config).context("failed to serialize config")?;
            println!("{json}");
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<KairosConfig> {
    let cwd = match cli.cwd.as_ref() {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("failed to resolve current working directory")?,
    };
    info!(
        "loading layered config (cwd={}, runtime_layers={}, env={})",
        cwd.display(),
        cli.configs.len(),
        !cli.no_env
    );
    let mut options = LayeredConfigOptions::new(&cwd);
    for path in &cli.configs {
        options = options.with_runtime_path(path);
    }
    if cli.no_env {
        options = options.without_env();
    }
    let layered =
        KairosConfig::load_layered_with_options(options).context("failed to load config")?;
    debug!("layered config loaded (layers={})", layered.layers.len());

    let mut config = layered.config;
    if let Some(data_dir) = cli.data_dir.as_ref() {
        config.storage.data_dir = data_dir.clone();
        config.resolve_paths(&cwd);
    }
    Ok(config)
}
