use std::env;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use rollcall::{config, directory::DirectoryClient, session};

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(version, about = "Face-recognition attendance camera client")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync the roster and run the camera attendance loop
    Run,
    /// Fetch the identity roster once and report its health
    Sync,
    /// Open config file in editor
    Config,
}

fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(None)?;

    match cli.command {
        Commands::Run => session::run(cfg),
        Commands::Sync => sync(&cfg),
        Commands::Config => open_config(),
    }
}

fn sync(cfg: &config::Config) -> Result<()> {
    let roster = DirectoryClient::new(&cfg.directory_url).sync();
    info!(
        "Directory has {} identities with {} reference embeddings",
        roster.distinct_identities(),
        roster.len()
    );
    Ok(())
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_os_str();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {:?}", config_path);

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
