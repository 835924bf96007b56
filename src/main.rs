//! Calibration cache administration tool.
//!
//! Small operator CLI around the engine: report cached table versions, run
//! one synchronous reconciliation cycle against the configured service, or
//! wipe the cache for a forced full resync.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use smartgcal::cache::CalibrationFileCache;
use smartgcal::config::Settings;
use smartgcal::registry::CalibrationRegistry;
use smartgcal::repository::{BundledRepository, RemoteRepository};
use smartgcal::updater::CalibrationUpdater;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "smartgcal", about = "Smart calibration cache administration")]
struct Cli {
    /// Path to a settings file (defaults to config/smartgcal.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show the cached version of every known calibration table
    Status,
    /// Run one reconciliation cycle against the remote service
    Update,
    /// Delete every cached file, forcing a full resync
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("could not load settings")?;
    let registry = Arc::new(
        CalibrationRegistry::load_dir(&settings.cache.instruments).with_context(|| {
            format!(
                "could not load instrument descriptions from {}",
                settings.cache.instruments.display()
            )
        })?,
    );
    if registry.is_empty() {
        anyhow::bail!(
            "no instrument descriptions found in {}",
            settings.cache.instruments.display()
        );
    }

    let cache = Arc::new(
        CalibrationFileCache::new(
            &settings.cache.path,
            registry.clone(),
            Arc::new(BundledRepository::new()),
        )
        .context("could not open calibration cache")?,
    );

    let updater = CalibrationUpdater::new(registry);
    let remote = Arc::new(RemoteRepository::new(&settings.remote)?);
    updater.configure(cache.clone(), remote, settings.update.interval);

    match cli.command {
        Command::Status => {
            println!(
                "last reconciliation attempt: {}",
                cache.last_update_timestamp().to_rfc3339()
            );
            for info in updater.version_info().await {
                let version = info
                    .version
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}_{}: {}", info.instrument, info.calibration_type, version);
            }
        }
        Command::Update => {
            let event = updater.update_now().await?;
            if event.is_empty() {
                println!("all calibration tables are up to date");
            }
            for name in &event.updated {
                println!("updated {}", name);
            }
            for name in &event.failed {
                println!("failed  {}", name);
            }
            if !event.failed.is_empty() {
                std::process::exit(1);
            }
        }
        Command::Clear => {
            cache.clear().context("could not clear cache")?;
            println!("cache cleared: {}", cache.cache_dir().display());
        }
    }
    Ok(())
}
