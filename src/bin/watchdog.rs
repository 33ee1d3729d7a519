//! Keeps the programs listed in the `[watchdog]` config running.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use updater::config::UpdaterConfig;
use updater::watchdog::{WatchExit, Watchdog};
use updater::logging;

/// Supervise a set of programs, restarting them when they exit.
#[derive(Parser)]
#[command(name = "saorsa-watchdog", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// App name; locates the default config file when --config is absent.
    #[arg(long)]
    app_name: Option<String>,

    /// Log to daily files in this directory instead of stderr.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = match (&cli.config, &cli.app_name) {
        (Some(path), _) => path.clone(),
        (None, Some(app_name)) => UpdaterConfig::default_config_path(app_name)
            .ok_or_else(|| anyhow::anyhow!("cannot determine config path for {app_name}"))?,
        (None, None) => anyhow::bail!("No config specified (--config or --app-name)"),
    };
    let mut config = UpdaterConfig::from_file(&path)?;
    if cli.log_dir.is_some() {
        config.log.dir = cli.log_dir;
    }
    let log_guard = logging::init(&config.log, "watchdog")?;

    let watchdog = Watchdog::new(config.watchdog.programs(), config.watchdog.restart_delay());
    let cancel = watchdog.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, stopping programs");
            cancel.cancel();
        }
    });

    match watchdog.run().await {
        Ok(WatchExit::ExitAll { program }) => {
            info!(program = %program.display(), "exiting");
            drop(log_guard);
            std::process::exit(0);
        }
        Ok(WatchExit::AllStopped) => {
            info!("all programs stopped");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "watchdog failed");
            Err(e.into())
        }
    }
}
