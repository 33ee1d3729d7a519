//! Command-line update check, download, and apply.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use clap::Parser;
use tracing::info;

use updater::config::{SourceConfig, SourceKind, UpdaterConfig};
use updater::update::{
    Context, StateStore, Update, UpdateAction, UpdateOptions, UpdatePromptOptions,
    UpdatePromptResponse, UpdateUi, Updater,
};
use updater::{apply, logging, sources};

/// Check for, download, and apply application updates.
#[derive(Parser)]
#[command(name = "saorsa-updater", about)]
struct Cli {
    /// Show version.
    #[arg(long = "version")]
    show_version: bool,

    /// App name.
    #[arg(long)]
    app_name: Option<String>,

    /// Current version.
    #[arg(long)]
    current: Option<String>,

    /// GitHub repo (`owner/name`) to check for releases.
    #[arg(long, conflicts_with_all = ["remote", "local"])]
    github: Option<String>,

    /// URL of a JSON update document.
    #[arg(long, conflicts_with = "local")]
    remote: Option<String>,

    /// Local JSON update file.
    #[arg(long, requires = "asset")]
    local: Option<PathBuf>,

    /// Asset file for --local.
    #[arg(long)]
    asset: Option<PathBuf>,

    /// Consider prerelease builds.
    #[arg(long)]
    prerelease: bool,

    /// Download the update.
    #[arg(long)]
    download: bool,

    /// Unzip the downloaded update over this path.
    #[arg(long, value_name = "DEST")]
    apply: Option<PathBuf>,

    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log to daily files in this directory instead of stderr.
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Cli {
    /// File config (if any) with flags layered on top.
    fn resolve(&self) -> anyhow::Result<UpdaterConfig> {
        let mut config = match &self.config {
            Some(path) => UpdaterConfig::from_file(path)?,
            None => UpdaterConfig::default(),
        };
        if let Some(app_name) = &self.app_name {
            config.app_name.clone_from(app_name);
        }
        if let Some(current) = &self.current {
            config.current_version.clone_from(current);
        }
        config.prerelease |= self.prerelease;
        if let Some(repo) = &self.github {
            config.source = SourceConfig {
                kind: SourceKind::Github,
                repo: repo.clone(),
                ..Default::default()
            };
        } else if let Some(url) = &self.remote {
            config.source = SourceConfig {
                kind: SourceKind::Remote,
                url: url.clone(),
                ..Default::default()
            };
        } else if let Some(json) = &self.local {
            config.source = SourceConfig {
                kind: SourceKind::Local,
                path: Some(json.clone()),
                asset_path: self.asset.clone(),
                ..Default::default()
            };
        } else if self.config.is_none() {
            bail!("No update source (--github, --remote or --local)");
        }
        if self.log_dir.is_some() {
            config.log.dir.clone_from(&self.log_dir);
        }

        if config.current_version.is_empty() {
            bail!("No current version specified (--current)");
        }
        if config.app_name.is_empty() {
            bail!("No app name specified (--app-name)");
        }
        Ok(config)
    }
}

/// Non-interactive host: always continues, applies by unzipping.
struct CliContext {
    options: UpdateOptions,
    destination: Option<PathBuf>,
}

#[async_trait]
impl UpdateUi for CliContext {
    async fn update_prompt(
        &self,
        _update: &Update,
        _options: &UpdateOptions,
        prompt_options: UpdatePromptOptions,
    ) -> anyhow::Result<Option<UpdatePromptResponse>> {
        Ok(Some(UpdatePromptResponse {
            action: UpdateAction::Continue,
            auto_update: prompt_options.auto_update,
            snooze_duration: 0,
        }))
    }
}

#[async_trait]
impl Context for CliContext {
    fn update_ui(&self) -> &dyn UpdateUi {
        self
    }

    fn update_options(&self) -> UpdateOptions {
        self.options.clone()
    }

    async fn apply(&self, update: &Update, _options: &UpdateOptions, tmp_dir: &Path) -> anyhow::Result<()> {
        let Some(destination) = &self.destination else {
            bail!("no apply destination");
        };
        let Some(local_path) = update.local_path() else {
            bail!("No local asset to apply, use with --download option?");
        };
        unzip_into(local_path, destination, tmp_dir)
    }
}

/// Unzip `zip_path` over `destination`; the archive's top-level entry must be
/// named like the destination.
fn unzip_into(zip_path: &Path, destination: &Path, tmp_dir: &Path) -> anyhow::Result<()> {
    let name = destination
        .file_name()
        .and_then(|n| n.to_str())
        .with_context(|| format!("invalid apply destination {}", destination.display()))?;
    info!(zip = %zip_path.display(), destination = %destination.display(), "applying");
    apply::unzip_over(zip_path, name, destination, |_, _| Ok(()), tmp_dir)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if cli.show_version {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return;
    }
    if let Err(e) = run(cli).await {
        eprintln!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.resolve()?;
    let _log_guard = logging::init(&config.log, "updater")?;

    let source = sources::from_config(&config.source)?;
    let state = StateStore::for_app(&config.app_name)?;
    let mut upd =
        Updater::new(source, Arc::new(state)).with_use_etag(config.download.use_etag);
    if let Some(timeout) = config.download.timeout() {
        upd = upd.with_download_timeout(timeout);
    }

    let ctx = CliContext {
        options: UpdateOptions {
            version: config.current_version.clone(),
            app_name: config.app_name.clone(),
            prerelease: config.prerelease,
        },
        destination: cli.apply.clone(),
    };
    let options = ctx.update_options();

    let Some(mut update) = upd.check_for_update(&ctx).await? else {
        println!("{{}}");
        return Ok(());
    };

    let check_only = !cli.download && cli.apply.is_none();
    if check_only || !update.need_update {
        println!("{}", serde_json::to_string_pretty(&update)?);
        return Ok(());
    }

    if cli.download {
        upd.download(&mut update, &options).await?;
        if update.asset.is_some() {
            upd.cleanup(&options.app_name, update.local_path());
        }
    }

    if let Some(destination) = &cli.apply {
        ctx.apply(&update, &options, &upd.temp_dir(&options.app_name)).await?;
        update.applied = Some(destination.clone());
    }

    println!("{}", serde_json::to_string_pretty(&update)?);
    Ok(())
}
