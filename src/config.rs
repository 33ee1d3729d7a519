//! Configuration for the updater and watchdog binaries.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, UpdateError};
use crate::watchdog::{ExitPolicy, Program};

/// Top-level configuration, read from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Application name. Names the download directory and the state file.
    pub app_name: String,
    /// Version currently installed.
    pub current_version: String,
    /// Consider prerelease builds.
    pub prerelease: bool,
    /// Where updates come from.
    pub source: SourceConfig,
    /// Download settings.
    pub download: DownloadConfig,
    /// Supervised programs.
    pub watchdog: WatchdogConfig,
    /// Log output.
    pub log: LogConfig,
}

/// Kind of update source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// GitHub releases with an electron-builder manifest (default).
    #[default]
    Github,
    /// A JSON update document at a URL.
    Remote,
    /// A JSON update file plus a local asset.
    Local,
}

/// Update source settings. Which fields matter depends on `kind`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Source kind.
    pub kind: SourceKind,
    /// `owner/name` for [`SourceKind::Github`].
    pub repo: String,
    /// Update document URL for [`SourceKind::Remote`].
    pub url: String,
    /// Update JSON file for [`SourceKind::Local`].
    pub path: Option<PathBuf>,
    /// Asset file for [`SourceKind::Local`].
    pub asset_path: Option<PathBuf>,
}

/// Download settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Whole-download timeout in seconds. `0` disables the timeout.
    pub timeout_secs: u64,
    /// Reuse a previously downloaded asset when the server agrees it is current.
    pub use_etag: bool,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 600,
            use_etag: true,
        }
    }
}

impl DownloadConfig {
    /// The timeout, or `None` when disabled.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// Watchdog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Minimum time between two launches of the same program.
    pub restart_delay_ms: u64,
    /// Programs to keep running.
    pub programs: Vec<ProgramConfig>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            restart_delay_ms: 10_000,
            programs: Vec::new(),
        }
    }
}

impl WatchdogConfig {
    /// Restart delay as a [`Duration`].
    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }

    /// Programs in the form the watchdog takes.
    pub fn programs(&self) -> Vec<Program> {
        self.programs.iter().map(ProgramConfig::to_program).collect()
    }
}

/// One supervised program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgramConfig {
    /// Executable path.
    pub path: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// What a clean exit means.
    pub exit_on: ExitPolicy,
}

impl ProgramConfig {
    fn to_program(&self) -> Program {
        Program {
            path: self.path.clone(),
            args: self.args.clone(),
            exit_on: self.exit_on,
        }
    }
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    pub level: String,
    /// Write daily-rolling log files here instead of stderr.
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "updater=info".to_owned(),
            dir: None,
        }
    }
}

impl UpdaterConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| UpdateError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&content).map_err(|e| UpdateError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] if the file cannot be written or the
    /// config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                UpdateError::Config(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| UpdateError::Config(e.to_string()))?;
        std::fs::write(path, content)
            .map_err(|e| UpdateError::Config(format!("cannot write {}: {e}", path.display())))
    }

    /// Default config file: `<config dir>/<app name>/updater.toml`.
    pub fn default_config_path(app_name: &str) -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(app_name).join("updater.toml"))
    }
}
