//! Subscriber setup for the binaries.
//!
//! The library only emits `tracing` events. Each binary calls [`init`] once at
//! startup; nothing in the library installs or holds a subscriber.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// Install the global subscriber described by `config`.
///
/// Events go to stderr, or to a daily-rolling `<file_prefix>.<date>` file
/// under `config.dir` when one is set. `RUST_LOG` overrides `config.level`.
///
/// The returned guard flushes the file writer on drop; hold it until the
/// process exits.
///
/// # Errors
///
/// Fails if the log directory cannot be created, the level is not a valid
/// filter, or a subscriber is already installed.
pub fn init(config: &LogConfig, file_prefix: &str) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)?,
    };

    let Some(dir) = &config.dir else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow::anyhow!(e))?;
        return Ok(None);
    };

    std::fs::create_dir_all(dir)?;
    let appender = tracing_appender::rolling::daily(dir, file_prefix);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(writer)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(Some(guard))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn bad_level_is_rejected() {
        // RUST_LOG wins over the configured level.
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config = LogConfig {
            level: "updater=notalevel".to_owned(),
            dir: None,
        };
        assert!(init(&config, "test").is_err());
    }
}
