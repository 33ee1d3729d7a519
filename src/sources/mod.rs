//! Concrete [`UpdateSource`] backends.

pub mod github;
pub mod local;
pub mod remote;

pub use github::GithubSource;
pub use local::LocalSource;
pub use remote::RemoteSource;

use std::sync::Arc;

use crate::config::{SourceConfig, SourceKind};
use crate::error::{Result, UpdateError};
use crate::update::UpdateSource;

/// Build the source described by `config`.
///
/// # Errors
///
/// Returns [`UpdateError::Config`] when a field the chosen kind needs is missing.
pub fn from_config(config: &SourceConfig) -> Result<Arc<dyn UpdateSource>> {
    match config.kind {
        SourceKind::Github => {
            if config.repo.is_empty() {
                return Err(UpdateError::Config("github source needs a repo".to_owned()));
            }
            Ok(Arc::new(GithubSource::new(&config.repo)))
        }
        SourceKind::Remote => {
            if config.url.is_empty() {
                return Err(UpdateError::Config("remote source needs a url".to_owned()));
            }
            Ok(Arc::new(RemoteSource::new(&config.url)))
        }
        SourceKind::Local => match (&config.asset_path, &config.path) {
            (Some(asset), Some(json)) => Ok(Arc::new(LocalSource::new(asset, json))),
            _ => Err(UpdateError::Config(
                "local source needs path and asset_path".to_owned(),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::path::PathBuf;

    #[test]
    fn builds_each_kind() {
        let github = SourceConfig {
            repo: "keys-pub/app".to_owned(),
            ..Default::default()
        };
        assert_eq!(from_config(&github).unwrap().description(), "github.com/keys-pub/app");

        let remote = SourceConfig {
            kind: SourceKind::Remote,
            url: "https://updates.example.com/app.json".to_owned(),
            ..Default::default()
        };
        assert_eq!(from_config(&remote).unwrap().description(), "Remote");

        let local = SourceConfig {
            kind: SourceKind::Local,
            path: Some(PathBuf::from("update.json")),
            asset_path: Some(PathBuf::from("App.zip")),
            ..Default::default()
        };
        assert_eq!(from_config(&local).unwrap().description(), "Local");
    }

    #[test]
    fn missing_fields_are_config_errors() {
        for kind in [SourceKind::Github, SourceKind::Remote, SourceKind::Local] {
            let config = SourceConfig {
                kind,
                ..Default::default()
            };
            assert!(matches!(from_config(&config), Err(UpdateError::Config(_))));
        }
    }
}
