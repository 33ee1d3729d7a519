//! Updates described by a JSON file on disk, with a local asset.
//!
//! Useful for testing an install end to end without publishing anything:
//! the update JSON says which version it is, and the asset is a file next to
//! it whose digest is computed on the spot.

use std::path::PathBuf;

use anyhow::{Context as _, anyhow};
use async_trait::async_trait;
use url::Url;

use crate::digest::{self, DigestType};
use crate::update::{Asset, Update, UpdateOptions, UpdateSource};
use crate::version;

/// [`UpdateSource`] reading an [`Update`] from `json_path`, whose asset is
/// replaced with the file at `asset_path`.
#[derive(Debug, Clone)]
pub struct LocalSource {
    asset_path: PathBuf,
    json_path: PathBuf,
}

impl LocalSource {
    /// Source for the given asset and update description.
    pub fn new(asset_path: impl Into<PathBuf>, json_path: impl Into<PathBuf>) -> Self {
        Self {
            asset_path: asset_path.into(),
            json_path: json_path.into(),
        }
    }
}

#[async_trait]
impl UpdateSource for LocalSource {
    fn description(&self) -> String {
        "Local".to_owned()
    }

    async fn find_update(&self, options: &UpdateOptions) -> anyhow::Result<Option<Update>> {
        let json = tokio::fs::read(&self.json_path)
            .await
            .with_context(|| format!("reading {}", self.json_path.display()))?;
        let mut update: Update = serde_json::from_slice(&json)
            .with_context(|| format!("decoding {}", self.json_path.display()))?;

        let asset_path = std::path::absolute(&self.asset_path)
            .with_context(|| format!("resolving {}", self.asset_path.display()))?;
        let url = Url::from_file_path(&asset_path)
            .map_err(|()| anyhow!("not a file path: {}", asset_path.display()))?;
        let hashed = asset_path.clone();
        let digest = tokio::task::spawn_blocking(move || {
            digest::digest_file(&hashed, DigestType::Sha256)
        })
        .await??;

        let name = asset_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        update.asset = Some(Asset {
            name,
            url: url.to_string(),
            digest,
            digest_type: DigestType::Sha256.to_string(),
            local_path: None,
        });
        update.need_update = version::need_update(&options.version, &update.version);
        Ok(Some(update))
    }
}
