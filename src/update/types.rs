//! Value types exchanged between update sources, the orchestrator, and the host.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::digest::{DigestError, DigestType};

/// A downloadable update artifact and its integrity metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Asset {
    /// File name the asset is saved under.
    pub name: String,
    /// Where to fetch it from (`https://` or `file://`).
    pub url: String,
    /// Expected hex digest of the file.
    pub digest: String,
    /// Algorithm of `digest` as the source named it (`""`, `sha256`, `sha512`).
    /// Checked when the asset is downloaded.
    pub digest_type: String,
    /// Location of the verified download, once there is one. Written as
    /// `""` when unset.
    #[serde(with = "empty_path")]
    pub local_path: Option<PathBuf>,
}

impl Asset {
    /// The parsed digest algorithm.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::UnsupportedType`] for an unknown type.
    pub fn digest_kind(&self) -> Result<DigestType, DigestError> {
        self.digest_type.parse()
    }
}

/// A free-form name/value pair attached to an update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    /// Property name.
    pub name: String,
    /// Property value.
    pub value: String,
}

/// An available release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Update {
    /// Version of the release.
    pub version: String,
    /// Publication time, milliseconds since the Unix epoch.
    pub published_at: i64,
    /// Extra properties, in source order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub props: Vec<Property>,
    /// The artifact to install. Absent on platforms without a binary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset: Option<Asset>,
    /// `true` when the current version is strictly older than `version`.
    pub need_update: bool,
    /// Where the update was applied, set by the caller after applying.
    #[serde(with = "empty_path")]
    pub applied: Option<PathBuf>,
    /// Install identifier issued by the update server.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install_id: Option<String>,
}

impl Update {
    /// The asset, if it has a URL to download from.
    pub fn downloadable_asset(&self) -> Option<&Asset> {
        self.asset.as_ref().filter(|a| !a.url.is_empty())
    }

    /// Local path of the downloaded asset.
    pub fn local_path(&self) -> Option<&std::path::Path> {
        self.asset.as_ref()?.local_path.as_deref()
    }
}

/// Optional paths as plain strings, with `""` standing for "none".
mod empty_path {
    use std::path::{Path, PathBuf};

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(path: &Option<PathBuf>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&path.as_deref().map(Path::to_string_lossy).unwrap_or_default())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<PathBuf>, D::Error> {
        let path = Option::<String>::deserialize(d)?;
        Ok(path.filter(|p| !p.is_empty()).map(PathBuf::from))
    }
}

/// Input to every update check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateOptions {
    /// Currently installed version.
    pub version: String,
    /// Application name; also names the download directory.
    pub app_name: String,
    /// Consider prerelease builds.
    pub prerelease: bool,
}

/// What the user (or the auto-update policy) chose at the prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    /// Go ahead with this update.
    Continue,
    /// Download and apply now.
    Apply,
    /// Apply automatically; chosen by policy when auto-update is on.
    Auto,
    /// Not now; ask again later.
    Snooze,
    /// Decline this update.
    Cancel,
    /// The prompt failed, or answered with something unrecognized.
    #[default]
    #[serde(other)]
    Error,
}

impl UpdateAction {
    /// Returns `true` for the actions that lead to a download.
    pub fn proceeds(self) -> bool {
        matches!(self, Self::Continue | Self::Apply | Self::Auto)
    }
}

impl std::fmt::Display for UpdateAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Continue => "continue",
            Self::Apply => "apply",
            Self::Auto => "auto",
            Self::Snooze => "snooze",
            Self::Cancel => "cancel",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// The prompt's answer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdatePromptResponse {
    /// Chosen action.
    pub action: UpdateAction,
    /// State of the "update automatically" checkbox.
    pub auto_update: bool,
    /// How long to snooze, in milliseconds.
    pub snooze_duration: u64,
}

impl UpdatePromptResponse {
    /// The response synthesized when auto-update skips the prompt.
    pub fn auto() -> Self {
        Self {
            action: UpdateAction::Auto,
            auto_update: true,
            snooze_duration: 0,
        }
    }
}

/// What the prompt is told about current preferences.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdatePromptOptions {
    /// Initial state of the "update automatically" checkbox.
    pub auto_update: bool,
}
