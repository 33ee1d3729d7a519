//! Persistent update preferences.
//!
//! Tracks the auto-update preference, the install id issued by the update
//! server, the last check time, and the last applied version. Persisted as
//! JSON to `<data-local-dir>/<app>/update-state.json`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::context::Config;
use crate::error::{Result, UpdateError};

/// On-disk update state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateState {
    /// Update automatically without prompting.
    pub auto: bool,
    /// Whether `auto` was ever chosen. Never reset once set.
    pub auto_set: bool,
    /// Administrator override that forces the prompt.
    pub auto_override: bool,
    /// Install identifier issued by the update server.
    pub install_id: Option<String>,
    /// Last update check, milliseconds since the Unix epoch.
    pub last_check_ms: Option<i64>,
    /// Last version successfully applied.
    pub last_applied_version: Option<String>,
}

impl UpdateState {
    /// Default location of the state file for `app_name`.
    pub fn state_file_path(app_name: &str) -> Option<PathBuf> {
        dirs::data_local_dir().map(|d| d.join(app_name).join("update-state.json"))
    }

    /// Load state from `path`. Returns the default state if the file is
    /// missing or cannot be parsed.
    pub fn load(path: &Path) -> Self {
        let bytes = match std::fs::read(path) {
            Ok(b) => b,
            Err(_) => return Self::default(),
        };
        serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "ignoring unreadable update state");
            Self::default()
        })
    }

    /// Persist the state to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] if the directory cannot be created or
    /// the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                UpdateError::Config(format!(
                    "cannot create state directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| UpdateError::Config(format!("cannot serialize update state: {e}")))?;

        std::fs::write(path, json).map_err(|e| {
            UpdateError::Config(format!(
                "cannot write update state to {}: {e}",
                path.display()
            ))
        })
    }

    /// Record that an update check happened now.
    pub fn mark_checked(&mut self) {
        self.last_check_ms = Some(chrono::Utc::now().timestamp_millis());
    }

    /// Returns `true` if the last check happened less than `within` ago.
    pub fn checked_within(&self, within: Duration) -> bool {
        let Some(last) = self.last_check_ms else {
            return false;
        };
        let elapsed_ms = chrono::Utc::now().timestamp_millis().saturating_sub(last);
        // A check stamped in the future is not recent.
        elapsed_ms >= 0 && u128::from(elapsed_ms.unsigned_abs()) < within.as_millis()
    }
}

/// [`Config`] backed by an [`UpdateState`] file. Every change is written
/// through immediately.
pub struct StateStore {
    path: PathBuf,
    state: Mutex<UpdateState>,
}

impl StateStore {
    /// Open the store at `path`, loading whatever state is already there.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = UpdateState::load(&path);
        debug!(path = %path.display(), "opened update state");
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    /// Open the store at the default location for `app_name`.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Config`] when no data directory is known.
    pub fn for_app(app_name: &str) -> Result<Self> {
        if app_name.is_empty() {
            return Err(UpdateError::Config("no app name".to_owned()));
        }
        let path = UpdateState::state_file_path(app_name).ok_or_else(|| {
            UpdateError::Config("cannot determine update state file path".to_owned())
        })?;
        Ok(Self::open(path))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> UpdateState {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, UpdateState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Apply `change` and persist it. Memory is only updated once the file
    /// has been written.
    fn update(&self, change: impl FnOnce(&mut UpdateState)) -> anyhow::Result<()> {
        let mut state = self.lock();
        let mut next = state.clone();
        change(&mut next);
        next.save(&self.path)
            .with_context(|| format!("saving {}", self.path.display()))?;
        *state = next;
        Ok(())
    }
}

impl Config for StateStore {
    fn update_auto(&self) -> (bool, bool) {
        let state = self.lock();
        (state.auto, state.auto_set)
    }

    fn set_update_auto(&self, auto: bool) -> anyhow::Result<()> {
        self.update(|s| {
            s.auto = auto;
            s.auto_set = true;
        })
    }

    fn update_auto_override(&self) -> bool {
        self.lock().auto_override
    }

    fn set_update_auto_override(&self, auto_override: bool) -> anyhow::Result<()> {
        self.update(|s| s.auto_override = auto_override)
    }

    fn install_id(&self) -> Option<String> {
        self.lock().install_id.clone()
    }

    fn set_install_id(&self, install_id: &str) -> anyhow::Result<()> {
        self.update(|s| s.install_id = Some(install_id.to_owned()))
    }

    fn is_last_update_check_time_recent(&self, within: Duration) -> bool {
        self.lock().checked_within(within)
    }

    fn set_last_update_check_time(&self) {
        if let Err(e) = self.update(UpdateState::mark_checked) {
            warn!(error = %format!("{e:#}"), "error saving last update check time");
        }
    }

    fn last_applied_version(&self) -> Option<String> {
        self.lock().last_applied_version.clone()
    }

    fn set_last_applied_version(&self, version: &str) -> anyhow::Result<()> {
        self.update(|s| s.last_applied_version = Some(version.to_owned()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn default_state_is_unset() {
        let state = UpdateState::default();
        assert!(!state.auto);
        assert!(!state.auto_set);
        assert!(!state.auto_override);
        assert!(state.install_id.is_none());
        assert!(state.last_check_ms.is_none());
        assert!(state.last_applied_version.is_none());
    }

    #[test]
    fn state_deserialize_from_partial_json() {
        let state: UpdateState = serde_json::from_str(r#"{"auto":true}"#).unwrap();
        assert!(state.auto);
        assert!(!state.auto_set);
    }

    #[test]
    fn state_file_path_names_the_app() {
        if let Some(path) = UpdateState::state_file_path("Keys") {
            assert!(path.ends_with("Keys/update-state.json"));
        }
    }

    #[test]
    fn load_returns_default_when_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = UpdateState::load(&dir.path().join("missing.json"));
        assert_eq!(state, UpdateState::default());
    }

    #[test]
    fn load_returns_default_for_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update-state.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(UpdateState::load(&path), UpdateState::default());
    }

    #[test]
    fn mark_checked_makes_check_recent() {
        let mut state = UpdateState::default();
        assert!(!state.checked_within(Duration::from_secs(3600)));
        state.mark_checked();
        assert!(state.checked_within(Duration::from_secs(3600)));
        assert!(!state.checked_within(Duration::ZERO));
    }

    #[test]
    fn old_check_is_not_recent() {
        let state = UpdateState {
            last_check_ms: Some(chrono::Utc::now().timestamp_millis() - 2 * 3_600_000),
            ..Default::default()
        };
        assert!(!state.checked_within(Duration::from_secs(3600)));
        assert!(state.checked_within(Duration::from_secs(3 * 3600)));
    }

    #[test]
    fn store_writes_through_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app").join("update-state.json");

        let store = StateStore::open(&path);
        store.set_update_auto(true).unwrap();
        store.set_install_id("abc123").unwrap();
        store.set_last_applied_version("1.2.3").unwrap();
        store.set_last_update_check_time();

        let reopened = StateStore::open(&path);
        assert_eq!(reopened.update_auto(), (true, true));
        assert_eq!(reopened.install_id().as_deref(), Some("abc123"));
        assert_eq!(reopened.last_applied_version().as_deref(), Some("1.2.3"));
        assert!(reopened.is_last_update_check_time_recent(Duration::from_secs(60)));
    }

    #[test]
    fn auto_set_is_never_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::open(dir.path().join("update-state.json"));
        assert_eq!(store.update_auto(), (false, false));
        store.set_update_auto(true).unwrap();
        store.set_update_auto(false).unwrap();
        assert_eq!(store.update_auto(), (false, true));
        store.set_update_auto_override(true).unwrap();
        assert_eq!(store.update_auto(), (false, true));
        assert!(store.update_auto_override());
    }

    #[test]
    fn unwritable_store_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let store = StateStore::open(blocker.join("update-state.json"));
        assert!(store.set_update_auto(true).is_err());
        assert_eq!(store.update_auto(), (false, false), "failed save changes nothing");
        assert!(store.set_install_id("abc123").is_err());
        assert!(store.install_id().is_none());
        store.set_last_update_check_time();
        assert!(!store.is_last_update_check_time_recent(Duration::from_secs(60)));
    }

    #[test]
    fn empty_app_name_is_rejected() {
        assert!(StateStore::for_app("").is_err());
    }
}
