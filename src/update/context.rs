//! Capabilities the orchestrator consumes: where updates come from, where
//! preferences live, and how the host prompts for and applies an update.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::types::{Update, UpdateOptions, UpdatePromptOptions, UpdatePromptResponse};
use crate::error::UpdateError;

/// Somewhere updates can be found.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Short human-readable description, for logs.
    fn description(&self) -> String;

    /// Look up the newest update for `options`. `Ok(None)` means nothing is
    /// published.
    async fn find_update(&self, options: &UpdateOptions) -> anyhow::Result<Option<Update>>;
}

/// Persisted update preferences and bookkeeping.
pub trait Config: Send + Sync {
    /// `(auto, auto_set)`: the auto-update preference and whether it has ever
    /// been set.
    fn update_auto(&self) -> (bool, bool);

    /// Store the auto-update preference. Also marks it as set, permanently.
    ///
    /// # Errors
    ///
    /// Returns an error when the preference cannot be persisted.
    fn set_update_auto(&self, auto: bool) -> anyhow::Result<()>;

    /// Whether an administrator has overridden auto-update.
    fn update_auto_override(&self) -> bool;

    /// Store the override flag.
    ///
    /// # Errors
    ///
    /// Returns an error when the flag cannot be persisted.
    fn set_update_auto_override(&self, auto_override: bool) -> anyhow::Result<()>;

    /// The install identifier issued by the update server, if any.
    fn install_id(&self) -> Option<String>;

    /// Store the install identifier.
    ///
    /// # Errors
    ///
    /// Returns an error when the identifier cannot be persisted.
    fn set_install_id(&self, install_id: &str) -> anyhow::Result<()>;

    /// Returns `true` if the last recorded check is less than `within` ago.
    fn is_last_update_check_time_recent(&self, within: Duration) -> bool;

    /// Record that a check happened now. Persistence failures are logged.
    fn set_last_update_check_time(&self);

    /// The last version successfully applied, if any.
    fn last_applied_version(&self) -> Option<String>;

    /// Store the last applied version.
    ///
    /// # Errors
    ///
    /// Returns an error when the version cannot be persisted.
    fn set_last_applied_version(&self, version: &str) -> anyhow::Result<()>;
}

/// Host prompt asking whether to install an update.
#[async_trait]
pub trait UpdateUi: Send + Sync {
    /// Ask the user about `update`. `Ok(None)` means the prompt produced no
    /// answer, which is treated as a prompt error.
    async fn update_prompt(
        &self,
        update: &Update,
        options: &UpdateOptions,
        prompt_options: UpdatePromptOptions,
    ) -> anyhow::Result<Option<UpdatePromptResponse>>;
}

/// Host hooks driven by [`Updater::update`](super::Updater::update).
///
/// Hooks run in a fixed order: `before_update_prompt`, the prompt,
/// `report_action`, `verify`, `before_apply`, `apply`, `after_apply`, then one
/// of `report_success` / `report_error`, and finally `after_update_check`.
#[async_trait]
pub trait Context: Send + Sync {
    /// The prompt to show.
    fn update_ui(&self) -> &dyn UpdateUi;

    /// Options for this run.
    fn update_options(&self) -> UpdateOptions;

    /// Trust check on the downloaded asset, beyond the digest check.
    async fn verify(&self, _update: &Update) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs before the prompt is shown (or skipped).
    async fn before_update_prompt(
        &self,
        _update: &Update,
        _options: &UpdateOptions,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs before [`Context::apply`].
    async fn before_apply(&self, _update: &Update) -> anyhow::Result<()> {
        Ok(())
    }

    /// Install the downloaded update. `tmp_dir` holds the download.
    async fn apply(
        &self,
        update: &Update,
        options: &UpdateOptions,
        tmp_dir: &Path,
    ) -> anyhow::Result<()>;

    /// Runs after a successful [`Context::apply`].
    async fn after_apply(&self, _update: &Update) -> anyhow::Result<()> {
        Ok(())
    }

    /// A run failed. Never called for cancelled runs.
    fn report_error(&self, _err: &UpdateError, _update: Option<&Update>, _options: &UpdateOptions) {}

    /// The prompt was answered.
    fn report_action(
        &self,
        _response: &UpdatePromptResponse,
        _update: &Update,
        _options: &UpdateOptions,
    ) {
    }

    /// A run finished without error and found an update.
    fn report_success(&self, _update: &Update, _options: &UpdateOptions) {}

    /// Last hook of every run.
    fn after_update_check(&self, _update: Option<&Update>) {}
}
