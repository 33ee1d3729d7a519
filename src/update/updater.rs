//! The update run: check, prompt, download, verify, apply, report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::context::{Config, Context, UpdateSource};
use super::types::{
    Update, UpdateAction, UpdateOptions, UpdatePromptOptions, UpdatePromptResponse,
};
use crate::download::{self, DownloadOptions};
use crate::error::{Result, UpdateError};

/// Finds, downloads, and applies updates from one source.
pub struct Updater {
    source: Arc<dyn UpdateSource>,
    config: Arc<dyn Config>,
    temp_root: PathBuf,
    download_timeout: Option<Duration>,
    use_etag: bool,
}

impl Updater {
    /// Create an updater. Downloads go under `<system temp>/updater/<app name>`.
    pub fn new(source: Arc<dyn UpdateSource>, config: Arc<dyn Config>) -> Self {
        Self {
            source,
            config,
            temp_root: std::env::temp_dir().join("updater"),
            download_timeout: None,
            use_etag: true,
        }
    }

    /// Put per-app download directories under `root` instead.
    #[must_use]
    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = root.into();
        self
    }

    /// Bound each asset download by `timeout`.
    #[must_use]
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = Some(timeout);
        self
    }

    /// Revalidate an already-downloaded asset with the server (the default)
    /// instead of always transferring it again.
    #[must_use]
    pub fn with_use_etag(mut self, use_etag: bool) -> Self {
        self.use_etag = use_etag;
        self
    }

    /// The configuration store in use.
    pub fn config(&self) -> &Arc<dyn Config> {
        &self.config
    }

    /// Directory downloads for `app_name` are saved in.
    pub fn temp_dir(&self, app_name: &str) -> PathBuf {
        self.temp_root.join(app_name)
    }

    /// Ask the source for an update, without prompting or downloading.
    ///
    /// A new install identifier carried by the update is persisted; failing
    /// to persist it is reported through the context but does not fail the
    /// check.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Find`] if the source lookup fails.
    pub async fn check_for_update(&self, ctx: &dyn Context) -> Result<Option<Update>> {
        let options = ctx.update_options();
        info!(
            version = %options.version,
            source = %self.source.description(),
            "checking for update"
        );
        debug!(?options, "update options");

        let update = self
            .source
            .find_update(&options)
            .await
            .map_err(|e| UpdateError::Find(format!("{e:#}")))?;
        let Some(update) = update else {
            return Ok(None);
        };

        if let Some(install_id) = update.install_id.as_deref()
            && self.config.install_id().as_deref() != Some(install_id)
        {
            info!(install_id, "saving install id");
            if let Err(e) = self.config.set_install_id(install_id) {
                let err = UpdateError::Config(format!("{e:#}"));
                ctx.report_error(&err, Some(&update), &options);
            }
        }
        Ok(Some(update))
    }

    /// One full update run.
    ///
    /// Returns `Ok(None)` when no update is needed. Errors other than
    /// [`UpdateError::Cancel`] are passed to [`Context::report_error`] before
    /// being returned; [`Context::after_update_check`] runs last either way.
    ///
    /// # Errors
    ///
    /// Returns the error of whichever phase failed, or
    /// [`UpdateError::Cancel`] if the prompt was snoozed or cancelled.
    pub async fn update(&self, ctx: &dyn Context) -> Result<Option<Update>> {
        let options = ctx.update_options();
        let mut found = None;
        let result = self.run(ctx, &options, &mut found).await;

        match &result {
            Err(e) if e.is_cancel() => info!(error = %e, "update cancelled"),
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "update failed");
                ctx.report_error(e, found.as_ref(), &options);
            }
            Ok(()) => {
                if let Some(update) = &found {
                    ctx.report_success(update, &options);
                }
            }
        }
        ctx.after_update_check(found.as_ref());

        result.map(|()| found)
    }

    async fn run(
        &self,
        ctx: &dyn Context,
        options: &UpdateOptions,
        found: &mut Option<Update>,
    ) -> Result<()> {
        let Some(update) = self.check_for_update(ctx).await? else {
            info!("no update available");
            return Ok(());
        };
        if !update.need_update {
            info!(version = %update.version, "no update needed");
            return Ok(());
        }
        info!(version = %update.version, "update available");
        let update = found.insert(update);

        ctx.before_update_prompt(update, options)
            .await
            .map_err(|e| UpdateError::Prompt(format!("{e:#}")))?;

        let response = self.prompt(ctx, update, options).await?;
        info!(action = %response.action, "update prompt answered");
        match response.action {
            UpdateAction::Continue | UpdateAction::Apply | UpdateAction::Auto => {
                ctx.report_action(&response, update, options);
            }
            UpdateAction::Snooze => {
                ctx.report_action(&response, update, options);
                return Err(UpdateError::Cancel("snoozed update".to_owned()));
            }
            UpdateAction::Cancel => {
                ctx.report_action(&response, update, options);
                return Err(UpdateError::Cancel("canceled".to_owned()));
            }
            UpdateAction::Error => {
                return Err(UpdateError::Prompt("unknown prompt action".to_owned()));
            }
        }

        if update.downloadable_asset().is_none() {
            info!("no update asset to apply");
            return Ok(());
        }

        self.download(update, options).await?;
        ctx.verify(update)
            .await
            .map_err(|e| UpdateError::Verify(format!("{e:#}")))?;
        self.apply(ctx, update, options).await
    }

    async fn prompt(
        &self,
        ctx: &dyn Context,
        update: &Update,
        options: &UpdateOptions,
    ) -> Result<UpdatePromptResponse> {
        let (auto, auto_set) = self.config.update_auto();
        let auto_override = self.config.update_auto_override();
        if auto && !auto_override {
            info!("auto-update is enabled, skipping prompt");
            return Ok(UpdatePromptResponse::auto());
        }

        // An install that never chose defaults to updating automatically.
        let prompt_options = UpdatePromptOptions {
            auto_update: auto || !auto_set,
        };
        let response = ctx
            .update_ui()
            .update_prompt(update, options, prompt_options)
            .await
            .map_err(|e| UpdateError::Prompt(format!("{e:#}")))?
            .ok_or_else(|| UpdateError::Prompt("no response".to_owned()))?;

        if response.action != UpdateAction::Continue {
            debug!(auto = response.auto_update, "saving auto-update preference");
            if let Err(e) = self.config.set_update_auto(response.auto_update) {
                let err = UpdateError::Config(format!("{e:#}"));
                ctx.report_error(&err, Some(update), options);
            }
        }
        Ok(response)
    }

    /// Download the update's asset into [`Updater::temp_dir`] and record
    /// where it landed. An update without an asset URL is left untouched.
    ///
    /// # Errors
    ///
    /// Returns [`UpdateError::Download`] for an unsupported digest type and
    /// for network, status, digest, and file-system failures. `local_path` is
    /// only set on success.
    pub async fn download(&self, update: &mut Update, options: &UpdateOptions) -> Result<()> {
        let Some(asset) = update.asset.as_mut().filter(|a| !a.url.is_empty()) else {
            info!("no update asset to download");
            return Ok(());
        };

        let file_name = Path::new(&asset.name)
            .file_name()
            .ok_or_else(|| UpdateError::Download(format!("invalid asset name {:?}", asset.name)))?;
        let destination = self.temp_dir(&options.app_name).join(file_name);
        let digest_type = asset
            .digest_kind()
            .map_err(|e| UpdateError::Download(e.to_string()))?;

        let download_options = DownloadOptions {
            digest: asset.digest.clone(),
            digest_type,
            skip_digest: false,
            use_etag: self.use_etag,
            timeout: self.download_timeout,
        };
        let fetched = download::fetch(&asset.url, &destination, &download_options)
            .await
            .map_err(|e| UpdateError::Download(e.to_string()))?;
        info!(?fetched, path = %destination.display(), "asset ready");

        asset.local_path = Some(destination);
        Ok(())
    }

    async fn apply(&self, ctx: &dyn Context, update: &Update, options: &UpdateOptions) -> Result<()> {
        let apply_err = |e: anyhow::Error| UpdateError::Apply(format!("{e:#}"));
        let tmp_dir = self.temp_dir(&options.app_name);

        ctx.before_apply(update).await.map_err(apply_err)?;
        ctx.apply(update, options, &tmp_dir).await.map_err(apply_err)?;
        ctx.after_apply(update).await.map_err(apply_err)?;
        info!(version = %update.version, "update applied");

        if let Err(e) = self.config.set_last_applied_version(&update.version) {
            let err = UpdateError::Config(format!("{e:#}"));
            ctx.report_error(&err, Some(update), options);
        }
        Ok(())
    }

    /// Remove everything in `app_name`'s download directory except the file
    /// named by `except`. Best effort; failures are logged.
    pub fn cleanup(&self, app_name: &str, except: Option<&Path>) {
        let dir = self.temp_dir(app_name);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "error listing temp dir");
                return;
            }
        };
        let keep = except.and_then(Path::file_name);
        info!(except = ?keep, "cleaning up downloads");

        for entry in entries.flatten() {
            if keep == Some(entry.file_name().as_os_str()) {
                continue;
            }
            let path = entry.path();
            let removed = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match removed {
                Ok(()) => debug!(path = %path.display(), "removed"),
                Err(e) => warn!(path = %path.display(), error = %e, "error removing"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::update::types::Asset;
    use async_trait::async_trait;

    struct NoSource;

    #[async_trait]
    impl UpdateSource for NoSource {
        fn description(&self) -> String {
            "none".to_owned()
        }

        async fn find_update(&self, _options: &UpdateOptions) -> anyhow::Result<Option<Update>> {
            Ok(None)
        }
    }

    struct NoConfig;

    impl Config for NoConfig {
        fn update_auto(&self) -> (bool, bool) {
            (false, false)
        }
        fn set_update_auto(&self, _auto: bool) -> anyhow::Result<()> {
            Ok(())
        }
        fn update_auto_override(&self) -> bool {
            false
        }
        fn set_update_auto_override(&self, _auto_override: bool) -> anyhow::Result<()> {
            Ok(())
        }
        fn install_id(&self) -> Option<String> {
            None
        }
        fn set_install_id(&self, _install_id: &str) -> anyhow::Result<()> {
            Ok(())
        }
        fn is_last_update_check_time_recent(&self, _within: Duration) -> bool {
            false
        }
        fn set_last_update_check_time(&self) {}
        fn last_applied_version(&self) -> Option<String> {
            None
        }
        fn set_last_applied_version(&self, _version: &str) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn updater(root: &Path) -> Updater {
        Updater::new(Arc::new(NoSource), Arc::new(NoConfig)).with_temp_root(root)
    }

    #[test]
    fn temp_dir_is_per_app() {
        let u = Updater::new(Arc::new(NoSource), Arc::new(NoConfig));
        let dir = u.temp_dir("Keys");
        assert!(dir.ends_with("updater/Keys"));
        assert!(dir.starts_with(std::env::temp_dir()));
    }

    #[test]
    fn cleanup_keeps_only_the_named_file() {
        let root = tempfile::tempdir().unwrap();
        let u = updater(root.path());
        let dir = u.temp_dir("App");
        std::fs::create_dir_all(dir.join("old-extract")).unwrap();
        std::fs::write(dir.join("App-1.0.0.zip"), b"old").unwrap();
        std::fs::write(dir.join("App-1.1.0.zip"), b"new").unwrap();
        std::fs::write(dir.join("App-1.1.0.zip.download"), b"partial").unwrap();

        u.cleanup("App", Some(&dir.join("App-1.1.0.zip")));

        let mut left: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(left, ["App-1.1.0.zip"]);
    }

    #[test]
    fn cleanup_of_missing_dir_is_harmless() {
        let root = tempfile::tempdir().unwrap();
        updater(root.path()).cleanup("Nothing", None);
    }

    #[tokio::test]
    async fn download_without_asset_is_a_no_op() {
        let root = tempfile::tempdir().unwrap();
        let mut update = Update {
            version: "1.0.0".to_owned(),
            need_update: true,
            ..Default::default()
        };
        updater(root.path())
            .download(&mut update, &UpdateOptions::default())
            .await
            .unwrap();
        assert!(update.local_path().is_none());
    }

    #[tokio::test]
    async fn unsupported_digest_type_fails_the_download() {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("App-1.1.0.zip");
        std::fs::write(&source, b"release").unwrap();
        let mut update = Update {
            version: "1.1.0".to_owned(),
            need_update: true,
            asset: Some(Asset {
                name: "App-1.1.0.zip".to_owned(),
                url: url::Url::from_file_path(&source).unwrap().to_string(),
                digest: "00".to_owned(),
                digest_type: "md5".to_owned(),
                local_path: None,
            }),
            ..Default::default()
        };
        let options = UpdateOptions {
            app_name: "App".to_owned(),
            ..Default::default()
        };

        let err = updater(root.path())
            .download(&mut update, &options)
            .await
            .unwrap_err();
        assert!(matches!(&err, UpdateError::Download(m) if m.contains("md5")), "{err}");
        assert!(update.local_path().is_none());
        assert!(!root.path().join("App").join("App-1.1.0.zip").exists());
    }
}
