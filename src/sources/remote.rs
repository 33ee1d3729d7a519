//! Updates described by a JSON document at a URL.

use std::time::Duration;

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::update::{Update, UpdateOptions, UpdateSource};
use crate::version;

/// [`UpdateSource`] that GETs an [`Update`] as JSON.
///
/// `needUpdate` is recomputed from the current version rather than trusted.
#[derive(Debug, Clone)]
pub struct RemoteSource {
    url: String,
    timeout: Duration,
}

impl RemoteSource {
    /// Source for the document at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl UpdateSource for RemoteSource {
    fn description(&self) -> String {
        "Remote".to_owned()
    }

    async fn find_update(&self, options: &UpdateOptions) -> anyhow::Result<Option<Update>> {
        if self.url.is_empty() {
            bail!("no url specified");
        }
        info!(url = %self.url, "requesting update");
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        let response = client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("requesting {}", self.url))?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            bail!("find update returned bad HTTP status {status}");
        }

        let mut update: Update = response.json().await.context("decoding update")?;
        update.need_update = version::need_update(&options.version, &update.version);
        debug!(?update, "received update");
        Ok(Some(update))
    }
}
