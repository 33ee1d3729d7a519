//! Updates published as GitHub releases with an electron-builder manifest.
//!
//! Each release carries a `latest-<platform>.yml` manifest naming the asset,
//! its base64 SHA-512, and the release date. The newest non-prerelease is
//! reachable through GitHub's `releases/latest/download/` redirect. With
//! prereleases enabled, the releases API is consulted first and the newest
//! release is used if it is flagged as a prerelease.

use std::time::Duration;

use anyhow::{Context as _, bail};
use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use tracing::{debug, info};

use crate::digest::DigestType;
use crate::update::{Asset, Update, UpdateOptions, UpdateSource};
use crate::version;

const GITHUB_WEB: &str = "https://github.com";
const GITHUB_API: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    version: String,
    path: String,
    sha512: String,
    release_date: String,
}

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    prerelease: bool,
    #[serde(default)]
    tag_name: String,
}

/// [`UpdateSource`] for `github.com/<owner>/<repo>` releases.
#[derive(Debug, Clone)]
pub struct GithubSource {
    repo: String,
    web_base: String,
    api_base: String,
    timeout: Duration,
}

impl GithubSource {
    /// Source for `repo` (`owner/name`).
    pub fn new(repo: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            web_base: GITHUB_WEB.to_owned(),
            api_base: GITHUB_API.to_owned(),
            timeout: REQUEST_TIMEOUT,
        }
    }

    /// Talk to other hosts than github.com / api.github.com (mirrors, tests).
    #[must_use]
    pub fn with_base_urls(mut self, web: impl Into<String>, api: impl Into<String>) -> Self {
        self.web_base = web.into().trim_end_matches('/').to_owned();
        self.api_base = api.into().trim_end_matches('/').to_owned();
        self
    }

    /// Per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn latest_manifest_url(&self) -> String {
        format!(
            "{}/{}/releases/latest/download/{}",
            self.web_base,
            self.repo,
            manifest_name()
        )
    }

    fn tag_manifest_url(&self, tag: &str) -> String {
        format!(
            "{}/{}/releases/download/{tag}/{}",
            self.web_base,
            self.repo,
            manifest_name()
        )
    }

    async fn prerelease_manifest_url(&self, client: &reqwest::Client) -> anyhow::Result<Option<String>> {
        let url = format!("{}/repos/{}/releases", self.api_base, self.repo);
        let body = request(client, &url).await?;
        let releases: Vec<Release> =
            serde_json::from_slice(&body).context("decoding releases")?;
        let Some(newest) = releases.first() else {
            return Ok(None);
        };
        if !newest.prerelease {
            return Ok(None);
        }
        if newest.tag_name.is_empty() {
            bail!("no tag for release");
        }
        Ok(Some(self.tag_manifest_url(&newest.tag_name)))
    }

    async fn manifest_url(&self, client: &reqwest::Client, prerelease: bool) -> String {
        if prerelease {
            match self.prerelease_manifest_url(client).await {
                Ok(Some(url)) => return url,
                Ok(None) => debug!("no prerelease, using latest"),
                Err(e) => info!(error = %format!("{e:#}"), "error checking for prerelease"),
            }
        }
        self.latest_manifest_url()
    }

    /// Build an [`Update`] from manifest YAML.
    fn update_from_manifest(&self, yaml: &[u8], options: &UpdateOptions) -> anyhow::Result<Update> {
        let manifest: Manifest = serde_yaml::from_slice(yaml).context("decoding manifest")?;

        let published = chrono::DateTime::parse_from_rfc3339(&manifest.release_date)
            .with_context(|| format!("invalid release date {:?}", manifest.release_date))?;
        let digest = base64_to_hex(&manifest.sha512)?;
        let url = format!(
            "{}/{}/releases/download/v{}/{}",
            self.web_base, self.repo, manifest.version, manifest.path
        );

        Ok(Update {
            need_update: version::need_update(&options.version, &manifest.version),
            published_at: published.timestamp_millis(),
            asset: Some(Asset {
                name: manifest.path,
                url,
                digest,
                digest_type: DigestType::Sha512.to_string(),
                local_path: None,
            }),
            version: manifest.version,
            ..Default::default()
        })
    }
}

#[async_trait]
impl UpdateSource for GithubSource {
    fn description(&self) -> String {
        format!("github.com/{}", self.repo)
    }

    async fn find_update(&self, options: &UpdateOptions) -> anyhow::Result<Option<Update>> {
        if self.repo.is_empty() {
            bail!("no repo specified");
        }
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;

        let url = self.manifest_url(&client, options.prerelease).await;
        info!(url, "requesting manifest");
        let body = request(&client, &url).await?;
        let update = self.update_from_manifest(&body, options)?;
        debug!(?update, "received update");
        Ok(Some(update))
    }
}

/// Manifest file name for the platform we are running on.
pub fn manifest_name() -> &'static str {
    if cfg!(target_os = "macos") {
        "latest-mac.yml"
    } else if cfg!(target_os = "windows") {
        "latest-windows.yml"
    } else {
        "latest-linux.yml"
    }
}

fn base64_to_hex(s: &str) -> anyhow::Result<String> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(s.trim())
        .context("invalid sha512 encoding")?;
    Ok(bytes.iter().map(|b| format!("{b:02x}")).collect())
}

async fn request(client: &reqwest::Client, url: &str) -> anyhow::Result<Vec<u8>> {
    let response = client
        .get(url)
        .header(reqwest::header::USER_AGENT, "saorsa-updater")
        .send()
        .await
        .with_context(|| format!("requesting {url}"))?;
    let status = response.status();
    if status != reqwest::StatusCode::OK {
        bail!("find update returned bad HTTP status {status}");
    }
    Ok(response.bytes().await?.to_vec())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    const MANIFEST: &str = "\
version: 0.0.18
files:
  - url: Keys-0.0.18-mac.zip
    sha512: n+RiYDrL2E5V5d+moC9A0Eg1UciL0FO0s4J6umfX/j5TQUoiFPY4egLgv8Zn1GTtDMSU8UtsoErlyoGiDVA2GA==
    size: 71532148
path: Keys-0.0.18-mac.zip
sha512: n+RiYDrL2E5V5d+moC9A0Eg1UciL0FO0s4J6umfX/j5TQUoiFPY4egLgv8Zn1GTtDMSU8UtsoErlyoGiDVA2GA==
releaseDate: '2020-03-03T22:44:03.689Z'
";

    fn options(version: &str) -> UpdateOptions {
        UpdateOptions {
            version: version.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn manifest_becomes_update() {
        let s = GithubSource::new("keys-pub/app");
        let upd = s.update_from_manifest(MANIFEST.as_bytes(), &options("0.0.17")).unwrap();
        assert_eq!(upd.version, "0.0.18");
        assert_eq!(upd.published_at, 1_583_275_443_689);
        assert!(upd.need_update);

        let asset = upd.asset.unwrap();
        assert_eq!(asset.name, "Keys-0.0.18-mac.zip");
        assert_eq!(
            asset.url,
            "https://github.com/keys-pub/app/releases/download/v0.0.18/Keys-0.0.18-mac.zip"
        );
        assert_eq!(
            asset.digest,
            "9fe462603acbd84e55e5dfa6a02f40d0483551c88bd053b4b3827aba67d7fe3e53414a2214f6387a02e0bfc667d464ed0cc494f14b6ca04ae5ca81a20d503618"
        );
        assert_eq!(asset.digest_kind().unwrap(), DigestType::Sha512);
    }

    #[test]
    fn need_update_follows_current_version() {
        let s = GithubSource::new("keys-pub/app");
        let same = s.update_from_manifest(MANIFEST.as_bytes(), &options("0.0.18")).unwrap();
        assert!(!same.need_update);
        let newer = s.update_from_manifest(MANIFEST.as_bytes(), &options("0.0.19")).unwrap();
        assert!(!newer.need_update);
    }

    #[test]
    fn bad_release_date_is_an_error() {
        let s = GithubSource::new("keys-pub/app");
        let yaml = MANIFEST.replace("2020-03-03T22:44:03.689Z", "yesterday");
        assert!(s.update_from_manifest(yaml.as_bytes(), &options("0.0.17")).is_err());
    }

    #[test]
    fn base64_digest_is_hex_encoded() {
        assert_eq!(base64_to_hex("aGVsbG8=").unwrap(), "68656c6c6f");
        assert!(base64_to_hex("not base64!").is_err());
    }

    #[test]
    fn description_names_the_repo() {
        assert_eq!(
            GithubSource::new("keys-pub/app").description(),
            "github.com/keys-pub/app"
        );
    }

    #[test]
    fn latest_manifest_url_uses_redirect() {
        let url = GithubSource::new("keys-pub/app").latest_manifest_url();
        assert!(url.starts_with("https://github.com/keys-pub/app/releases/latest/download/latest"));
        assert!(url.ends_with(".yml"));
    }

    #[tokio::test]
    async fn empty_repo_is_rejected() {
        assert!(GithubSource::new("").find_update(&options("1.0.0")).await.is_err());
    }
}
