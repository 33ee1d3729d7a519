//! Asset download with local-fingerprint caching and digest enforcement.
//!
//! [`fetch`] brings a remote (`http`/`https`) or local (`file`) URL to a
//! destination path:
//!
//! 1. `file://` URLs are copied directly, then digest-checked.
//! 2. With `use_etag`, an existing destination file is fingerprinted and the
//!    fingerprint is sent as `If-None-Match`. A `304 Not Modified` keeps the
//!    existing file, provided it still passes the digest check; if it does not,
//!    it is deleted and the call fails.
//! 3. A `200 OK` body is streamed into `<destination>.download` next to the
//!    destination, digest-checked, and renamed into place.
//!
//! Nothing here retries. Network, status, and digest failures go straight
//! back to the caller.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::IF_NONE_MATCH;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::digest::{self, DigestError, DigestType};

/// Suffix of the in-progress file written next to the destination.
pub const PARTIAL_SUFFIX: &str = ".download";

const USER_AGENT: &str = concat!("saorsa-updater/", env!("CARGO_PKG_VERSION"));

/// Options for [`fetch`].
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// Expected hex digest of the final file.
    pub digest: String,
    /// Algorithm of `digest`.
    pub digest_type: DigestType,
    /// Accept the file without checking `digest`.
    pub skip_digest: bool,
    /// Revalidate an existing destination file instead of re-downloading it.
    pub use_etag: bool,
    /// Whole-request timeout; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

/// How [`fetch`] satisfied the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetched {
    /// The body was transferred and moved into place.
    Downloaded,
    /// The server confirmed the existing file is current.
    Cached,
    /// A `file://` URL was copied.
    Copied,
}

/// Download failure.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The URL could not be parsed or does not name a usable location.
    #[error("invalid url {url}: {reason}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Transport-level failure (connect, TLS, timeout, body read).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with something other than 200 or 304.
    #[error("{0}")]
    Status(String),

    /// The file failed digest verification.
    #[error(transparent)]
    Digest(#[from] DigestError),

    /// Local filesystem failure.
    #[error("{}: {source}", path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> FetchError + '_ {
    move |source| FetchError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Download `url` to `destination`.
///
/// # Errors
///
/// Returns a [`FetchError`] describing the first failure; see the module docs
/// for which files are left behind in each case.
pub async fn fetch(
    url: &str,
    destination: &Path,
    options: &DownloadOptions,
) -> Result<Fetched, FetchError> {
    let parsed = parse_url(url)?;

    if parsed.scheme() == "file" {
        let source = parsed.to_file_path().map_err(|()| FetchError::InvalidUrl {
            url: url.to_owned(),
            reason: "not a local file path".to_owned(),
        })?;
        copy_local(&source, destination, options).await?;
        return Ok(Fetched::Copied);
    }

    let etag = if options.use_etag {
        cached_etag(destination).await
    } else {
        None
    };

    let client = http_client(options.timeout)?;
    let mut request = client.get(parsed);
    if let Some(etag) = &etag {
        info!(etag, "using etag");
        request = request.header(IF_NONE_MATCH, etag.as_str());
    }

    info!(url, "request");
    let mut response = request.send().await?;
    let status = response.status();

    if status == StatusCode::NOT_MODIFIED {
        info!(path = %destination.display(), "using cached file");
        if !options.skip_digest
            && let Err(e) = verify(destination, options).await
        {
            tokio::fs::remove_file(destination)
                .await
                .map_err(io_err(destination))?;
            return Err(e.into());
        }
        return Ok(Fetched::Cached);
    }
    if status != StatusCode::OK {
        return Err(FetchError::Status(status.to_string()));
    }

    let partial = partial_path(destination);
    if tokio::fs::try_exists(&partial).await.unwrap_or(false) {
        info!(path = %partial.display(), "removing existing partial download");
        tokio::fs::remove_file(&partial)
            .await
            .map_err(io_err(&partial))?;
    }
    make_parent_dirs(&partial).await?;

    info!(path = %partial.display(), "downloading");
    let written = save_response(&mut response, &partial).await?;
    info!(bytes = written, "downloaded");

    if !options.skip_digest
        && let Err(e) = verify(&partial, options).await
    {
        if let Err(rm) = tokio::fs::remove_file(&partial).await {
            debug!(error = %rm, "could not remove rejected download");
        }
        return Err(e.into());
    }

    tokio::fs::rename(&partial, destination)
        .await
        .map_err(io_err(destination))?;
    Ok(Fetched::Downloaded)
}

/// Returns `true` if `url` is reachable: a `HEAD` answered with `200 OK`, or
/// an existing file for `file://` URLs.
///
/// # Errors
///
/// Returns transport failures and non-200 statuses as errors.
pub async fn url_exists(url: &str, timeout: Duration) -> Result<bool, FetchError> {
    let parsed = parse_url(url)?;
    if parsed.scheme() == "file" {
        let path = parsed.to_file_path().map_err(|()| FetchError::InvalidUrl {
            url: url.to_owned(),
            reason: "not a local file path".to_owned(),
        })?;
        return Ok(tokio::fs::try_exists(&path).await.unwrap_or(false));
    }

    debug!(url, "checking url exists");
    let response = http_client(Some(timeout))?.head(parsed).send().await?;
    if response.status() != StatusCode::OK {
        return Err(FetchError::Status(format!(
            "invalid status code ({})",
            response.status().as_u16()
        )));
    }
    Ok(true)
}

/// `<destination>.download`, in the same directory so the final rename never
/// crosses filesystems.
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

fn parse_url(url: &str) -> Result<Url, FetchError> {
    Url::parse(url).map_err(|e| FetchError::InvalidUrl {
        url: url.to_owned(),
        reason: e.to_string(),
    })
}

fn http_client(timeout: Option<Duration>) -> Result<reqwest::Client, FetchError> {
    let mut builder = reqwest::Client::builder().user_agent(USER_AGENT);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    Ok(builder.build()?)
}

/// Fingerprint of an existing destination file, hashed off the runtime.
async fn cached_etag(destination: &Path) -> Option<String> {
    let path = destination.to_path_buf();
    let computed = tokio::task::spawn_blocking(move || {
        path.is_file().then(|| digest::compute_etag(&path))
    })
    .await;
    match computed {
        Ok(Some(Ok(etag))) => Some(etag),
        Ok(None) => None,
        Ok(Some(Err(e))) => {
            warn!(error = %e, "error computing etag");
            None
        }
        Err(e) => {
            warn!(error = %e, "etag task failed");
            None
        }
    }
}

async fn verify(path: &Path, options: &DownloadOptions) -> Result<(), DigestError> {
    let path = path.to_path_buf();
    let expected = options.digest.clone();
    let digest_type = options.digest_type;
    let checked = path.clone();
    tokio::task::spawn_blocking(move || digest::check_digest(&expected, &checked, digest_type))
        .await
        .map_err(|e| DigestError::Io {
            path,
            source: io::Error::other(e),
        })?
}

async fn copy_local(
    source: &Path,
    destination: &Path,
    options: &DownloadOptions,
) -> Result<(), FetchError> {
    make_parent_dirs(destination).await?;
    info!(from = %source.display(), to = %destination.display(), "copying local file");
    tokio::fs::copy(source, destination)
        .await
        .map_err(io_err(source))?;
    if !options.skip_digest {
        verify(destination, options).await?;
    }
    Ok(())
}

async fn make_parent_dirs(path: &Path) -> Result<(), FetchError> {
    let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) else {
        return Ok(());
    };
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(parent).await.map_err(io_err(parent))
}

async fn save_response(response: &mut reqwest::Response, path: &Path) -> Result<u64, FetchError> {
    let mut open = tokio::fs::OpenOptions::new();
    open.write(true).create_new(true);
    #[cfg(unix)]
    open.mode(0o600);
    let mut file = open.open(path).await.map_err(io_err(path))?;

    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await.map_err(io_err(path))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err(path))?;
    file.sync_all().await.map_err(io_err(path))?;
    Ok(written)
}
