//! File digests for asset verification.
//!
//! Files are hashed in 64 KiB chunks so large installers never sit in memory
//! all at once. Digests are lowercase hex; comparison ignores case.

use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;

/// Hash algorithm of an asset digest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DigestType {
    /// SHA-256 (the default, also selected by an empty type).
    #[default]
    Sha256,
    /// SHA-512.
    Sha512,
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

impl FromStr for DigestType {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(DigestError::UnsupportedType(other.to_owned())),
        }
    }
}

impl TryFrom<String> for DigestType {
    type Error = DigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DigestType> for String {
    fn from(value: DigestType) -> Self {
        value.to_string()
    }
}

/// Digest computation or verification failure.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// No expected digest was supplied.
    #[error("missing digest")]
    MissingDigest,

    /// The digest type is not one we can compute.
    #[error("unsupported digest type: {0}")]
    UnsupportedType(String),

    /// The file hashes to something other than expected.
    #[error("invalid digest: {actual} != {expected} ({})", path.display())]
    Mismatch {
        /// Digest we were told to expect.
        expected: String,
        /// Digest of the file on disk.
        actual: String,
        /// File that was checked.
        path: PathBuf,
    },

    /// The file could not be read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File that was being hashed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Hash everything `reader` yields and return the hex digest.
///
/// # Errors
///
/// Returns any read error from `reader`.
pub fn digest_reader<R: Read>(mut reader: R, digest_type: DigestType) -> io::Result<String> {
    let mut buf = vec![0u8; 65_536];
    match digest_type {
        DigestType::Sha256 => {
            let mut hasher = Sha256::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
        DigestType::Sha512 => {
            let mut hasher = Sha512::new();
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
    }
}

/// Hex digest of the file at `path`.
///
/// # Errors
///
/// Returns [`DigestError::Io`] if the file cannot be opened or read.
pub fn digest_file(path: &Path, digest_type: DigestType) -> Result<String, DigestError> {
    let io_err = |source| DigestError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = std::fs::File::open(path).map_err(io_err)?;
    digest_reader(file, digest_type).map_err(io_err)
}

/// Check that the file at `path` hashes to `expected`.
///
/// # Errors
///
/// Returns [`DigestError::MissingDigest`] for an empty `expected`,
/// [`DigestError::Mismatch`] when the digests differ, and
/// [`DigestError::Io`] when the file cannot be read.
pub fn check_digest(expected: &str, path: &Path, digest_type: DigestType) -> Result<(), DigestError> {
    if expected.is_empty() {
        return Err(DigestError::MissingDigest);
    }
    let actual = digest_file(path, digest_type)?;
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(DigestError::Mismatch {
            expected: expected.to_owned(),
            actual,
            path: path.to_path_buf(),
        });
    }
    info!(digest = expected, path = %path.display(), "verified digest");
    Ok(())
}

/// Content fingerprint of an existing download, sent as a conditional-request
/// token so an unchanged asset is not fetched twice.
///
/// # Errors
///
/// Returns [`DigestError::Io`] if the file cannot be read.
pub fn compute_etag(path: &Path) -> Result<String, DigestError> {
    digest_file(path, DigestType::Sha256)
}
