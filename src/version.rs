//! Semantic version comparison.

use semver::Version;
use tracing::warn;

/// Parse `v` as a semantic version, ignoring a leading `v`.
pub fn parse(v: &str) -> Option<Version> {
    let trimmed = v.trim();
    let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(trimmed).ok()
}

/// Returns `true` only if `current` is strictly older than `available`.
///
/// Versions that do not parse never need an update.
pub fn need_update(current: &str, available: &str) -> bool {
    let Some(current_v) = parse(current) else {
        warn!(version = current, "invalid current version");
        return false;
    };
    let Some(available_v) = parse(available) else {
        warn!(version = available, "invalid available version");
        return false;
    };
    current_v < available_v
}
