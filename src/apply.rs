//! Installing a downloaded zip over an existing directory.
//!
//! [`unzip_over`] extracts the archive next to the download, checks that the
//! expected top-level entry is a real directory, and swaps it in for the
//! destination. The previous destination is moved into `tmp_dir` rather than
//! deleted, and is put back if the swap fails.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use tracing::{info, warn};

/// Extract `zip_path` and replace `destination` with its entry `name`.
///
/// `check` runs on the extracted directory and the destination before
/// anything at the destination is touched.
///
/// # Errors
///
/// Fails if the archive cannot be read or contains paths escaping the
/// extraction directory, if `name` is missing or not a directory, if `check`
/// fails, or if the destination cannot be replaced.
pub fn unzip_over<F>(
    zip_path: &Path,
    name: &str,
    destination: &Path,
    check: F,
    tmp_dir: &Path,
) -> anyhow::Result<()>
where
    F: FnOnce(&Path, &Path) -> anyhow::Result<()>,
{
    if destination.as_os_str().is_empty() {
        bail!("invalid destination");
    }
    if name.is_empty() || Path::new(name).file_name() != Some(std::ffi::OsStr::new(name)) {
        bail!("invalid entry name {name:?}");
    }

    fs::create_dir_all(tmp_dir).with_context(|| format!("creating {}", tmp_dir.display()))?;
    let unzip_dir = unique_path(tmp_dir, "unzipped");
    unzip(zip_path, &unzip_dir)?;

    let source = unzip_dir.join(name);
    let result = check_real_dir(&source)
        .and_then(|()| check(&source, destination))
        .and_then(|()| swap_in(&source, destination, tmp_dir));

    if let Err(e) = fs::remove_dir_all(&unzip_dir) {
        warn!(path = %unzip_dir.display(), error = %e, "error removing unzip dir");
    }
    result
}

fn unzip(zip_path: &Path, into: &Path) -> anyhow::Result<()> {
    info!(zip = %zip_path.display(), into = %into.display(), "unzipping");
    let file = fs::File::open(zip_path).with_context(|| format!("opening {}", zip_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("reading {}", zip_path.display()))?;
    archive
        .extract(into)
        .with_context(|| format!("extracting {}", zip_path.display()))
}

/// `path` must be a directory itself, not a symlink to one.
fn check_real_dir(path: &Path) -> anyhow::Result<()> {
    let meta = fs::symlink_metadata(path)
        .with_context(|| format!("{} is missing from the archive", path.display()))?;
    if !meta.file_type().is_dir() {
        bail!("{} isn't a directory", path.display());
    }
    Ok(())
}

fn swap_in(source: &Path, destination: &Path, tmp_dir: &Path) -> anyhow::Result<()> {
    let moved_aside = if fs::symlink_metadata(destination).is_ok() {
        let file_name = destination.file_name().unwrap_or(destination.as_os_str());
        let aside = tmp_dir.join(file_name);
        remove_all(&aside)?;
        info!(from = %destination.display(), to = %aside.display(), "moving existing");
        move_path(destination, &aside)?;
        Some(aside)
    } else {
        None
    };

    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }

    info!(from = %source.display(), to = %destination.display(), "moving update into place");
    if let Err(e) = move_path(source, destination) {
        if let Some(aside) = moved_aside {
            warn!(error = %format!("{e:#}"), "restoring previous install");
            let _ = remove_all(destination);
            if let Err(restore) = move_path(&aside, destination) {
                warn!(error = %format!("{restore:#}"), "error restoring previous install");
            }
        }
        return Err(e);
    }
    Ok(())
}

/// Rename, falling back to copy-and-delete across filesystems.
fn move_path(from: &Path, to: &Path) -> anyhow::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    copy_recursive(from, to)
        .with_context(|| format!("copying {} to {}", from.display(), to.display()))?;
    remove_all(from)
}

fn copy_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
    let meta = fs::symlink_metadata(from)?;
    if meta.file_type().is_symlink() {
        #[cfg(unix)]
        {
            return std::os::unix::fs::symlink(fs::read_link(from)?, to);
        }
        #[cfg(not(unix))]
        {
            return fs::copy(from, to).map(|_| ());
        }
    }
    if meta.is_dir() {
        fs::create_dir_all(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
        fs::set_permissions(to, meta.permissions())
    } else {
        fs::copy(from, to).map(|_| ())
    }
}

fn remove_all(path: &Path) -> anyhow::Result<()> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Ok(());
    };
    let removed = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    removed.with_context(|| format!("removing {}", path.display()))
}

fn unique_path(dir: &Path, suffix: &str) -> PathBuf {
    let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    dir.join(format!("{}.{stamp}.{suffix}", std::process::id()))
}
