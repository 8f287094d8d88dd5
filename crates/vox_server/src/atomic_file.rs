//! Atomic file write/read protocol shared by world metadata and session persistence.
//!
//! Write order: `<path>.tmp` is written in full, the previous `<path>` (if any) is copied to
//! `<path>.bak`, then `<path>.tmp` is renamed onto `<path>`. If the rename fails (e.g. a
//! concurrent handle on some platforms), falls back to copy-then-unlink. Load prefers `<path>`,
//! falling back to `<path>.bak` on a parse failure; if both fail, the caller treats it as absent.

use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::prelude::*;

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".tmp");
    PathBuf::from(s)
}

fn bak_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(".bak");
    PathBuf::from(s)
}

/// Atomically writes `bytes` to `path`, preserving the previous contents under `path.bak`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes)?;
    if path.exists() {
        let bak = bak_path(path);
        if let Err(e) = fs::copy(path, &bak) {
            tracing::warn!("Could not back up {} before replacing it: {e}", path.display());
        }
    }
    match fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(_) => {
            // Fallback for platforms/situations where rename across a concurrent handle fails.
            fs::copy(&tmp, path)?;
            fs::remove_file(&tmp)?;
            Ok(())
        }
    }
}

/// Loads a JSON document from `path`, falling back to `path.bak` on a parse failure.
/// Returns `Ok(None)` if neither the primary file nor the backup could be parsed.
pub fn read_with_backup<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if let Ok(bytes) = fs::read(path) {
        if let Ok(value) = serde_json::from_slice(&bytes) {
            return Ok(Some(value));
        }
        tracing::warn!("{} is corrupt, falling back to backup", path.display());
    }
    let bak = bak_path(path);
    if let Ok(bytes) = fs::read(&bak) {
        if let Ok(value) = serde_json::from_slice(&bytes) {
            return Ok(Some(value));
        }
        tracing::warn!("{} backup is also corrupt", bak.display());
    }
    Ok(None)
}

/// Convenience wrapper writing a serde-serializable value as pretty JSON.
pub fn write_atomic_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    write_atomic(path, &bytes)
}
