//! Locating the bundle root and its entry file

use crate::errors::{LauncherError, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Entry files tried in order
pub const DEFAULT_ENTRY_CANDIDATES: &[&str] = &["start.js", "index.js"];

/// First directory under `extraction_root` (lexical order), or the root
/// itself when the archive unpacked flat.
pub fn resolve_bundle_root(extraction_root: &Path) -> Result<PathBuf> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(extraction_root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.file_name());
        }
    }
    dirs.sort();

    Ok(match dirs.into_iter().next() {
        Some(name) => extraction_root.join(name),
        None => extraction_root.to_path_buf(),
    })
}

/// First candidate that exists as a file in `bundle_root`.
pub fn resolve_entry_file<S: AsRef<str>>(bundle_root: &Path, candidates: &[S]) -> Option<PathBuf> {
    candidates
        .iter()
        .map(|name| bundle_root.join(name.as_ref()))
        .find(|path| path.is_file())
}

/// Like [`resolve_entry_file`], but a missing entry point is an error.
pub fn require_entry_file<S: AsRef<str>>(bundle_root: &Path, candidates: &[S]) -> Result<PathBuf> {
    resolve_entry_file(bundle_root, candidates).ok_or_else(|| LauncherError::EntryPointMissing {
        dir: bundle_root.display().to_string(),
        candidates: candidates
            .iter()
            .map(|c| c.as_ref())
            .collect::<Vec<_>>()
            .join(", "),
    })
}
