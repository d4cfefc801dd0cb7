//! Scratch workspace management

use crate::errors::{LauncherError, Result};
use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

/// Subdirectory receiving the fetched or uploaded archive
pub const DOWNLOAD_DIR: &str = "downloads";
/// Subdirectory the archive is unpacked into
pub const EXTRACT_DIR: &str = "extracted";

/// Exclusively-owned scratch directory tree
///
/// Layout:
///
/// ```text
/// <root>/
///   downloads/   archive lands here
///   extracted/   archive unpacks here; the bundle root is found inside
/// ```
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
    download_dir: PathBuf,
    extract_dir: PathBuf,
}

impl Workspace {
    /// Describe a workspace rooted at `root`. Nothing is created until [`reset`](Self::reset).
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            download_dir: root.join(DOWNLOAD_DIR),
            extract_dir: root.join(EXTRACT_DIR),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    pub fn extract_dir(&self) -> &Path {
        &self.extract_dir
    }

    /// Remove the whole tree if present, then recreate the root and both subdirectories empty.
    pub fn reset(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|e| {
                LauncherError::Workspace(format!(
                    "Failed to remove {}: {}",
                    self.root.display(),
                    e
                ))
            })?;
        }

        for dir in [&self.root, &self.download_dir, &self.extract_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                LauncherError::Workspace(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        debug!("Workspace reset at {}", self.root.display());
        Ok(())
    }

    /// Empty the extraction directory only, used after a failed extraction.
    pub fn clear_extracted(&self) -> Result<()> {
        clear_dir(&self.extract_dir)
    }
}

/// Replace `dir` with an empty directory of the same name.
pub(crate) fn clear_dir(dir: &Path) -> Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir).map_err(|e| {
            LauncherError::Workspace(format!("Failed to clear {}: {}", dir.display(), e))
        })?;
    }
    fs::create_dir_all(dir).map_err(|e| {
        LauncherError::Workspace(format!("Failed to create {}: {}", dir.display(), e))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_workspace_paths() {
        let ws = Workspace::new("/tmp/launcher");
        assert_eq!(ws.root(), Path::new("/tmp/launcher"));
        assert_eq!(ws.download_dir(), Path::new("/tmp/launcher/downloads"));
        assert_eq!(ws.extract_dir(), Path::new("/tmp/launcher/extracted"));
    }

    #[test]
    fn reset_creates_fresh_tree() {
        let tmp = tempdir().unwrap();
        let ws = Workspace::new(tmp.path().join("ws"));
        ws.reset().unwrap();

        assert_eq!(entries(ws.root()), vec!["downloads", "extracted"]);
        assert!(entries(ws.download_dir()).is_empty());
        assert!(entries(ws.extract_dir()).is_empty());
    }

    #[test]
    fn reset_discards_previous_contents() {
        let tmp = tempdir().unwrap();
        let ws = Workspace::new(tmp.path().join("ws"));
        ws.reset().unwrap();

        fs::write(ws.download_dir().join("bundle.zip"), b"old").unwrap();
        fs::create_dir_all(ws.extract_dir().join("old-bot/lib")).unwrap();
        fs::write(ws.extract_dir().join("old-bot/index.js"), b"1").unwrap();
        fs::write(ws.root().join("stray.txt"), b"x").unwrap();

        ws.reset().unwrap();
        assert_eq!(entries(ws.root()), vec!["downloads", "extracted"]);
        assert!(entries(ws.download_dir()).is_empty());
        assert!(entries(ws.extract_dir()).is_empty());
    }

    #[test]
    fn reset_is_idempotent() {
        let tmp = tempdir().unwrap();
        let ws = Workspace::new(tmp.path().join("ws"));

        ws.reset().unwrap();
        ws.reset().unwrap();
        assert_eq!(entries(ws.root()), vec!["downloads", "extracted"]);
        assert!(entries(ws.extract_dir()).is_empty());
    }

    #[test]
    fn reset_fails_when_root_is_a_file_under_a_file() {
        let tmp = tempdir().unwrap();
        let blocker = tmp.path().join("blocker");
        fs::write(&blocker, b"not a dir").unwrap();

        let ws = Workspace::new(blocker.join("ws"));
        let err = ws.reset().unwrap_err();
        assert_eq!(err.kind(), "workspace");
    }

    #[test]
    fn clear_extracted_leaves_downloads() {
        let tmp = tempdir().unwrap();
        let ws = Workspace::new(tmp.path().join("ws"));
        ws.reset().unwrap();
        fs::write(ws.download_dir().join("bundle.zip"), b"zip").unwrap();
        fs::write(ws.extract_dir().join("partial.js"), b"p").unwrap();

        ws.clear_extracted().unwrap();
        assert!(entries(ws.extract_dir()).is_empty());
        assert_eq!(entries(ws.download_dir()), vec!["bundle.zip"]);
    }
}
