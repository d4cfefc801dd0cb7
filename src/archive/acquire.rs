//! Archive acquisition strategies

use crate::errors::{LauncherError, Result};
use log::{debug, info};
use std::fmt;
use std::path::{Path, PathBuf};

/// File name the archive is stored under inside the download directory
pub const DEFAULT_ARCHIVE_NAME: &str = "bundle.zip";

/// Where the archive bytes come from
#[derive(Clone)]
pub enum ArchiveSource {
    /// Bytes handed over by the boundary layer
    Upload(Vec<u8>),
    /// Fetched from a fixed remote location
    Remote(String),
}

impl fmt::Debug for ArchiveSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveSource::Upload(bytes) => write!(f, "Upload({} bytes)", bytes.len()),
            ArchiveSource::Remote(url) => write!(f, "Remote({})", url),
        }
    }
}

impl ArchiveSource {
    pub fn upload(bytes: impl Into<Vec<u8>>) -> Self {
        ArchiveSource::Upload(bytes.into())
    }

    pub fn remote(url: impl Into<String>) -> Self {
        ArchiveSource::Remote(url.into())
    }

    /// Place the archive at `download_dir/file_name` and return its path.
    ///
    /// Failures are reported once; nothing is retried.
    pub async fn acquire(&self, download_dir: &Path, file_name: &str) -> Result<PathBuf> {
        let target = download_dir.join(file_name);

        let bytes = match self {
            ArchiveSource::Upload(bytes) => {
                if bytes.is_empty() {
                    return Err(LauncherError::Acquisition(
                        "No archive payload present".to_string(),
                    ));
                }
                debug!("Saving uploaded archive ({} bytes)", bytes.len());
                bytes.clone()
            }
            ArchiveSource::Remote(url) => fetch_remote(url).await?,
        };

        tokio::fs::write(&target, &bytes).await.map_err(|e| {
            LauncherError::Acquisition(format!(
                "Failed to save archive to {}: {}",
                target.display(),
                e
            ))
        })?;

        Ok(target)
    }
}

async fn fetch_remote(url: &str) -> Result<Vec<u8>> {
    info!("Fetching archive from {}", url);

    let response = reqwest::get(url)
        .await
        .map_err(|e| LauncherError::Acquisition(format!("Request to {} failed: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(LauncherError::Acquisition(format!(
            "Remote fetch from {} returned {}",
            url, status
        )));
    }

    let body = response.bytes().await.map_err(|e| {
        LauncherError::Acquisition(format!("Failed to read body from {}: {}", url, e))
    })?;

    Ok(body.to_vec())
}
