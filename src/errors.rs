//! Error types for launcher operations

use std::io;
use thiserror::Error;

/// Result type for launcher operations
pub type Result<T> = std::result::Result<T, LauncherError>;

/// Errors that can abort a run
///
/// A child process exiting is not an error; it is reported on the log
/// channel as [`crate::execution::LogEvent::Exit`].
#[derive(Error, Debug)]
pub enum LauncherError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    #[error("Archive acquisition failed: {0}")]
    Acquisition(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Failed to write config: {0}")]
    ConfigWrite(String),

    #[error("No entry point found in {dir} (looked for {candidates})")]
    EntryPointMissing { dir: String, candidates: String },

    #[error("Failed to start process: {0}")]
    Spawn(String),

    #[error("Run superseded by a newer request")]
    Superseded,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl LauncherError {
    /// Stable name used in API replies
    pub fn kind(&self) -> &'static str {
        match self {
            LauncherError::Io(_) => "io",
            LauncherError::Validation(_) => "validation",
            LauncherError::Workspace(_) => "workspace",
            LauncherError::Acquisition(_) => "acquisition",
            LauncherError::Extraction(_) => "extraction",
            LauncherError::ConfigWrite(_) => "config_write",
            LauncherError::EntryPointMissing { .. } => "entry_point_missing",
            LauncherError::Spawn(_) => "spawn",
            LauncherError::Superseded => "superseded",
            LauncherError::InvalidConfig(_) => "invalid_config",
        }
    }

    /// Whether the requester is at fault (bad submission, no payload)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LauncherError::Validation(_) | LauncherError::Acquisition(_)
        )
    }
}
