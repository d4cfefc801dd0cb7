//! bundle-launcher: unpack, configure and supervise an application bundle
//!
//! A launch takes an archive (uploaded bytes or a remote URL) plus a set of
//! options, unpacks the archive into a scratch workspace, writes the options
//! as `config.env` and as a `config.js` module inside the bundle, then runs the
//! bundle's entry file as a single supervised child whose console output is
//! fanned out to any number of log subscribers.
//!
//! # Modules
//!
//! - **storage**: Scratch workspace reset
//! - **archive**: Archive acquisition and extraction
//! - **config**: Option schema, merge and config artifacts
//! - **execution**: Entry discovery, supervision and log fan-out
//! - **controller**: The launch pipeline
//!
//! # Example
//!
//! ```ignore
//! use bundle_launcher::{ArchiveSource, LauncherBuilder, RunRequest};
//!
//! let launcher = LauncherBuilder::new().data_dir("/var/lib/launcher").build()?;
//! let mut logs = launcher.subscribe();
//!
//! let request = RunRequest::new().set("SESSION_ID", "abc123");
//! let report = launcher.launch(request, ArchiveSource::upload(bytes)).await?;
//! println!("{}", report.message());
//!
//! while let Some(event) = logs.recv().await {
//!     print!("{}", event.render());
//! }
//! ```

// Core modules
pub mod errors;
pub mod logging;

// Layered modules
pub mod archive;
pub mod config;
pub mod execution;
pub mod storage;

// Pipeline
pub mod controller;

// Public API
pub use archive::{ArchiveSource, ExtractorHandle, ExtractorOrigin};
pub use config::{ConfigMaterializer, ConfigSchema, OptionSpec, RunRequest, Settings, SESSION_ID};
pub use controller::{LaunchReport, Launcher, LauncherBuilder, LauncherConfig, SharedLauncher};
pub use errors::{LauncherError, Result};
pub use execution::{
    LogBroadcaster, LogEvent, OutputStream, ProcessConfig, ProcessSupervisor, RunStatus,
    Subscription, SupervisorState,
};
pub use storage::Workspace;
