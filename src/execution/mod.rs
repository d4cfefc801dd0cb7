//! Execution layer: entry-point discovery, child supervision and log fan-out
//!
//! # Features
//!
//! - **Entry resolution**: bundle root and entry file inside the extracted archive
//! - **Supervision**: one child at a time, forced stop on restart
//! - **Streaming**: stdout/stderr chunks broadcast to any number of subscribers
//!
//! # Examples
//!
//! ```ignore
//! use bundle_launcher::execution::{LogBroadcaster, ProcessConfig, ProcessSupervisor};
//!
//! let broadcaster = LogBroadcaster::default();
//! let mut logs = broadcaster.subscribe();
//! let supervisor = ProcessSupervisor::new(broadcaster);
//! supervisor
//!     .start(&ProcessConfig::new("node").arg("index.js").cwd("/srv/bundle"), "run-1")
//!     .await?;
//! while let Some(event) = logs.recv().await {
//!     print!("{}", event.render());
//! }
//! ```

pub mod entry;
pub mod process;
pub mod stream;

pub use entry::{
    require_entry_file, resolve_bundle_root, resolve_entry_file, DEFAULT_ENTRY_CANDIDATES,
};
pub use process::{ExitRecord, ProcessConfig, ProcessSupervisor, RunStatus, SupervisorState};
pub use stream::{LogBroadcaster, LogEvent, OutputStream, Subscription, SubscriberId};
