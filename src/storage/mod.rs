//! Storage layer: the scratch workspace each run unpacks into
//!
//! The workspace is rebuilt from nothing at the start of every run so a
//! previous bundle can never leak files into the next one.

pub mod workspace;
pub use workspace::{Workspace, DOWNLOAD_DIR, EXTRACT_DIR};
