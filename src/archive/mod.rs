//! Archive layer: getting the bundle archive onto disk and unpacking it
//!
//! - **acquire**: upload or remote fetch into the download directory
//! - **extract**: external decompression tool, optionally password-protected

pub mod acquire;
pub mod extract;

pub use acquire::{ArchiveSource, DEFAULT_ARCHIVE_NAME};
pub use extract::{ExtractorHandle, ExtractorOrigin};
