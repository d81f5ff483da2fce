//! Filesystem abstraction for transfer jobs.
//!
//! Provides the [`FileHandle`] trait with local and in-memory
//! implementations, ordered source sets, and destination collision checks.

mod collision;
mod file;
mod file_set;
mod local;
mod memory;

pub use collision::{Collision, check_for_collision};
pub use file::{FileHandle, WriteSeek, is_separator};
pub use file_set::{FileSet, relative_entry_path};
pub use local::LocalFile;
pub use memory::{MemoryFile, MemoryFs};

/// Errors produced by file-ops helpers.
#[derive(Debug, thiserror::Error)]
pub enum FileOpsError {
    #[error("{path} is not inside base folder {base}")]
    OutsideBase { path: String, base: String },
}
