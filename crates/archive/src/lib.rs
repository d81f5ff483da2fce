//! Archive destination writers.
//!
//! Defines the [`DestinationWriter`] contract used by archive jobs and the
//! static format capability table, with zip (streaming) and tar / tar.gz
//! (non-streaming) implementations on top of the `zip`, `tar` and `flate2`
//! crates.

mod format;
mod tar_writer;
mod writer;
mod zip_writer;

pub use format::{ArchiveFormat, SUPPORTS_FILE_STREAMING};
pub use tar_writer::TarArchiver;
pub use writer::{
    DefaultWriterFactory, DestinationWriter, WriterFactory, WriterProgress, open_archiver,
};
pub use zip_writer::ZipArchiver;

/// Errors produced by destination writers.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("unknown archive format: {0}")]
    UnknownFormat(String),

    #[error("invalid entry: {0}")]
    InvalidEntry(String),

    #[error("writer returned no stream for {0}")]
    MissingStream(String),

    #[error("{entry}: expected {expected} bytes, read {actual}")]
    SizeMismatch {
        entry: String,
        expected: u64,
        actual: u64,
    },

    #[error("archive writer is closed")]
    Closed,

    #[error("archive output is damaged by an earlier write failure")]
    Damaged,

    #[error("archive writer panicked: {0}")]
    Panicked(String),
}
