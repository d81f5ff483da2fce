//! Byte accounting, stream copy and progress polling for transfer jobs.
//!
//! Everything here is safe to share between the job thread that performs
//! the transfer and the thread that samples its progress.

mod counter;
mod progress;
mod stream;
mod types;
mod validation;

pub use counter::ByteCounter;
pub use progress::{
    NoopUpdateControl, ProgressCallback, ProgressMonitor, ProgressSource, SpeedCalculator,
    UpdateControl,
};
pub use stream::{DEFAULT_BUFFER_SIZE, ThroughputLimit, TransferReader, copy_stream};
pub use types::{TransferProgress, TransferState};
pub use validation::validate_entry_path;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
