use serde::{Deserialize, Serialize};

/// Lifecycle state of a transfer job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum TransferState {
    NotStarted = 0,
    Running = 1,
    /// Waiting on a user decision or paused by the user.
    Paused = 2,
    Interrupted = 3,
    Finished = 4,
}

impl TransferState {
    /// Decodes the value stored by [`as_u8`](Self::as_u8).
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Interrupted,
            4 => Self::Finished,
            _ => Self::NotStarted,
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` once the job can no longer make progress.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Interrupted | Self::Finished)
    }

    /// Returns `true` while the job is started and not yet terminal.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// Point-in-time progress of a transfer job, as read by a poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    pub job_id: String,
    pub state: TransferState,
    /// Human-readable status line.
    pub status: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub current_file: String,
    /// Size of the current file, -1 when unknown.
    pub current_file_size: i64,
    pub current_file_bytes: u64,
    pub total_bytes: u64,
    pub files_processed: u64,
    pub failures: u64,
    pub bytes_per_second: f64,
    /// Elapsed running time in milliseconds, paused time excluded.
    pub elapsed_ms: i64,
    /// Epoch milliseconds of completion, 0 until the job completes.
    pub end_date: i64,
}

impl TransferProgress {
    /// Fraction of the current file already processed, in `0.0..=1.0`.
    ///
    /// Returns 0.0 when the current file's size is unknown or empty.
    pub fn file_percent_done(&self) -> f64 {
        if self.current_file_size <= 0 {
            return 0.0;
        }
        (self.current_file_bytes as f64 / self.current_file_size as f64).min(1.0)
    }
}
