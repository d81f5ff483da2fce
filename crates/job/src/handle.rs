//! Running jobs on their own thread.

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use stowage_transfer::{ProgressSource, TransferProgress, TransferState};
use tracing::debug;

use crate::JobError;
use crate::job::{FileJob, JobOutcome, run};

/// A job running on a dedicated thread.
///
/// Track it with a [`ProgressMonitor`](stowage_transfer::ProgressMonitor)
/// to get periodic snapshots.
pub struct JobHandle {
    job: Arc<dyn FileJob>,
    thread: Mutex<Option<JoinHandle<JobOutcome>>>,
}

impl JobHandle {
    /// Starts `job` on a new thread named after its id.
    pub fn spawn(job: Arc<dyn FileJob>) -> Result<Self, JobError> {
        let id = job.engine().id().to_string();
        let runner = Arc::clone(&job);
        let thread = thread::Builder::new()
            .name(format!("stowage-job-{}", &id[..8.min(id.len())]))
            .spawn(move || run(runner.as_ref()))?;
        debug!(job = %id, "job thread spawned");
        Ok(Self {
            job,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn job(&self) -> &Arc<dyn FileJob> {
        &self.job
    }

    pub fn state(&self) -> TransferState {
        self.job.engine().state()
    }

    pub fn interrupt(&self) {
        self.job.engine().interrupt();
    }

    pub fn pause(&self) {
        self.job.engine().pause();
    }

    pub fn resume(&self) {
        self.job.engine().resume();
    }

    /// Changes the throughput limit, if the job honours one.
    pub fn set_throughput_limit(&self, bytes_per_second: u64) -> bool {
        if !self.job.supports_throughput_limit() {
            return false;
        }
        self.job.engine().set_throughput_limit(bytes_per_second);
        true
    }

    pub fn progress(&self) -> TransferProgress {
        self.job.progress()
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(|t| t.is_finished())
    }

    /// Waits for the job thread. Only the first call gets the outcome.
    pub fn join(&self) -> Result<JobOutcome, JobError> {
        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(JobError::AlreadyJoined)?;
        thread.join().map_err(|payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            JobError::Panicked(message)
        })
    }
}

impl ProgressSource for JobHandle {
    fn id(&self) -> String {
        self.job.engine().id().to_string()
    }

    fn is_active(&self) -> bool {
        !self.state().is_terminal()
    }

    fn snapshot(&self) -> TransferProgress {
        self.progress()
    }
}
