//! The file job lifecycle and its runner.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use stowage_file_ops::FileHandle;
use stowage_transfer::{TransferProgress, TransferState};
use tracing::{debug, info};

use crate::engine::JobEngine;

/// A job that visits every file of its [`FileSet`](stowage_file_ops::FileSet).
///
/// [`run`] drives the hooks on the job thread: `job_started` once,
/// `process_file` per top-level file, then `job_stopped` exactly once,
/// interrupted or not. The accessors may be called from any thread at any
/// time, including before start and after stop.
pub trait FileJob: Send + Sync {
    fn engine(&self) -> &JobEngine;

    /// Prepares the job. Interrupt the engine to abort before any file.
    fn job_started(&self);

    /// Processes one file or directory; returns `false` on failure or skip.
    fn process_file(&self, file: &Arc<dyn FileHandle>) -> bool;

    /// Releases resources. Runs once, after the last file or interruption.
    fn job_stopped(&self);

    /// Whether the job changes the content of `folder`.
    fn has_folder_changed(&self, folder: &dyn FileHandle) -> bool;

    /// Size of the file being processed, -1 when unknown.
    fn current_file_size(&self) -> i64 {
        self.engine().current_file_size()
    }

    fn current_file_bytes(&self) -> u64 {
        self.engine().current_file_counter().value()
    }

    fn total_bytes(&self) -> u64 {
        self.engine().total_bytes()
    }

    fn status_string(&self) -> String {
        format!("processing '{}'", self.engine().current_filename())
    }

    /// Epoch milliseconds of completion, 0 until then.
    fn end_date(&self) -> i64 {
        self.engine().end_date()
    }

    fn supports_throughput_limit(&self) -> bool {
        true
    }

    fn progress(&self) -> TransferProgress {
        let engine = self.engine();
        let total_bytes = self.total_bytes();
        TransferProgress {
            job_id: engine.id().to_string(),
            state: engine.state(),
            status: self.status_string(),
            current_file: engine.current_filename(),
            current_file_size: self.current_file_size(),
            current_file_bytes: self.current_file_bytes(),
            total_bytes,
            files_processed: engine.files_processed(),
            failures: engine.failures(),
            bytes_per_second: engine.sample_speed(total_bytes),
            elapsed_ms: engine.elapsed().as_millis() as i64,
            end_date: self.end_date(),
        }
    }
}

/// Summary of a job that ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_id: String,
    pub state: TransferState,
    pub files_processed: u64,
    pub failures: u64,
    pub total_bytes: u64,
    pub elapsed_ms: i64,
    pub end_date: i64,
}

impl JobOutcome {
    pub fn of(job: &dyn FileJob) -> Self {
        let engine = job.engine();
        Self {
            job_id: engine.id().to_string(),
            state: engine.state(),
            files_processed: engine.files_processed(),
            failures: engine.failures(),
            total_bytes: job.total_bytes(),
            elapsed_ms: engine.elapsed().as_millis() as i64,
            end_date: job.end_date(),
        }
    }

    /// Finished, nothing skipped, and the output finalized (a non-zero
    /// end date).
    pub fn is_success(&self) -> bool {
        self.state == TransferState::Finished && self.failures == 0 && self.end_date > 0
    }
}

/// Runs `job` to completion on the calling thread.
pub fn run(job: &dyn FileJob) -> JobOutcome {
    let engine = job.engine();
    if !engine.start() {
        debug!(job = %engine.id(), state = ?engine.state(), "job already started");
        return JobOutcome::of(job);
    }
    info!(job = %engine.id(), files = engine.files().len(), "job started");

    job.job_started();
    for file in engine.files().iter() {
        if engine.is_interrupted() {
            break;
        }
        engine.next_file(file);
        if !job.process_file(file) {
            debug!(job = %engine.id(), file = %file.absolute_path(false), "file not processed");
        }
    }
    job.job_stopped();

    let state = engine.finish();
    let outcome = JobOutcome::of(job);
    info!(
        job = %outcome.job_id,
        ?state,
        files = outcome.files_processed,
        failures = outcome.failures,
        bytes = outcome.total_bytes,
        "job stopped"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::JobContext;
    use crate::testing::Scripted;
    use std::sync::Mutex;
    use stowage_file_ops::{FileSet, MemoryFs};

    /// Job that records hook calls and can interrupt itself.
    struct Probe {
        engine: JobEngine,
        calls: Mutex<Vec<String>>,
        interrupt_at_start: bool,
        interrupt_after: Option<String>,
    }

    impl Probe {
        fn new(fs: &MemoryFs) -> Self {
            let files = FileSet::from_files(vec![
                fs.file("/src/a.txt"),
                fs.file("/src/b.txt"),
                fs.file("/src/c.txt"),
            ]);
            Self {
                engine: JobEngine::new(files, JobContext::new(Arc::new(Scripted::new([])))),
                calls: Mutex::new(Vec::new()),
                interrupt_at_start: false,
                interrupt_after: None,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl FileJob for Probe {
        fn engine(&self) -> &JobEngine {
            &self.engine
        }

        fn job_started(&self) {
            self.calls.lock().unwrap().push("started".into());
            if self.interrupt_at_start {
                self.engine.interrupt();
            }
        }

        fn process_file(&self, file: &Arc<dyn FileHandle>) -> bool {
            let name = file.name();
            self.calls.lock().unwrap().push(name.clone());
            self.engine.current_file_counter().add(file.size() as u64);
            if self.interrupt_after.as_deref() == Some(name.as_str()) {
                self.engine.interrupt();
            }
            true
        }

        fn job_stopped(&self) {
            self.calls.lock().unwrap().push("stopped".into());
        }

        fn has_folder_changed(&self, _folder: &dyn FileHandle) -> bool {
            false
        }
    }

    fn fs() -> MemoryFs {
        let fs = MemoryFs::new();
        fs.add_file("/src/a.txt", b"aaaa")
            .add_file("/src/b.txt", b"bb")
            .add_file("/src/c.txt", b"c");
        fs
    }

    #[test]
    fn runs_hooks_in_order() {
        let fs = fs();
        let job = Probe::new(&fs);
        let outcome = run(&job);

        assert_eq!(job.calls(), ["started", "a.txt", "b.txt", "c.txt", "stopped"]);
        assert_eq!(outcome.state, TransferState::Finished);
        assert_eq!(outcome.files_processed, 3);
        assert_eq!(outcome.total_bytes, 7);
        assert!(outcome.end_date > 0);
        assert!(outcome.is_success());
    }

    #[test]
    fn interrupt_at_start_skips_files_but_stops() {
        let fs = fs();
        let mut job = Probe::new(&fs);
        job.interrupt_at_start = true;
        let outcome = run(&job);

        assert_eq!(job.calls(), ["started", "stopped"]);
        assert_eq!(outcome.state, TransferState::Interrupted);
        assert_eq!(outcome.end_date, 0);
    }

    #[test]
    fn interrupt_mid_run_stops_iteration() {
        let fs = fs();
        let mut job = Probe::new(&fs);
        job.interrupt_after = Some("a.txt".into());
        let outcome = run(&job);

        assert_eq!(job.calls(), ["started", "a.txt", "stopped"]);
        assert_eq!(outcome.state, TransferState::Interrupted);
        assert!(!outcome.is_success());
    }

    #[test]
    fn second_run_is_a_no_op() {
        let fs = fs();
        let job = Probe::new(&fs);
        run(&job);
        let again = run(&job);
        assert_eq!(job.calls().len(), 5);
        assert_eq!(again.state, TransferState::Finished);
    }

    #[test]
    fn default_progress_snapshot() {
        let fs = fs();
        let job = Probe::new(&fs);
        let before = job.progress();
        assert_eq!(before.state, TransferState::NotStarted);
        assert_eq!(before.current_file_size, -1);
        assert_eq!(before.status, "processing ''");

        run(&job);
        let after = job.progress();
        assert_eq!(after.state, TransferState::Finished);
        assert_eq!(after.current_file, "c.txt");
        assert_eq!(after.current_file_size, 1);
        assert_eq!(after.total_bytes, 7);
        assert!(job.supports_throughput_limit());
    }
}
