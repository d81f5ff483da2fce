//! Shared job engine: state, counters, current file, pause and cancellation.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant, SystemTime};

use stowage_file_ops::{Collision, FileHandle, FileSet, WriteSeek};
use stowage_transfer::{
    ByteCounter, DEFAULT_BUFFER_SIZE, NoopUpdateControl, SpeedCalculator, ThroughputLimit,
    TransferReader, TransferState, UpdateControl,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::decision::{DecisionAction, DecisionProvider, DecisionRequest, DecisionResponse};

/// Source stream handed out by [`JobEngine::open_input`].
pub type InputStream = TransferReader<Box<dyn Read + Send>>;

/// Collaborators and tunables injected into a job.
#[derive(Clone)]
pub struct JobContext {
    pub decisions: Arc<dyn DecisionProvider>,
    pub updates: Arc<dyn UpdateControl>,
    /// Bytes per second, 0 for unlimited.
    pub throughput_limit: u64,
    pub buffer_size: usize,
}

impl JobContext {
    pub fn new(decisions: Arc<dyn DecisionProvider>) -> Self {
        Self {
            decisions,
            updates: Arc::new(NoopUpdateControl),
            throughput_limit: 0,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_updates(mut self, updates: Arc<dyn UpdateControl>) -> Self {
        self.updates = updates;
        self
    }

    pub fn with_throughput_limit(mut self, bytes_per_second: u64) -> Self {
        self.throughput_limit = bytes_per_second;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }
}

#[derive(Debug, Default)]
struct Timing {
    started: Option<Instant>,
    stopped: Option<Instant>,
    paused_since: Option<Instant>,
    paused_total: Duration,
}

impl Timing {
    fn pause(&mut self) {
        if self.paused_since.is_none() {
            self.paused_since = Some(Instant::now());
        }
    }

    fn resume(&mut self) {
        if let Some(since) = self.paused_since.take() {
            self.paused_total += since.elapsed();
        }
    }

    fn elapsed(&self) -> Duration {
        let Some(started) = self.started else {
            return Duration::ZERO;
        };
        let now = self.stopped.unwrap_or_else(Instant::now);
        let paused = self.paused_total
            + self
                .paused_since
                .map_or(Duration::ZERO, |since| now.saturating_duration_since(since));
        now.saturating_duration_since(started).saturating_sub(paused)
    }
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// State shared by every file job.
///
/// The job thread mutates it; pollers read it concurrently through atomics.
pub struct JobEngine {
    id: String,
    files: FileSet,
    state: AtomicU8,
    cancel: CancellationToken,
    input_cancel: Mutex<Option<CancellationToken>>,

    user_paused: Mutex<bool>,
    deciding: AtomicBool,
    pause_changed: Condvar,
    timing: Mutex<Timing>,

    current_file: RwLock<Option<Arc<dyn FileHandle>>>,
    current_file_counter: Arc<ByteCounter>,
    completed_bytes: ByteCounter,
    files_processed: AtomicU64,
    failures: AtomicU64,
    auto_skip: AtomicBool,
    start_date: AtomicI64,
    end_date: AtomicI64,

    speed: SpeedCalculator,
    last_sampled_bytes: AtomicU64,

    throughput_limit: Arc<ThroughputLimit>,
    buffer_size: usize,
    decisions: Arc<dyn DecisionProvider>,
    updates: Arc<dyn UpdateControl>,
}

impl JobEngine {
    pub fn new(files: FileSet, context: JobContext) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            files,
            state: AtomicU8::new(TransferState::NotStarted.as_u8()),
            cancel: CancellationToken::new(),
            input_cancel: Mutex::new(None),
            user_paused: Mutex::new(false),
            deciding: AtomicBool::new(false),
            pause_changed: Condvar::new(),
            timing: Mutex::new(Timing::default()),
            current_file: RwLock::new(None),
            current_file_counter: Arc::new(ByteCounter::new()),
            completed_bytes: ByteCounter::new(),
            files_processed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            auto_skip: AtomicBool::new(false),
            start_date: AtomicI64::new(0),
            end_date: AtomicI64::new(0),
            speed: SpeedCalculator::default(),
            last_sampled_bytes: AtomicU64::new(0),
            throughput_limit: Arc::new(ThroughputLimit::new(context.throughput_limit)),
            buffer_size: context.buffer_size.max(1),
            decisions: context.decisions,
            updates: context.updates,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn files(&self) -> &FileSet {
        &self.files
    }

    pub fn updates(&self) -> &Arc<dyn UpdateControl> {
        &self.updates
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    // --- state ---

    pub fn state(&self) -> TransferState {
        TransferState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_interrupted(&self) -> bool {
        self.state() == TransferState::Interrupted
    }

    fn transition(&self, from: TransferState, to: TransferState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Moves a fresh job to Running. Returns `false` if it already started.
    pub fn start(&self) -> bool {
        if !self.transition(TransferState::NotStarted, TransferState::Running) {
            return false;
        }
        self.lock_timing().started = Some(Instant::now());
        self.start_date.store(now_millis(), Ordering::Release);
        true
    }

    /// Interrupts the job. Safe to call from any thread, any number of times.
    ///
    /// Returns `true` for the call that actually interrupted.
    pub fn interrupt(&self) -> bool {
        let mut current = self.state();
        loop {
            if current.is_terminal() {
                return false;
            }
            match self.state.compare_exchange(
                current.as_u8(),
                TransferState::Interrupted.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = TransferState::from_u8(actual),
            }
        }

        info!(job = %self.id, "job interrupted");
        self.cancel.cancel();
        {
            let mut timing = self.lock_timing();
            timing.resume();
            timing.stopped.get_or_insert_with(Instant::now);
        }
        // Wake a job thread blocked in a user pause.
        let _paused = self.lock_pause();
        self.pause_changed.notify_all();
        true
    }

    /// Marks a job that ran to completion as Finished. Interrupted jobs
    /// stay Interrupted.
    pub fn finish(&self) -> TransferState {
        if self.transition(TransferState::Running, TransferState::Finished)
            || self.transition(TransferState::Paused, TransferState::Finished)
        {
            let mut timing = self.lock_timing();
            timing.resume();
            timing.stopped = Some(Instant::now());
            self.end_date.store(now_millis(), Ordering::Release);
        }
        self.state()
    }

    fn enter_paused(&self) {
        if self.transition(TransferState::Running, TransferState::Paused) {
            self.lock_timing().pause();
        }
    }

    fn leave_paused(&self) {
        if self.transition(TransferState::Paused, TransferState::Running) {
            self.lock_timing().resume();
        }
    }

    // --- user pause ---

    /// Pauses the job at its next pause point.
    pub fn pause(&self) {
        let mut paused = self.lock_pause();
        if !*paused && self.state().is_active() {
            *paused = true;
            self.enter_paused();
            debug!(job = %self.id, "job paused");
        }
    }

    /// Lifts a user pause. A job waiting for a decision stays Paused until
    /// the decision is answered.
    pub fn resume(&self) {
        let mut paused = self.lock_pause();
        if *paused {
            *paused = false;
            if !self.deciding.load(Ordering::Acquire) {
                self.leave_paused();
            }
            self.pause_changed.notify_all();
            debug!(job = %self.id, "job resumed");
        }
    }

    pub fn is_paused_by_user(&self) -> bool {
        *self.lock_pause()
    }

    /// Blocks the job thread while the user has the job paused.
    pub fn wait_if_paused(&self) {
        let mut paused = self.lock_pause();
        while *paused && !self.cancel.is_cancelled() {
            paused = self
                .pause_changed
                .wait(paused)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    // --- current file and counters ---

    /// Makes `file` the current file, folding the previous file's bytes
    /// into the completed total.
    pub fn next_file(&self, file: &Arc<dyn FileHandle>) {
        self.completed_bytes.absorb(&self.current_file_counter);
        *self
            .current_file
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(file));
        self.files_processed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn current_file(&self) -> Option<Arc<dyn FileHandle>> {
        self.current_file
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Name of the current file, empty before the first file.
    pub fn current_filename(&self) -> String {
        self.current_file().map(|f| f.name()).unwrap_or_default()
    }

    /// Size of the current file, -1 without one.
    pub fn current_file_size(&self) -> i64 {
        self.current_file().map_or(-1, |f| f.size())
    }

    pub fn current_file_counter(&self) -> &Arc<ByteCounter> {
        &self.current_file_counter
    }

    /// Bytes of completed files plus the current file's counter.
    pub fn total_bytes(&self) -> u64 {
        self.completed_bytes.value() + self.current_file_counter.value()
    }

    pub fn files_processed(&self) -> u64 {
        self.files_processed.load(Ordering::Acquire)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::AcqRel);
    }

    /// Epoch milliseconds the job started, 0 before.
    pub fn start_date(&self) -> i64 {
        self.start_date.load(Ordering::Acquire)
    }

    /// Epoch milliseconds the job finished, 0 unless Finished.
    pub fn end_date(&self) -> i64 {
        self.end_date.load(Ordering::Acquire)
    }

    /// Running time, paused time excluded.
    pub fn elapsed(&self) -> Duration {
        self.lock_timing().elapsed()
    }

    /// Feeds the byte total into the speed window and returns the rate.
    pub fn sample_speed(&self, total_bytes: u64) -> f64 {
        let previous = self.last_sampled_bytes.swap(total_bytes, Ordering::AcqRel);
        self.speed.add_sample(total_bytes.saturating_sub(previous));
        self.speed.bytes_per_second()
    }

    // --- throughput ---

    pub fn throughput_limit(&self) -> u64 {
        self.throughput_limit.get()
    }

    /// Changes the limit; takes effect on the next read.
    pub fn set_throughput_limit(&self, bytes_per_second: u64) {
        self.throughput_limit.set(bytes_per_second);
    }

    // --- source streams ---

    /// Opens `file` for reading, counting into the current-file counter.
    ///
    /// The stream stops with `Interrupted` once the job is interrupted or
    /// [`close_input`](Self::close_input) is called.
    pub fn open_input(&self, file: &dyn FileHandle) -> io::Result<InputStream> {
        Ok(self
            .open_counted(file)?
            .with_limit(Arc::clone(&self.throughput_limit)))
    }

    /// Wraps `file` so that a writer reading it itself goes through
    /// [`open_input`](Self::open_input) semantics, minus the throughput
    /// limit.
    pub fn source<'a>(&'a self, file: &'a dyn FileHandle) -> JobSource<'a> {
        JobSource { engine: self, file }
    }

    fn open_counted(&self, file: &dyn FileHandle) -> io::Result<InputStream> {
        let token = self.cancel.child_token();
        let reader = file.open_read()?;
        *self.lock_input() = Some(token.clone());
        Ok(TransferReader::new(
            reader,
            Arc::clone(&self.current_file_counter),
            token,
        ))
    }

    /// Cancels the source stream handed out last, if any.
    pub fn close_input(&self) {
        if let Some(token) = self.lock_input().take() {
            token.cancel();
        }
    }

    // --- decisions ---

    /// Asks the decision provider, holding the job in Paused meanwhile.
    pub fn request_decision(&self, request: DecisionRequest) -> DecisionResponse {
        {
            let _paused = self.lock_pause();
            self.deciding.store(true, Ordering::Release);
            self.enter_paused();
        }
        debug!(job = %self.id, title = %request.title, "waiting for decision");
        let response = self
            .decisions
            .request_decision(&request)
            .restrict_to(&request);

        let paused = self.lock_pause();
        self.deciding.store(false, Ordering::Release);
        if !*paused {
            self.leave_paused();
        }
        response
    }

    /// Presents an error offering `options`.
    ///
    /// Once the user picked "skip all", errors offering skip are skipped
    /// without asking. Cancel or dismissal interrupts the job.
    pub fn show_error(
        &self,
        title: &str,
        message: &str,
        file: Option<&dyn FileHandle>,
        options: &[DecisionAction],
    ) -> Option<DecisionAction> {
        if options.contains(&DecisionAction::Skip) && self.auto_skip.load(Ordering::Acquire) {
            return Some(DecisionAction::Skip);
        }

        let request = DecisionRequest::error(
            self.id.as_str(),
            title,
            message,
            file.map(|f| f.absolute_path(false)),
            options,
        );
        let response = self.request_decision(request);
        match response.action {
            None | Some(DecisionAction::Cancel) => {
                self.interrupt();
            }
            Some(DecisionAction::Skip) if response.apply_to_all => {
                self.auto_skip.store(true, Ordering::Release);
            }
            _ => {}
        }
        response.action
    }

    /// Presents a destination collision, offering overwrite or cancel.
    pub fn show_collision(
        &self,
        collision: Collision,
        destination: &dyn FileHandle,
    ) -> Option<DecisionAction> {
        let request = DecisionRequest::collision(
            self.id.as_str(),
            collision,
            destination.absolute_path(false),
        );
        self.request_decision(request).action
    }

    fn lock_timing(&self) -> std::sync::MutexGuard<'_, Timing> {
        self.timing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pause(&self) -> std::sync::MutexGuard<'_, bool> {
        self.user_paused
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_input(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.input_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Source file as seen by a non-streaming writer: reads are counted and
/// stop once the job is interrupted.
#[derive(Debug)]
pub struct JobSource<'a> {
    engine: &'a JobEngine,
    file: &'a dyn FileHandle,
}

impl FileHandle for JobSource<'_> {
    fn name(&self) -> String {
        self.file.name()
    }

    fn absolute_path(&self, resolve_symlinks: bool) -> String {
        self.file.absolute_path(resolve_symlinks)
    }

    fn canonical_path(&self) -> String {
        self.file.canonical_path()
    }

    fn exists(&self) -> bool {
        self.file.exists()
    }

    fn is_directory(&self) -> bool {
        self.file.is_directory()
    }

    fn is_symlink(&self) -> bool {
        self.file.is_symlink()
    }

    fn size(&self) -> i64 {
        self.file.size()
    }

    fn modified(&self) -> Option<SystemTime> {
        self.file.modified()
    }

    fn parent(&self) -> Option<Arc<dyn FileHandle>> {
        self.file.parent()
    }

    fn list(&self) -> io::Result<Vec<Arc<dyn FileHandle>>> {
        self.file.list()
    }

    fn open_read(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.engine.open_counted(self.file)?))
    }

    fn open_write(&self) -> io::Result<Box<dyn WriteSeek>> {
        Err(io::Error::new(
            io::ErrorKind::PermissionDenied,
            "job sources are read-only",
        ))
    }
}

impl std::fmt::Debug for JobEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobEngine")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("files", &self.files.len())
            .finish_non_exhaustive()
    }
}
