//! Packs a file set into a single archive.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use stowage_archive::{
    ArchiveError, ArchiveFormat, DefaultWriterFactory, DestinationWriter, WriterFactory,
    WriterProgress,
};
use stowage_file_ops::{FileHandle, FileSet, check_for_collision, relative_entry_path};
use stowage_transfer::{copy_stream, validate_entry_path};
use tracing::{debug, info, warn};

use crate::decision::DecisionAction;
use crate::engine::{JobContext, JobEngine, now_millis};
use crate::job::FileJob;

const ERROR_TITLE: &str = "Packing error";

/// Runs a writer call, turning a panic into [`ArchiveError::Panicked`].
fn guarded<T>(f: impl FnOnce() -> Result<T, ArchiveError>) -> Result<T, ArchiveError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(ArchiveError::Panicked(panic_message(payload.as_ref())))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Archives every file of a [`FileSet`] into `destination`.
///
/// Entries are named relative to the set's base folder. The writer is
/// created in `job_started` and closed in `job_stopped`; every call into
/// it happens under `io_lock`, so a close never overlaps a write.
pub struct ArchiveJob {
    engine: JobEngine,
    destination: Arc<dyn FileHandle>,
    format: ArchiveFormat,
    comment: Option<String>,
    base_folder_path: String,
    factory: Arc<dyn WriterFactory>,

    io_lock: Mutex<Option<Box<dyn DestinationWriter>>>,
    writer_progress: RwLock<Option<Arc<WriterProgress>>>,
    streaming: AtomicBool,
    post_processing: AtomicBool,
    end_date: AtomicI64,
}

impl ArchiveJob {
    pub fn new(
        files: FileSet,
        destination: Arc<dyn FileHandle>,
        format: ArchiveFormat,
        comment: Option<String>,
        context: JobContext,
    ) -> Self {
        let base_folder_path = files.base_folder_path();
        Self {
            engine: JobEngine::new(files, context),
            destination,
            format,
            comment: comment.filter(|c| !c.is_empty()),
            base_folder_path,
            factory: Arc::new(DefaultWriterFactory),
            io_lock: Mutex::new(None),
            writer_progress: RwLock::new(None),
            streaming: AtomicBool::new(format.supports_streaming()),
            post_processing: AtomicBool::new(false),
            end_date: AtomicI64::new(0),
        }
    }

    /// Replaces the writer factory.
    pub fn with_writer_factory(mut self, factory: Arc<dyn WriterFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn destination(&self) -> &Arc<dyn FileHandle> {
        &self.destination
    }

    pub fn format(&self) -> ArchiveFormat {
        self.format
    }

    pub fn is_post_processing(&self) -> bool {
        self.post_processing.load(Ordering::Acquire)
    }

    fn lock_writer(&self) -> MutexGuard<'_, Option<Box<dyn DestinationWriter>>> {
        self.io_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Calls `f` on the writer under the I/O lock.
    fn with_writer<T>(
        &self,
        f: impl FnOnce(&mut dyn DestinationWriter) -> Result<T, ArchiveError>,
    ) -> Result<T, ArchiveError> {
        let mut slot = self.lock_writer();
        let writer = slot.as_deref_mut().ok_or(ArchiveError::Closed)?;
        guarded(|| f(writer))
    }

    /// Writer-side progress, only for a non-streaming writer.
    fn non_streaming_progress(&self) -> Option<Arc<WriterProgress>> {
        if self.streaming.load(Ordering::Acquire) {
            return None;
        }
        self.writer_progress
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn open_writer(&self) -> Result<Box<dyn DestinationWriter>, ArchiveError> {
        guarded(|| {
            let mut writer = self.factory.open(self.destination.as_ref(), self.format)?;
            if let Some(comment) = &self.comment {
                writer.set_comment(comment);
            }
            Ok(writer)
        })
    }

    fn entry_path(&self, file: &dyn FileHandle) -> Result<String, ArchiveError> {
        let path = file.absolute_path(false);
        let entry = relative_entry_path(&self.base_folder_path, &path)
            .map_err(|e| ArchiveError::InvalidEntry(e.to_string()))?;
        validate_entry_path(&entry).map_err(|e| ArchiveError::InvalidEntry(e.to_string()))?;
        Ok(entry)
    }

    /// One attempt at archiving `file`; directories recurse from here.
    ///
    /// `Ok(false)` means the directory itself went in but a child failed.
    /// A linked directory gets its own entry but is not descended into.
    fn try_process(&self, file: &Arc<dyn FileHandle>) -> Result<bool, ArchiveError> {
        let entry = self.entry_path(file.as_ref())?;

        if file.is_directory() {
            self.with_writer(|writer| writer.create_entry(&entry, file.as_ref()).map(drop))?;
            if file.is_symlink() {
                debug!(job = %self.engine.id(), entry = %entry, "not following directory link");
                return Ok(true);
            }
            let children = file.list()?;
            let mut all_ok = true;
            for child in &children {
                if self.engine.is_interrupted() {
                    return Ok(false);
                }
                self.engine.next_file(child);
                all_ok &= self.process_file(child);
            }
            return Ok(all_ok);
        }

        let written = if self.streaming.load(Ordering::Acquire) {
            let mut input = self.engine.open_input(file.as_ref())?;
            let buffer_size = self.engine.buffer_size();
            self.with_writer(|writer| {
                let copied = match writer.create_entry(&entry, file.as_ref())? {
                    Some(mut out) => copy_stream(&mut input, &mut out, buffer_size),
                    None => return Err(ArchiveError::MissingStream(entry.clone())),
                };
                match copied {
                    Ok(bytes) => writer.finish_entry().map(|()| Some(bytes)),
                    Err(e) => {
                        writer.abort_entry();
                        Err(e.into())
                    }
                }
            })
        } else {
            let source = self.engine.source(file.as_ref());
            self.with_writer(|writer| writer.create_entry(&entry, &source).map(|_| None))
        };
        self.engine.close_input();

        match written? {
            Some(bytes) => debug!(job = %self.engine.id(), entry = %entry, bytes, "entry written"),
            None => debug!(job = %self.engine.id(), entry = %entry, "entry written by archiver"),
        }
        Ok(true)
    }
}

impl FileJob for ArchiveJob {
    fn engine(&self) -> &JobEngine {
        &self.engine
    }

    fn job_started(&self) {
        let collision = check_for_collision(None, self.destination.as_ref());
        if collision.is_collision() {
            match self
                .engine
                .show_collision(collision, self.destination.as_ref())
            {
                Some(DecisionAction::Overwrite) => {
                    debug!(job = %self.engine.id(), ?collision, "overwriting destination");
                }
                _ => {
                    self.engine.interrupt();
                    return;
                }
            }
        }

        loop {
            if self.engine.is_interrupted() {
                return;
            }
            match self.open_writer() {
                Ok(writer) => {
                    let streaming = writer.supports_streaming();
                    *self
                        .writer_progress
                        .write()
                        .unwrap_or_else(PoisonError::into_inner) = Some(writer.progress());
                    self.streaming.store(streaming, Ordering::Release);
                    *self.lock_writer() = Some(writer);
                    info!(
                        job = %self.engine.id(),
                        destination = %self.destination.absolute_path(false),
                        format = %self.format,
                        streaming,
                        "archive opened"
                    );
                    return;
                }
                Err(e) => {
                    warn!(job = %self.engine.id(), error = %e, "cannot open archive");
                    let choice = self.engine.show_error(
                        ERROR_TITLE,
                        &format!("Cannot write file {}: {e}", self.destination.name()),
                        Some(self.destination.as_ref()),
                        &[DecisionAction::Cancel, DecisionAction::Retry],
                    );
                    if choice != Some(DecisionAction::Retry) {
                        self.engine.interrupt();
                        return;
                    }
                }
            }
        }
    }

    fn process_file(&self, file: &Arc<dyn FileHandle>) -> bool {
        if self.engine.is_interrupted() {
            return false;
        }
        self.engine.wait_if_paused();

        loop {
            if self.engine.is_interrupted() {
                return false;
            }
            let error = match self.try_process(file) {
                Ok(ok) => return ok,
                Err(e) => e,
            };
            if self.engine.is_interrupted() {
                debug!(job = %self.engine.id(), error = %error, "error after interruption");
                return false;
            }

            debug!(
                job = %self.engine.id(),
                file = %file.absolute_path(false),
                error = %error,
                "transfer failed"
            );
            let choice = self.engine.show_error(
                ERROR_TITLE,
                &format!("Error while transferring {}: {error}", file.absolute_path(false)),
                Some(file.as_ref()),
                &[
                    DecisionAction::Skip,
                    DecisionAction::Retry,
                    DecisionAction::Cancel,
                ],
            );
            match choice {
                Some(DecisionAction::Retry) => {
                    self.engine.current_file_counter().reset();
                }
                Some(DecisionAction::Skip) => {
                    self.engine.record_failure();
                    return false;
                }
                _ => return false,
            }
        }
    }

    fn job_stopped(&self) {
        if !self.engine.is_interrupted() {
            self.post_processing.store(true, Ordering::Release);
            self.engine.updates().resume_updates();
            match self.with_writer(|writer| writer.post_process()) {
                Ok(()) => {
                    self.engine.updates().pause_updates();
                    self.end_date.store(now_millis(), Ordering::Release);
                    info!(job = %self.engine.id(), "archive finalized");
                }
                Err(e) => {
                    warn!(job = %self.engine.id(), error = %e, "archive post-processing failed");
                }
            }
        }

        self.engine.close_input();

        let mut slot = self.lock_writer();
        if let Some(mut writer) = slot.take() {
            if let Err(e) = guarded(|| writer.close()) {
                warn!(job = %self.engine.id(), error = %e, "cannot close archive");
            }
        }
    }

    fn has_folder_changed(&self, folder: &dyn FileHandle) -> bool {
        self.destination
            .parent()
            .is_some_and(|parent| folder.canonical_equals(parent.as_ref()))
    }

    fn current_file_size(&self) -> i64 {
        match self.non_streaming_progress() {
            Some(progress) if progress.current_entry_name().is_some() => {
                progress.current_entry_length()
            }
            Some(_) => -1,
            None => self.engine.current_file_size(),
        }
    }

    fn current_file_bytes(&self) -> u64 {
        let counter = self.engine.current_file_counter();
        if let Some(progress) = self.non_streaming_progress() {
            counter.set(progress.written_bytes_current_entry());
        }
        counter.value()
    }

    fn total_bytes(&self) -> u64 {
        self.current_file_bytes();
        match self.non_streaming_progress() {
            Some(progress) => progress.total_written_bytes(),
            None => self.engine.total_bytes(),
        }
    }

    fn status_string(&self) -> String {
        if self.is_post_processing() {
            let entry = self
                .writer_progress
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .and_then(|p| p.current_entry_name());
            return match entry {
                Some(name) => format!("packing '{name}'"),
                None => "preparing archive: can take a while".to_string(),
            };
        }
        format!("indexing '{}'", self.engine.current_filename())
    }

    fn end_date(&self) -> i64 {
        self.end_date.load(Ordering::Acquire)
    }

    fn supports_throughput_limit(&self) -> bool {
        self.format.supports_streaming()
    }
}
