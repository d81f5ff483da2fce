//! Destination writer contract and shared writer-side progress.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use stowage_file_ops::FileHandle;
use tempfile::SpooledTempFile;

use crate::{ArchiveError, ArchiveFormat, TarArchiver, ZipArchiver};

/// A destination that receives named entries.
///
/// Implementations own the underlying output stream. Callers must
/// serialize all calls; the job does so with its I/O lock.
pub trait DestinationWriter: Send {
    fn format(&self) -> ArchiveFormat;

    /// Streaming writers return an output stream from
    /// [`create_entry`](Self::create_entry) for regular files; the others
    /// read the source themselves.
    fn supports_streaming(&self) -> bool {
        self.format().supports_streaming()
    }

    /// Sets the archive comment. Formats without comments ignore it.
    fn set_comment(&mut self, comment: &str);

    /// Creates an entry named `entry_path` for `source`.
    ///
    /// Directories never get a stream. For regular files, streaming writers
    /// return the stream the caller must copy the file into, then confirm
    /// with [`finish_entry`](Self::finish_entry) or drop with
    /// [`abort_entry`](Self::abort_entry). Non-streaming writers consume
    /// `source` and return `None`; when that fails nothing of the entry is
    /// left in the output.
    fn create_entry(
        &mut self,
        entry_path: &str,
        source: &dyn FileHandle,
    ) -> Result<Option<Box<dyn Write + '_>>, ArchiveError>;

    /// Commits the streamed entry. An entry never confirmed is dropped.
    fn finish_entry(&mut self) -> Result<(), ArchiveError> {
        Ok(())
    }

    /// Discards the entry opened last, if not yet committed.
    fn abort_entry(&mut self) {}

    /// Finalizes the container once every entry has been written.
    fn post_process(&mut self) -> Result<(), ArchiveError>;

    /// Releases the output stream, finalizing first if still needed.
    fn close(&mut self) -> Result<(), ArchiveError>;

    /// Progress published by the writer, readable without the I/O lock.
    fn progress(&self) -> Arc<WriterProgress>;
}

/// Creates writers for a destination; injected into jobs.
pub trait WriterFactory: Send + Sync {
    fn open(
        &self,
        destination: &dyn FileHandle,
        format: ArchiveFormat,
    ) -> Result<Box<dyn DestinationWriter>, ArchiveError>;
}

/// Factory backed by [`open_archiver`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultWriterFactory;

impl WriterFactory for DefaultWriterFactory {
    fn open(
        &self,
        destination: &dyn FileHandle,
        format: ArchiveFormat,
    ) -> Result<Box<dyn DestinationWriter>, ArchiveError> {
        open_archiver(destination, format)
    }
}

/// Opens `destination` for writing and wraps it in the writer for `format`.
pub fn open_archiver(
    destination: &dyn FileHandle,
    format: ArchiveFormat,
) -> Result<Box<dyn DestinationWriter>, ArchiveError> {
    let out = destination.open_write()?;
    tracing::debug!(
        destination = %destination.absolute_path(false),
        %format,
        "opened archive writer"
    );
    Ok(match format {
        ArchiveFormat::Zip => Box::new(ZipArchiver::new(out)),
        ArchiveFormat::Tar => Box::new(TarArchiver::new(out, false)),
        ArchiveFormat::TarGz => Box::new(TarArchiver::new(out, true)),
    })
}

/// Entry bodies up to this size are spooled in memory, larger ones on disk.
const SPOOL_IN_MEMORY: usize = 8 * 1024 * 1024;

pub(crate) fn spool() -> SpooledTempFile {
    tempfile::spooled_tempfile(SPOOL_IN_MEMORY)
}

/// Writer-reported progress, shared with pollers.
#[derive(Debug)]
pub struct WriterProgress {
    current_entry: Mutex<Option<String>>,
    current_entry_length: AtomicI64,
    written_current: AtomicU64,
    total_written: AtomicU64,
}

impl Default for WriterProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl WriterProgress {
    pub fn new() -> Self {
        Self {
            current_entry: Mutex::new(None),
            current_entry_length: AtomicI64::new(-1),
            written_current: AtomicU64::new(0),
            total_written: AtomicU64::new(0),
        }
    }

    /// Marks `name` as the entry being written; `length` is -1 if unknown.
    pub fn begin_entry(&self, name: &str, length: i64) {
        *self.entry() = Some(name.to_string());
        self.written_current.store(0, Ordering::Release);
        self.current_entry_length.store(length, Ordering::Release);
    }

    pub fn add_written(&self, bytes: u64) {
        self.written_current.fetch_add(bytes, Ordering::AcqRel);
        self.total_written.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Clears the current entry; totals are kept.
    pub fn end_entry(&self) {
        *self.entry() = None;
        self.current_entry_length.store(-1, Ordering::Release);
        self.written_current.store(0, Ordering::Release);
    }

    /// Clears the current entry and takes its bytes back out of the total.
    pub fn discard_entry(&self) {
        let written = self.written_current.swap(0, Ordering::AcqRel);
        self.total_written.fetch_sub(written, Ordering::AcqRel);
        self.end_entry();
    }

    pub fn current_entry_name(&self) -> Option<String> {
        self.entry().clone()
    }

    /// Length of the current entry, -1 without one.
    pub fn current_entry_length(&self) -> i64 {
        self.current_entry_length.load(Ordering::Acquire)
    }

    pub fn written_bytes_current_entry(&self) -> u64 {
        self.written_current.load(Ordering::Acquire)
    }

    pub fn total_written_bytes(&self) -> u64 {
        self.total_written.load(Ordering::Acquire)
    }

    fn entry(&self) -> MutexGuard<'_, Option<String>> {
        self.current_entry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Reader that reports every byte it yields to a [`WriterProgress`].
pub(crate) struct ProgressReader<'a, R> {
    pub(crate) inner: R,
    pub(crate) progress: &'a WriterProgress,
}

impl<R: Read> Read for ProgressReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.progress.add_written(n as u64);
        Ok(n)
    }
}
