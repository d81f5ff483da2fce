//! Streaming zip writer.
//!
//! Entry bodies are spooled and only reach the archive once the caller
//! confirms them with [`DestinationWriter::finish_entry`], so an aborted
//! copy leaves no trace in the container.

use std::io::{self, Seek, SeekFrom, Write};
use std::sync::Arc;

use stowage_file_ops::{FileHandle, WriteSeek};
use tempfile::SpooledTempFile;
use tracing::{debug, warn};
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::FileOptions;

use crate::writer::spool;
use crate::{ArchiveError, ArchiveFormat, DestinationWriter, WriterProgress};

/// Entry handed out by `create_entry`, waiting for `finish_entry`.
struct PendingEntry {
    name: String,
    options: FileOptions,
    body: SpooledTempFile,
}

/// Zip archive writer; file entries are streamed by the caller.
pub struct ZipArchiver {
    zip: ZipWriter<Box<dyn WriteSeek>>,
    pending: Option<PendingEntry>,
    progress: Arc<WriterProgress>,
    finished: bool,
    damaged: bool,
}

impl ZipArchiver {
    pub fn new(out: Box<dyn WriteSeek>) -> Self {
        Self {
            zip: ZipWriter::new(out),
            pending: None,
            progress: Arc::new(WriterProgress::new()),
            finished: false,
            damaged: false,
        }
    }

    fn options(permissions: u32) -> FileOptions {
        FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(permissions)
    }

    fn check_open(&self) -> Result<(), ArchiveError> {
        if self.finished {
            return Err(ArchiveError::Closed);
        }
        if self.damaged {
            return Err(ArchiveError::Damaged);
        }
        Ok(())
    }

    /// Runs an operation that writes to the container; a failure leaves
    /// the container in an unknown state.
    fn write_through<T>(
        &mut self,
        f: impl FnOnce(&mut ZipWriter<Box<dyn WriteSeek>>) -> Result<T, ArchiveError>,
    ) -> Result<T, ArchiveError> {
        let result = f(&mut self.zip);
        if result.is_err() {
            self.damaged = true;
        }
        result
    }

    fn finish(&mut self) -> Result<(), ArchiveError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.progress.end_entry();
        if self.pending.take().is_some() {
            debug!("dropping unconfirmed zip entry");
        }
        let mut out = self.zip.finish()?;
        out.flush()?;
        if self.damaged {
            return Err(ArchiveError::Damaged);
        }
        Ok(())
    }
}

impl DestinationWriter for ZipArchiver {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn set_comment(&mut self, comment: &str) {
        self.zip.set_comment(comment);
    }

    fn create_entry(
        &mut self,
        entry_path: &str,
        source: &dyn FileHandle,
    ) -> Result<Option<Box<dyn Write + '_>>, ArchiveError> {
        self.check_open()?;
        self.abort_entry();
        self.progress.end_entry();

        if source.is_directory() {
            self.write_through(|zip| Ok(zip.add_directory(entry_path, Self::options(0o755))?))?;
            debug!(entry = entry_path, "zip directory entry");
            return Ok(None);
        }

        self.progress.begin_entry(entry_path, source.size());
        let pending = self.pending.insert(PendingEntry {
            name: entry_path.to_string(),
            options: Self::options(0o644),
            body: spool(),
        });
        Ok(Some(Box::new(EntryStream {
            body: &mut pending.body,
            progress: &self.progress,
        })))
    }

    fn finish_entry(&mut self) -> Result<(), ArchiveError> {
        self.check_open()?;
        let Some(mut pending) = self.pending.take() else {
            return Ok(());
        };
        self.write_through(|zip| {
            pending.body.seek(SeekFrom::Start(0))?;
            zip.start_file(pending.name.as_str(), pending.options)?;
            io::copy(&mut pending.body, zip)?;
            Ok(())
        })
        .inspect_err(|e| warn!(entry = %pending.name, error = %e, "zip entry write failed"))
    }

    fn abort_entry(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(entry = %pending.name, "zip entry discarded");
            self.progress.discard_entry();
        }
    }

    fn post_process(&mut self) -> Result<(), ArchiveError> {
        self.finish()
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        self.finish()
    }

    fn progress(&self) -> Arc<WriterProgress> {
        Arc::clone(&self.progress)
    }
}

/// Output stream for the zip entry currently open.
struct EntryStream<'a> {
    body: &'a mut SpooledTempFile,
    progress: &'a WriterProgress,
}

impl Write for EntryStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.body.write(buf)?;
        self.progress.add_written(n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.body.flush()
    }
}
