//! Tar and tar.gz writers.
//!
//! Tar headers carry the entry size up front, so these writers read each
//! source file themselves instead of handing out a stream; progress is
//! published through [`WriterProgress`]. The source is spooled first and
//! only appended once it was read completely, so a failed read never leaves
//! a partial entry in the archive.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use flate2::Compression;
use flate2::write::GzEncoder;
use stowage_file_ops::{FileHandle, WriteSeek};
use stowage_transfer::{DEFAULT_BUFFER_SIZE, copy_stream};
use tar::{Builder, EntryType, Header};
use tracing::{debug, warn};

use crate::writer::{ProgressReader, spool};
use crate::{ArchiveError, ArchiveFormat, DestinationWriter, WriterProgress};

enum Sink {
    Plain(Box<dyn WriteSeek>),
    Gzip(GzEncoder<Box<dyn WriteSeek>>),
}

impl Sink {
    fn finish(self) -> io::Result<()> {
        match self {
            Sink::Plain(mut out) => out.flush(),
            Sink::Gzip(encoder) => encoder.finish()?.flush(),
        }
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Sink::Plain(out) => out.write(buf),
            Sink::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(out) => out.flush(),
            Sink::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Tar archive writer, optionally gzip-compressed.
pub struct TarArchiver {
    builder: Option<Builder<Sink>>,
    gzip: bool,
    progress: Arc<WriterProgress>,
    damaged: bool,
}

impl TarArchiver {
    pub fn new(out: Box<dyn WriteSeek>, gzip: bool) -> Self {
        let sink = if gzip {
            Sink::Gzip(GzEncoder::new(out, Compression::default()))
        } else {
            Sink::Plain(out)
        };
        Self {
            builder: Some(Builder::new(sink)),
            gzip,
            progress: Arc::new(WriterProgress::new()),
            damaged: false,
        }
    }

    fn builder(&mut self) -> Result<&mut Builder<Sink>, ArchiveError> {
        if self.damaged {
            return Err(ArchiveError::Damaged);
        }
        self.builder.as_mut().ok_or(ArchiveError::Closed)
    }

    fn append(
        &mut self,
        header: &mut Header,
        entry_path: &str,
        data: impl Read,
    ) -> Result<(), ArchiveError> {
        let result = self.builder()?.append_data(header, entry_path, data);
        if let Err(e) = &result {
            warn!(entry = entry_path, error = %e, "tar write failed");
            self.damaged = true;
        }
        Ok(result?)
    }

    /// Reads `source` completely into a spool, checking its length.
    fn read_source(
        &self,
        entry_path: &str,
        source: &dyn FileHandle,
        expected: u64,
    ) -> Result<tempfile::SpooledTempFile, ArchiveError> {
        let mut reader = ProgressReader {
            inner: source.open_read()?.take(expected),
            progress: &self.progress,
        };
        let mut body = spool();
        let actual = copy_stream(&mut reader, &mut body, DEFAULT_BUFFER_SIZE)?;
        if actual != expected {
            return Err(ArchiveError::SizeMismatch {
                entry: entry_path.to_string(),
                expected,
                actual,
            });
        }
        body.seek(SeekFrom::Start(0))?;
        Ok(body)
    }

    fn finish(&mut self) -> Result<(), ArchiveError> {
        self.progress.end_entry();
        let Some(builder) = self.builder.take() else {
            return Ok(());
        };
        builder.into_inner()?.finish()?;
        if self.damaged {
            return Err(ArchiveError::Damaged);
        }
        Ok(())
    }
}

fn header_for(source: &dyn FileHandle) -> Header {
    let mut header = Header::new_gnu();
    let mtime = source
        .modified()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs());
    header.set_mtime(mtime);
    header
}

impl DestinationWriter for TarArchiver {
    fn format(&self) -> ArchiveFormat {
        if self.gzip {
            ArchiveFormat::TarGz
        } else {
            ArchiveFormat::Tar
        }
    }

    fn set_comment(&mut self, _comment: &str) {}

    fn create_entry(
        &mut self,
        entry_path: &str,
        source: &dyn FileHandle,
    ) -> Result<Option<Box<dyn Write + '_>>, ArchiveError> {
        self.builder()?;
        self.progress.end_entry();

        let mut header = header_for(source);
        if source.is_directory() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            self.append(&mut header, &format!("{entry_path}/"), io::empty())?;
            debug!(entry = entry_path, "tar directory entry");
            return Ok(None);
        }

        let expected = source.size().max(0) as u64;
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_size(expected);

        self.progress.begin_entry(entry_path, expected as i64);
        let body = match self.read_source(entry_path, source, expected) {
            Ok(body) => body,
            Err(e) => {
                self.progress.discard_entry();
                return Err(e);
            }
        };
        self.append(&mut header, entry_path, body)?;
        Ok(None)
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Cursor;
    use stowage_file_ops::MemoryFs;

    fn pack(fs: &MemoryFs, gzip: bool) -> TarArchiver {
        fs.add_file("/src/a.txt", b"0123456789")
            .add_file("/src/dir/b.txt", b"abcde")
            .add_dir("/out");
        let out = fs.file("/out/test.tar").open_write().unwrap();
        let mut tar = TarArchiver::new(out, gzip);
        for (entry, path) in [
            ("a.txt", "/src/a.txt"),
            ("dir", "/src/dir"),
            ("dir/b.txt", "/src/dir/b.txt"),
        ] {
            let source = fs.file(path);
            assert!(tar.create_entry(entry, source.as_ref()).unwrap().is_none());
        }
        tar
    }

    fn read_entries<R: Read>(reader: R) -> BTreeMap<String, Vec<u8>> {
        let mut archive = tar::Archive::new(reader);
        let mut out = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            out.insert(name, data);
        }
        out
    }

    #[test]
    fn tar_is_not_streaming() {
        let fs = MemoryFs::new();
        let tar = pack(&fs, false);
        assert!(!tar.supports_streaming());
        assert_eq!(tar.format(), ArchiveFormat::Tar);
    }

    #[test]
    fn writes_plain_tar() {
        let fs = MemoryFs::new();
        let mut tar = pack(&fs, false);
        tar.post_process().unwrap();
        tar.close().unwrap();

        let entries = read_entries(Cursor::new(fs.read("/out/test.tar").unwrap()));
        assert_eq!(entries["a.txt"], b"0123456789");
        assert_eq!(entries["dir/b.txt"], b"abcde");
        assert!(entries.contains_key("dir/") || entries.contains_key("dir"));
    }

    #[test]
    fn writes_gzipped_tar() {
        let fs = MemoryFs::new();
        let mut tar = pack(&fs, true);
        assert_eq!(tar.format(), ArchiveFormat::TarGz);
        tar.close().unwrap();

        let bytes = fs.read("/out/test.tar").unwrap();
        let entries = read_entries(flate2::read::GzDecoder::new(Cursor::new(bytes)));
        assert_eq!(entries.len(), 3);
        assert_eq!(entries["a.txt"], b"0123456789");
    }

    #[test]
    fn progress_reports_writer_side_bytes() {
        let fs = MemoryFs::new();
        let mut tar = pack(&fs, false);
        let progress = tar.progress();
        assert_eq!(progress.current_entry_name().as_deref(), Some("dir/b.txt"));
        assert_eq!(progress.written_bytes_current_entry(), 5);
        assert_eq!(progress.total_written_bytes(), 15);

        tar.post_process().unwrap();
        assert_eq!(progress.current_entry_name(), None);
        assert_eq!(progress.total_written_bytes(), 15);
    }

    #[test]
    fn entries_rejected_after_close() {
        let fs = MemoryFs::new();
        let mut tar = pack(&fs, false);
        tar.close().unwrap();
        let a = fs.file("/src/a.txt");
        assert!(matches!(
            tar.create_entry("a.txt", a.as_ref()),
            Err(ArchiveError::Closed)
        ));
    }

    /// Claims more bytes than its content holds, like a file truncated
    /// while being read.
    #[derive(Debug)]
    struct Shrunk(Arc<dyn FileHandle>);

    impl FileHandle for Shrunk {
        fn name(&self) -> String {
            self.0.name()
        }
        fn absolute_path(&self, resolve_symlinks: bool) -> String {
            self.0.absolute_path(resolve_symlinks)
        }
        fn exists(&self) -> bool {
            true
        }
        fn is_directory(&self) -> bool {
            false
        }
        fn is_symlink(&self) -> bool {
            false
        }
        fn size(&self) -> i64 {
            self.0.size() + 4
        }
        fn modified(&self) -> Option<std::time::SystemTime> {
            None
        }
        fn parent(&self) -> Option<Arc<dyn FileHandle>> {
            self.0.parent()
        }
        fn list(&self) -> io::Result<Vec<Arc<dyn FileHandle>>> {
            Ok(Vec::new())
        }
        fn open_read(&self) -> io::Result<Box<dyn Read + Send>> {
            self.0.open_read()
        }
        fn open_write(&self) -> io::Result<Box<dyn WriteSeek>> {
            self.0.open_write()
        }
    }

    #[test]
    fn failed_read_leaves_no_partial_entry() {
        let fs = MemoryFs::new();
        fs.add_file("/src/a.txt", b"0123456789")
            .add_file("/src/z.txt", b"zz")
            .add_dir("/out");
        let out = fs.file("/out/test.tar").open_write().unwrap();
        let mut tar = TarArchiver::new(out, false);

        let shrunk = Shrunk(fs.file("/src/a.txt"));
        assert!(matches!(
            tar.create_entry("a.txt", &shrunk),
            Err(ArchiveError::SizeMismatch {
                expected: 14,
                actual: 10,
                ..
            })
        ));
        assert_eq!(tar.progress().total_written_bytes(), 0);

        // Retry with the real file, then carry on.
        let a = fs.file("/src/a.txt");
        tar.create_entry("a.txt", a.as_ref()).unwrap();
        let z = fs.file("/src/z.txt");
        tar.create_entry("z.txt", z.as_ref()).unwrap();
        tar.post_process().unwrap();
        tar.close().unwrap();

        let entries = read_entries(Cursor::new(fs.read("/out/test.tar").unwrap()));
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["a.txt"], b"0123456789");
        assert_eq!(entries["z.txt"], b"zz");
    }
}
