//! Test doubles for job scenarios.

use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use stowage_archive::{
    ArchiveError, ArchiveFormat, DestinationWriter, WriterFactory, WriterProgress,
};
use stowage_file_ops::{FileHandle, WriteSeek};
use stowage_transfer::copy_stream;

use crate::decision::{DecisionProvider, DecisionRequest, DecisionResponse};

/// Answers decisions from a script, dismissing once it runs out.
#[derive(Debug, Default)]
pub struct Scripted {
    answers: Mutex<VecDeque<DecisionResponse>>,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl Scripted {
    pub fn new(answers: impl IntoIterator<Item = DecisionResponse>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl DecisionProvider for Scripted {
    fn request_decision(&self, request: &DecisionRequest) -> DecisionResponse {
        self.requests.lock().unwrap().push(request.clone());
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(DecisionResponse::dismissed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Comment(String),
    Entry(String),
    Write(String, usize),
    Abort(String),
    PostProcess,
    Close,
}

/// Everything a [`RecordingWriter`] saw, shared with the test.
#[derive(Debug, Default)]
pub struct WriterLog {
    events: Mutex<Vec<Event>>,
    writing: AtomicBool,
    overlaps: AtomicUsize,
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl WriterLog {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn entries(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Entry(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn writes(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Write(..)))
            .count()
    }

    pub fn data(&self, entry: &str) -> Option<Vec<u8>> {
        self.data.lock().unwrap().get(entry).cloned()
    }

    /// Number of close calls that found a write in flight.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

/// Writer double logging every call.
pub struct RecordingWriter {
    format: ArchiveFormat,
    log: Arc<WriterLog>,
    progress: Arc<WriterProgress>,
    fail_finalize: bool,
}

impl DestinationWriter for RecordingWriter {
    fn format(&self) -> ArchiveFormat {
        self.format
    }

    fn set_comment(&mut self, comment: &str) {
        self.log.push(Event::Comment(comment.to_string()));
    }

    fn create_entry(
        &mut self,
        entry_path: &str,
        source: &dyn FileHandle,
    ) -> Result<Option<Box<dyn Write + '_>>, ArchiveError> {
        self.progress.end_entry();
        self.log.push(Event::Entry(entry_path.to_string()));
        if source.is_directory() {
            return Ok(None);
        }
        self.progress.begin_entry(entry_path, source.size());
        if self.supports_streaming() {
            return Ok(Some(Box::new(RecordingStream {
                entry: entry_path.to_string(),
                log: &self.log,
                progress: &self.progress,
            })));
        }
        let mut stream = RecordingStream {
            entry: entry_path.to_string(),
            log: &self.log,
            progress: &self.progress,
        };
        let copied = source
            .open_read()
            .and_then(|mut input| copy_stream(&mut input, &mut stream, 4096));
        if let Err(e) = copied {
            self.abort_entry();
            return Err(e.into());
        }
        Ok(None)
    }

    fn abort_entry(&mut self) {
        if let Some(entry) = self.progress.current_entry_name() {
            self.log.data.lock().unwrap().remove(&entry);
            self.log.push(Event::Abort(entry));
        }
        self.progress.discard_entry();
    }

    fn post_process(&mut self) -> Result<(), ArchiveError> {
        self.log.push(Event::PostProcess);
        self.progress.end_entry();
        if self.fail_finalize {
            return Err(io::Error::other("disk full").into());
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), ArchiveError> {
        if self.log.writing.load(Ordering::SeqCst) {
            self.log.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.log.push(Event::Close);
        if self.fail_finalize {
            return Err(io::Error::other("disk full").into());
        }
        Ok(())
    }

    fn progress(&self) -> Arc<WriterProgress> {
        Arc::clone(&self.progress)
    }
}

struct RecordingStream<'a> {
    entry: String,
    log: &'a WriterLog,
    progress: &'a WriterProgress,
}

impl Write for RecordingStream<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.log.writing.store(true, Ordering::SeqCst);
        self.log
            .data
            .lock()
            .unwrap()
            .entry(self.entry.clone())
            .or_default()
            .extend_from_slice(buf);
        self.log.push(Event::Write(self.entry.clone(), buf.len()));
        self.progress.add_written(buf.len() as u64);
        self.log.writing.store(false, Ordering::SeqCst);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Factory producing [`RecordingWriter`]s; can fail the first N opens.
pub struct RecordingFactory {
    pub log: Arc<WriterLog>,
    pub opens: AtomicUsize,
    failures_left: AtomicUsize,
    panic: bool,
    fail_finalize: bool,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self {
            log: Arc::new(WriterLog::default()),
            opens: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            panic: false,
            fail_finalize: false,
        }
    }

    pub fn failing(times: usize) -> Self {
        let factory = Self::new();
        factory.failures_left.store(times, Ordering::SeqCst);
        factory
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::new()
        }
    }

    /// Writers whose `post_process` and `close` fail.
    pub fn failing_finalize() -> Self {
        Self {
            fail_finalize: true,
            ..Self::new()
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl WriterFactory for RecordingFactory {
    fn open(
        &self,
        _destination: &dyn FileHandle,
        format: ArchiveFormat,
    ) -> Result<Box<dyn DestinationWriter>, ArchiveError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.panic {
            panic!("writer factory exploded");
        }
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(io::Error::other("destination is read-only").into());
        }
        Ok(Box::new(RecordingWriter {
            format,
            log: Arc::clone(&self.log),
            progress: Arc::new(WriterProgress::new()),
            fail_finalize: self.fail_finalize,
        }))
    }
}

/// Failure injected for one path.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// `open_read` fails this many times.
    Open(usize),
    /// Reads yield `bytes` then fail, on this many opens.
    ReadAfter { bytes: usize, times: usize },
    /// `list` fails this many times.
    List(usize),
    /// Every read sleeps first.
    Slow(Duration),
}

type Faults = Arc<Mutex<HashMap<String, Fault>>>;

/// Wraps a file tree, injecting faults by absolute path.
#[derive(Debug, Clone)]
pub struct FlakyFile {
    inner: Arc<dyn FileHandle>,
    faults: Faults,
}

impl FlakyFile {
    pub fn wrap(inner: Arc<dyn FileHandle>, faults: &[(&str, Fault)]) -> Arc<dyn FileHandle> {
        let faults = faults
            .iter()
            .map(|(path, fault)| (path.to_string(), *fault))
            .collect();
        Arc::new(Self {
            inner,
            faults: Arc::new(Mutex::new(faults)),
        })
    }

    fn child(&self, inner: Arc<dyn FileHandle>) -> Arc<dyn FileHandle> {
        Arc::new(Self {
            inner,
            faults: Arc::clone(&self.faults),
        })
    }

    /// Consumes one shot of the fault on this path.
    fn take_fault(&self) -> Option<Fault> {
        let mut faults = self.faults.lock().unwrap();
        let path = self.inner.absolute_path(false);
        let fault = *faults.get(&path)?;
        let remaining = match fault {
            Fault::Open(n) => (n > 1).then(|| Fault::Open(n - 1)),
            Fault::ReadAfter { bytes, times } => {
                (times > 1).then(|| Fault::ReadAfter { bytes, times: times - 1 })
            }
            Fault::List(n) => (n > 1).then(|| Fault::List(n - 1)),
            Fault::Slow(_) => Some(fault),
        };
        match remaining {
            Some(next) => faults.insert(path, next),
            None => faults.remove(&path),
        };
        Some(fault)
    }
}

impl FileHandle for FlakyFile {
    fn name(&self) -> String {
        self.inner.name()
    }

    fn absolute_path(&self, resolve_symlinks: bool) -> String {
        self.inner.absolute_path(resolve_symlinks)
    }

    fn exists(&self) -> bool {
        self.inner.exists()
    }

    fn is_directory(&self) -> bool {
        self.inner.is_directory()
    }

    fn is_symlink(&self) -> bool {
        self.inner.is_symlink()
    }

    fn size(&self) -> i64 {
        self.inner.size()
    }

    fn modified(&self) -> Option<SystemTime> {
        self.inner.modified()
    }

    fn parent(&self) -> Option<Arc<dyn FileHandle>> {
        self.inner.parent().map(|p| self.child(p))
    }

    fn list(&self) -> io::Result<Vec<Arc<dyn FileHandle>>> {
        if let Some(Fault::List(_)) = self.peek() {
            self.take_fault();
            return Err(io::Error::other("listing failed"));
        }
        Ok(self
            .inner
            .list()?
            .into_iter()
            .map(|c| self.child(c))
            .collect())
    }

    fn open_read(&self) -> io::Result<Box<dyn Read + Send>> {
        let fault = match self.peek() {
            Some(Fault::List(_)) | None => None,
            Some(_) => self.take_fault(),
        };
        let inner = self.inner.open_read()?;
        match fault {
            None => Ok(inner),
            Some(Fault::Open(_)) => Err(io::Error::other("open failed")),
            Some(Fault::ReadAfter { bytes, .. }) => Ok(Box::new(FailingReader {
                inner,
                remaining: bytes,
            })),
            Some(Fault::Slow(delay)) => Ok(Box::new(SlowReader { inner, delay })),
            Some(Fault::List(_)) => Ok(inner),
        }
    }

    fn open_write(&self) -> io::Result<Box<dyn WriteSeek>> {
        self.inner.open_write()
    }
}

impl FlakyFile {
    fn peek(&self) -> Option<Fault> {
        self.faults
            .lock()
            .unwrap()
            .get(&self.inner.absolute_path(false))
            .copied()
    }
}

struct FailingReader {
    inner: Box<dyn Read + Send>,
    remaining: usize,
}

impl Read for FailingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::other("disk read error"));
        }
        let max = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..max])?;
        self.remaining -= n;
        Ok(n)
    }
}

struct SlowReader {
    inner: Box<dyn Read + Send>,
    delay: Duration,
}

impl Read for SlowReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        thread::sleep(self.delay);
        self.inner.read(buf)
    }
}
