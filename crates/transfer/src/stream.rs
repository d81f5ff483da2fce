use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::ByteCounter;

/// Default buffer size for [`copy_stream`]: 64 KiB.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Longest single sleep while throttling, so cancellation stays responsive.
const THROTTLE_SLICE: Duration = Duration::from_millis(50);

/// Shared bytes-per-second cap for streaming copies.
///
/// A value of 0 means unlimited. The limit can be changed while a copy is
/// running; readers pick up the new value on their next read.
#[derive(Debug, Default)]
pub struct ThroughputLimit {
    bytes_per_second: AtomicU64,
}

impl ThroughputLimit {
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            bytes_per_second: AtomicU64::new(bytes_per_second),
        }
    }

    pub fn get(&self) -> u64 {
        self.bytes_per_second.load(Ordering::Acquire)
    }

    pub fn set(&self, bytes_per_second: u64) {
        self.bytes_per_second.store(bytes_per_second, Ordering::Release);
    }

    pub fn is_unlimited(&self) -> bool {
        self.get() == 0
    }
}

/// Source stream wrapper used by transfer jobs.
///
/// Every read is counted into a [`ByteCounter`], fails with
/// [`io::ErrorKind::Interrupted`] once the token is cancelled, and is
/// optionally throttled to a [`ThroughputLimit`].
pub struct TransferReader<R> {
    inner: R,
    counter: Arc<ByteCounter>,
    cancel: CancellationToken,
    limit: Option<Arc<ThroughputLimit>>,
    window_start: Instant,
    window_bytes: u64,
    window_limit: u64,
}

impl<R: Read> TransferReader<R> {
    /// Wraps `inner`, counting into `counter` and aborting on `cancel`.
    pub fn new(inner: R, counter: Arc<ByteCounter>, cancel: CancellationToken) -> Self {
        Self {
            inner,
            counter,
            cancel,
            limit: None,
            window_start: Instant::now(),
            window_bytes: 0,
            window_limit: 0,
        }
    }

    /// Throttles reads to `limit`.
    pub fn with_limit(mut self, limit: Arc<ThroughputLimit>) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn check_cancelled(&self) -> io::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(io::Error::new(
                io::ErrorKind::Interrupted,
                "transfer cancelled",
            ));
        }
        Ok(())
    }

    fn throttle(&mut self, bytes: u64) -> io::Result<()> {
        let Some(limit) = self.limit.as_ref().map(|l| l.get()) else {
            return Ok(());
        };
        if limit == 0 {
            return Ok(());
        }

        // Restart the accounting window when the limit changes.
        if limit != self.window_limit {
            self.window_limit = limit;
            self.window_start = Instant::now();
            self.window_bytes = 0;
        }
        self.window_bytes += bytes;

        let expected = Duration::from_secs_f64(self.window_bytes as f64 / limit as f64);
        loop {
            let elapsed = self.window_start.elapsed();
            if elapsed >= expected {
                break;
            }
            self.check_cancelled()?;
            std::thread::sleep((expected - elapsed).min(THROTTLE_SLICE));
        }
        Ok(())
    }
}

impl<R: Read> Read for TransferReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_cancelled()?;
        let n = self.inner.read(buf)?;
        self.counter.add(n as u64);
        self.throttle(n as u64)?;
        Ok(n)
    }
}

/// Copies `reader` into `writer` until EOF and returns the bytes copied.
///
/// Unlike [`std::io::copy`], an [`io::ErrorKind::Interrupted`] error is
/// returned to the caller instead of retried, so a cancelled
/// [`TransferReader`] stops the copy.
pub fn copy_stream<R, W>(reader: &mut R, writer: &mut W, buffer_size: usize) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut copied = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        copied += n as u64;
    }
    writer.flush()?;
    Ok(copied)
}
