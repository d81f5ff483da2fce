use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::TransferProgress;

/// Default polling interval.
const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

/// Callback invoked with a progress snapshot.
pub type ProgressCallback = Box<dyn Fn(TransferProgress) + Send + Sync>;

/// Something whose progress can be sampled by the monitor.
pub trait ProgressSource: Send + Sync {
    /// Stable identifier used as the tracking key.
    fn id(&self) -> String;

    /// Returns `true` while the source is worth sampling.
    fn is_active(&self) -> bool;

    /// Samples the current progress.
    fn snapshot(&self) -> TransferProgress;
}

/// Pause/resume control over progress sampling.
///
/// Jobs receive this as an injected dependency so that a long,
/// non-incremental phase can switch sampling off and on.
pub trait UpdateControl: Send + Sync {
    fn pause_updates(&self);
    fn resume_updates(&self);
}

/// Control that ignores pause/resume requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUpdateControl;

impl UpdateControl for NoopUpdateControl {
    fn pause_updates(&self) {}
    fn resume_updates(&self) {}
}

/// Polls tracked sources on an interval and forwards snapshots to callbacks.
pub struct ProgressMonitor {
    inner: Arc<RwLock<MonitorInner>>,
    paused: Arc<AtomicBool>,
    stop: Arc<Mutex<Option<tokio::sync::oneshot::Sender<()>>>>,
}

struct MonitorInner {
    callbacks: Vec<ProgressCallback>,
    sources: HashMap<String, Arc<dyn ProgressSource>>,
    interval: Duration,
}

impl ProgressMonitor {
    /// Creates a new monitor with the given polling interval.
    ///
    /// If `interval` is `None`, defaults to 500 ms.
    pub fn new(interval: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MonitorInner {
                callbacks: Vec::new(),
                sources: HashMap::new(),
                interval: interval.unwrap_or(DEFAULT_INTERVAL),
            })),
            paused: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(Mutex::new(None)),
        }
    }

    /// Registers a progress callback.
    pub fn on_progress(&self, callback: ProgressCallback) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.callbacks.push(callback);
    }

    /// Begins sampling a source.
    pub fn track(&self, source: Arc<dyn ProgressSource>) {
        let id = source.id();
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.sources.insert(id, source);
    }

    /// Stops sampling a source.
    pub fn untrack(&self, source_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.sources.remove(source_id);
    }

    /// Returns `true` if a source with this ID is tracked.
    pub fn is_tracking(&self, source_id: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.sources.contains_key(source_id)
    }

    /// Returns `true` while sampling is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Sends a one-time snapshot for a source, ignoring the paused flag.
    pub fn notify_progress(&self, source_id: &str) {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(source) = inner.sources.get(source_id) {
            let progress = source.snapshot();
            for cb in &inner.callbacks {
                cb(progress.clone());
            }
        }
    }

    /// Starts periodic sampling in a background tokio task.
    ///
    /// Call [`stop`](Self::stop) to cancel.
    pub fn start(&self) {
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        {
            let mut stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
            // Replacing the sender stops any previous task.
            drop(stop.take());
            *stop = Some(tx);
        }

        let inner = Arc::clone(&self.inner);
        let paused = Arc::clone(&self.paused);
        tokio::spawn(async move {
            let interval = {
                let i = inner.read().unwrap_or_else(PoisonError::into_inner);
                i.interval
            };
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if paused.load(Ordering::Acquire) {
                            continue;
                        }
                        let i = inner.read().unwrap_or_else(PoisonError::into_inner);
                        for source in i.sources.values() {
                            if source.is_active() {
                                let progress = source.snapshot();
                                for cb in &i.callbacks {
                                    cb(progress.clone());
                                }
                            }
                        }
                    }
                    _ = &mut rx => {
                        break;
                    }
                }
            }
            debug!("progress monitor stopped");
        });
    }

    /// Stops the periodic sampling task.
    pub fn stop(&self) {
        let mut stop = self.stop.lock().unwrap_or_else(PoisonError::into_inner);
        drop(stop.take());
    }

    /// Returns a shareable handle for pausing and resuming this monitor.
    pub fn control(&self) -> Arc<dyn UpdateControl> {
        Arc::new(MonitorControl {
            paused: Arc::clone(&self.paused),
        })
    }
}

impl UpdateControl for ProgressMonitor {
    fn pause_updates(&self) {
        self.paused.store(true, Ordering::Release);
    }

    fn resume_updates(&self) {
        self.paused.store(false, Ordering::Release);
    }
}

struct MonitorControl {
    paused: Arc<AtomicBool>,
}

impl UpdateControl for MonitorControl {
    fn pause_updates(&self) {
        self.paused.store(true, Ordering::Release);
    }

    fn resume_updates(&self) {
        self.paused.store(false, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// SpeedCalculator
// ---------------------------------------------------------------------------

struct SpeedSample {
    bytes: u64,
    timestamp: Instant,
}

/// Calculates transfer speed using a sliding window of samples.
pub struct SpeedCalculator {
    inner: Mutex<SpeedInner>,
}

struct SpeedInner {
    samples: Vec<SpeedSample>,
    max_samples: usize,
    window_size: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl SpeedCalculator {
    /// Creates a new calculator.
    ///
    /// - `window_size`: time window for speed calculation (default 5 s).
    /// - `max_samples`: maximum retained samples (default 100).
    pub fn new(window_size: Option<Duration>, max_samples: Option<usize>) -> Self {
        Self {
            inner: Mutex::new(SpeedInner {
                samples: Vec::new(),
                max_samples: max_samples.unwrap_or(100),
                window_size: window_size.unwrap_or(Duration::from_secs(5)),
            }),
        }
    }

    /// Records `bytes` transferred since the previous sample.
    pub fn add_sample(&self, bytes: u64) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        s.samples.push(SpeedSample {
            bytes,
            timestamp: now,
        });

        // Prune samples outside the window.
        if let Some(cutoff) = now.checked_sub(s.window_size) {
            s.samples.retain(|sample| sample.timestamp >= cutoff);
        }

        if s.samples.len() > s.max_samples {
            let excess = s.samples.len() - s.max_samples;
            s.samples.drain(..excess);
        }
    }

    /// Returns the average speed in bytes/second within the window.
    ///
    /// Returns 0.0 if fewer than 2 samples.
    pub fn bytes_per_second(&self) -> f64 {
        let s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if s.samples.len() < 2 {
            return 0.0;
        }

        let first = &s.samples[0];
        let last = &s.samples[s.samples.len() - 1];
        let elapsed = last.timestamp.duration_since(first.timestamp);
        if elapsed.is_zero() {
            return 0.0;
        }

        // The first sample only anchors the window start.
        let total_bytes: u64 = s.samples[1..].iter().map(|sample| sample.bytes).sum();
        total_bytes as f64 / elapsed.as_secs_f64()
    }

    /// Estimates time remaining to transfer `remaining_bytes`.
    ///
    /// Returns `None` if speed is zero.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining_bytes as f64 / speed))
    }

    /// Clears all recorded samples.
    pub fn reset(&self) {
        let mut s = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        s.samples.clear();
    }
}
