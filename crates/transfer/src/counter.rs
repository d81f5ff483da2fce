use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe accumulator of processed bytes.
///
/// The job thread adds to it while a polling thread reads it; all operations
/// are single atomic steps, so readers never observe a torn value.
#[derive(Debug, Default)]
pub struct ByteCounter {
    value: AtomicU64,
}

impl ByteCounter {
    /// Creates a counter starting at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current number of bytes.
    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Adds `bytes` to the counter.
    pub fn add(&self, bytes: u64) {
        self.value.fetch_add(bytes, Ordering::AcqRel);
    }

    /// Overwrites the counter with an authoritative value.
    pub fn set(&self, bytes: u64) {
        self.value.store(bytes, Ordering::Release);
    }

    /// Resets the counter to zero.
    pub fn reset(&self) {
        self.set(0);
    }

    /// Moves the value of `other` into this counter, leaving `other` at zero.
    ///
    /// Returns the number of bytes moved.
    pub fn absorb(&self, other: &ByteCounter) -> u64 {
        let moved = other.value.swap(0, Ordering::AcqRel);
        self.add(moved);
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn add_set_reset() {
        let counter = ByteCounter::new();
        assert_eq!(counter.value(), 0);

        counter.add(10);
        counter.add(5);
        assert_eq!(counter.value(), 15);

        counter.set(3);
        assert_eq!(counter.value(), 3);

        counter.reset();
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn absorb_moves_value() {
        let total = ByteCounter::new();
        let current = ByteCounter::new();
        total.add(100);
        current.add(42);

        assert_eq!(total.absorb(&current), 42);
        assert_eq!(total.value(), 142);
        assert_eq!(current.value(), 0);
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let counter = Arc::new(ByteCounter::new());
        let mut handles = vec![];

        for _ in 0..8 {
            let c = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                for _ in 0..1000 {
                    c.add(1);
                }
            }));
        }
        for _ in 0..4 {
            let c = Arc::clone(&counter);
            handles.push(thread::spawn(move || {
                let mut last = 0;
                for _ in 0..1000 {
                    let v = c.value();
                    assert!(v >= last);
                    last = v;
                }
            }));
        }

        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.value(), 8000);
    }
}
