//! Per-table virtual clock
//!
//! Tracks the maximum timestamp ever observed for a table. Monotonic:
//! `advance` only ever moves forward. Relative query windows and retention
//! both resolve against this clock, so time is driven by the data, not the
//! wall.

use std::sync::atomic::{AtomicU64, Ordering};

use pulsedb_core::Timestamp;

#[derive(Debug, Default)]
pub struct Clock {
    max_ts: AtomicU64,
}

impl Clock {
    pub fn new() -> Self {
        Clock::default()
    }

    /// Move the clock forward to `ts` if it is ahead of the current value.
    pub fn advance(&self, ts: Timestamp) {
        let nanos = ts.as_nanos();
        let mut current = self.max_ts.load(Ordering::Relaxed);
        while nanos > current {
            match self.max_ts.compare_exchange_weak(
                current,
                nanos,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    pub fn now(&self) -> Timestamp {
        Timestamp::from_nanos(self.max_ts.load(Ordering::Acquire))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_moves_forward() {
        let clock = Clock::new();
        assert!(clock.now().is_zero());
        clock.advance(Timestamp::from_secs(10));
        assert_eq!(clock.now(), Timestamp::from_secs(10));
    }

    #[test]
    fn test_advance_never_goes_backward() {
        let clock = Clock::new();
        clock.advance(Timestamp::from_secs(10));
        clock.advance(Timestamp::from_secs(5));
        assert_eq!(clock.now(), Timestamp::from_secs(10));
    }

    #[test]
    fn test_concurrent_advance_keeps_max() {
        let clock = std::sync::Arc::new(Clock::new());
        let mut handles = Vec::new();
        for i in 0..16u64 {
            let clock = clock.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..100 {
                    clock.advance(Timestamp::from_nanos(i * 100 + j));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(clock.now(), Timestamp::from_nanos(15 * 100 + 99));
    }
}
