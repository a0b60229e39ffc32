//! Per-table ingest counters
//!
//! Monotonic within a table's lifetime, updated from the single insert
//! worker and read from anywhere.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct TableStats {
    inserted_points: AtomicU64,
    filtered_points: AtomicU64,
    queued_points: AtomicU64,
    skipped_points: AtomicU64,
}

/// A point-in-time copy of a table's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub inserted_points: u64,
    pub filtered_points: u64,
    pub queued_points: u64,
    pub skipped_points: u64,
}

impl TableStats {
    pub fn record_inserted(&self) {
        self.inserted_points.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_filtered(&self) {
        self.filtered_points.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self) {
        self.queued_points.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.skipped_points.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            inserted_points: self.inserted_points.load(Ordering::Relaxed),
            filtered_points: self.filtered_points.load(Ordering::Relaxed),
            queued_points: self.queued_points.load(Ordering::Relaxed),
            skipped_points: self.skipped_points.load(Ordering::Relaxed),
        }
    }
}
