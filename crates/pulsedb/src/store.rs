//! In-memory grouped row store
//!
//! The terminal stage of the ingest path and the base source of the query
//! path. Rows are keyed by the post-group-by dimension bundle; each field
//! carries time-bucketed accumulators. The single insert worker is the only
//! writer, so apply order per source is total.
//!
//! Skip markers are inserts with no payload: they exist purely to advance
//! the per-source durable resume offset past frames that were filtered or
//! rejected, so a restart never replays them.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

use pulsedb_core::{ByteMap, Timestamp};
use pulsedb_sql::{Accum, Field, QueryContext, RowSink, RowSource, RowVals, Window};

use crate::clock::Clock;

/// One item bound for the row store.
#[derive(Debug, Clone)]
pub struct Insert {
    /// Post-group-by dimension bundle.
    pub key: ByteMap,
    pub ts: Timestamp,
    /// Raw values the field expressions fold in.
    pub vals: ByteMap,
    /// Dims as they arrived, before re-keying.
    pub dims: ByteMap,
    /// WAL offset this item acknowledges.
    pub offset: u64,
    /// Which WAL fed this item (followers have several).
    pub source: usize,
}

struct Inner {
    /// key -> per-field bucket maps (bucket start nanos -> accumulator)
    rows: BTreeMap<ByteMap, Vec<BTreeMap<u64, Accum>>>,
    /// Last durably applied WAL offset per source.
    applied_offsets: HashMap<usize, u64>,
}

pub struct MemRowStore {
    fields: Vec<Field>,
    resolution: Duration,
    retention: Duration,
    clock: Arc<Clock>,
    inner: RwLock<Inner>,
    applied: Notify,
}

impl MemRowStore {
    pub fn new(
        fields: Vec<Field>,
        resolution: Duration,
        retention: Duration,
        clock: Arc<Clock>,
    ) -> Arc<Self> {
        Arc::new(MemRowStore {
            fields,
            resolution,
            retention,
            clock,
            inner: RwLock::new(Inner {
                rows: BTreeMap::new(),
                applied_offsets: HashMap::new(),
            }),
            applied: Notify::new(),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Apply one insert: fold its values into the keyed row's buckets and
    /// advance the source's resume offset.
    pub fn insert(&self, ins: Insert) {
        trace!(key = ?ins.key, dims = ?ins.dims, ts = %ins.ts, offset = ins.offset, "applying insert");
        let bucket = ins.ts.truncate_to(self.resolution).as_nanos();
        let mut inner = self.write();
        let row = inner
            .rows
            .entry(ins.key)
            .or_insert_with(|| vec![BTreeMap::new(); self.fields.len()]);
        for (i, field) in self.fields.iter().enumerate() {
            field.expr.update(row[i].entry(bucket).or_default(), &ins.vals);
        }
        let applied = inner.applied_offsets.entry(ins.source).or_default();
        *applied = (*applied).max(ins.offset);
        drop(inner);
        self.applied.notify_waiters();
    }

    /// Apply a skip marker: advance the resume offset, store nothing.
    pub fn skip(&self, offset: u64, source: usize) {
        let mut inner = self.write();
        let applied = inner.applied_offsets.entry(source).or_default();
        *applied = (*applied).max(offset);
        drop(inner);
        self.applied.notify_waiters();
    }

    /// Last durably applied offset for `source` (zero before any apply).
    pub fn applied_offset(&self, source: usize) -> u64 {
        self.read().applied_offsets.get(&source).copied().unwrap_or(0)
    }

    /// Wait until `source` has applied at least `offset`.
    pub async fn wait_for_offset(&self, source: usize, offset: u64) {
        loop {
            let notified = self.applied.notified();
            if self.applied_offset(source) >= offset {
                return;
            }
            notified.await;
        }
    }

    /// Drop buckets older than `cutoff` and rows left with no data.
    pub fn prune(&self, cutoff: Timestamp) {
        let cutoff = cutoff.truncate_to(self.resolution).as_nanos();
        let mut inner = self.write();
        for buckets in inner.rows.values_mut() {
            for field_buckets in buckets.iter_mut() {
                field_buckets.retain(|&start, _| start >= cutoff);
            }
        }
        inner
            .rows
            .retain(|_, buckets| buckets.iter().any(|b| !b.is_empty()));
    }

    /// Rough in-memory footprint, for the memory cap.
    pub fn estimated_bytes(&self) -> usize {
        let inner = self.read();
        inner
            .rows
            .iter()
            .map(|(key, buckets)| {
                key.len()
                    + buckets
                        .iter()
                        .map(|b| b.len() * (8 + std::mem::size_of::<Accum>()))
                        .sum::<usize>()
            })
            .sum()
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }
}

impl RowSource for MemRowStore {
    fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn window(&self) -> Window {
        let now = self.clock.now();
        if now.is_zero() {
            return Window {
                as_of: Timestamp::ZERO,
                until: Timestamp::ZERO,
                resolution: self.resolution,
            };
        }
        let until = now.truncate_to(self.resolution).add(self.resolution);
        let mut as_of = until.sub(self.retention).truncate_to(self.resolution);
        if as_of >= until {
            as_of = until.sub(self.resolution);
        }
        Window { as_of, until, resolution: self.resolution }
    }

    fn iterate(&self, ctx: &QueryContext, sink: RowSink<'_>) -> pulsedb_sql::Result<bool> {
        ctx.check()?;
        let win = self.window();
        let num_periods = win.num_periods();
        let inner = self.read();
        for (key, buckets) in &inner.rows {
            let mut vals: RowVals = vec![vec![Accum::default(); num_periods]; self.fields.len()];
            let mut populated = false;
            for (i, field_buckets) in buckets.iter().enumerate() {
                for (&start, acc) in field_buckets {
                    if let Some(idx) = win.bucket_of(Timestamp::from_nanos(start)) {
                        vals[i][idx].merge(acc);
                        populated = true;
                    }
                }
            }
            if !populated {
                continue;
            }
            ctx.check()?;
            if !sink(key, &vals)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}
