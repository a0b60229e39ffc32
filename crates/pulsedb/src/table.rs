//! Tables: definition plus the per-table ingest tasks
//!
//! Each table owns two long-lived tasks. The *WAL reader* does blocking
//! tail reads and forwards raw frames; it never parses them. The *insert
//! worker* is the single consumer of that channel: it decodes, drops stale
//! or out-of-partition frames, applies the table WHERE, re-keys by the
//! group-by expressions and hands the result to the row store, which
//! therefore sees a total order per source.
//!
//! A frame the worker rejects still produces a skip marker, letting the row
//! store advance its durable resume offset past it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, trace, warn};

use pulsedb_core::{frame, ByteMap, Timestamp};
use pulsedb_sql::{Field, GroupBy, Predicate};

use crate::clock::Clock;
use crate::partition::{in_partition, partition_hash};
use crate::stats::{StatsSnapshot, TableStats};
use crate::store::{Insert, MemRowStore};
use crate::wal::{BufferPool, Wal};

const RATE_LOG_INTERVAL: Duration = Duration::from_secs(60);
const WAL_READ_QUEUE: usize = 64;

/// Follower placement: the partition this instance covers.
#[derive(Debug, Clone, Copy)]
pub struct FollowConfig {
    pub partition: u32,
}

/// Table definition.
#[derive(Debug, Clone)]
pub struct TableConfig {
    pub name: String,
    /// Stream feeding this table. Defaults to the table name.
    pub stream: String,
    pub fields: Vec<Field>,
    /// Empty means the raw dims are the row key.
    pub group_by: Vec<GroupBy>,
    /// Table-level filter applied at ingest time.
    pub where_clause: Option<Predicate>,
    pub resolution: Duration,
    pub retention: Duration,
    /// Dims projected into the partition hash. Empty hashes all dims.
    pub partition_by: Vec<String>,
}

impl TableConfig {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        let name = name.into();
        TableConfig {
            stream: name.clone(),
            name,
            fields,
            group_by: Vec::new(),
            where_clause: None,
            resolution: Duration::from_secs(60),
            retention: Duration::from_secs(3600),
            partition_by: Vec::new(),
        }
    }
}

/// One raw frame handed from the WAL reader to the insert worker.
struct WalRead {
    data: Vec<u8>,
    offset: u64,
    source: usize,
}

pub struct Table {
    config: TableConfig,
    clock: Arc<Clock>,
    stats: TableStats,
    store: Arc<MemRowStore>,
    wal: Arc<Wal>,
    follow: Option<FollowConfig>,
    num_partitions: u32,
    max_memory_bytes: Option<usize>,
}

impl Table {
    pub(crate) fn new(
        config: TableConfig,
        wal: Arc<Wal>,
        follow: Option<FollowConfig>,
        num_partitions: u32,
        max_memory_bytes: Option<usize>,
    ) -> Arc<Self> {
        let clock = Arc::new(Clock::new());
        let store = MemRowStore::new(
            config.fields.clone(),
            config.resolution,
            config.retention,
            clock.clone(),
        );
        Arc::new(Table {
            config,
            clock,
            stats: TableStats::default(),
            store,
            wal,
            follow,
            num_partitions,
            max_memory_bytes,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn stream(&self) -> &str {
        &self.config.stream
    }

    pub fn fields(&self) -> &[Field] {
        &self.config.fields
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn store(&self) -> Arc<MemRowStore> {
        self.store.clone()
    }

    /// The table's virtual "now": the max timestamp it has observed.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Frames older than this are dropped (but acknowledged as skips).
    pub fn truncate_before(&self) -> Timestamp {
        self.clock.now().sub(self.config.retention)
    }

    /// Wait until everything currently in the WAL has been applied or
    /// skipped by the insert worker.
    pub async fn wait_caught_up(&self) {
        let end = self.wal.offset().await;
        self.store.wait_for_offset(0, end).await;
    }

    /// Spawn the WAL reader and insert worker.
    pub(crate) fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>, pool: BufferPool) {
        let (tx, rx) = mpsc::channel(WAL_READ_QUEUE);
        let worker = self.clone();
        let worker_shutdown = shutdown.clone();
        let worker_pool = pool.clone();
        tokio::spawn(async move {
            worker.process_inserts(rx, worker_shutdown, worker_pool).await;
        });
        let reader = self.clone();
        tokio::spawn(async move {
            reader.process_wal_inserts(tx, shutdown, pool).await;
        });
    }

    /// The WAL reader loop: tail the log forever, forwarding raw frames.
    /// A WAL read failure leaves the table irrecoverable; the task panics
    /// and the supervisor decides.
    async fn process_wal_inserts(
        self: Arc<Self>,
        tx: mpsc::Sender<WalRead>,
        mut shutdown: watch::Receiver<bool>,
        pool: BufferPool,
    ) {
        let start = self.store.applied_offset(0);
        let mut reader = match self.wal.reader(start, pool).await {
            Ok(reader) => reader,
            Err(e) => {
                error!(table = %self.config.name, error = %e, "unable to open WAL reader");
                panic!("unable to open WAL reader: {e}");
            }
        };
        info!(table = %self.config.name, offset = start, "WAL reader started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(table = %self.config.name, "WAL reader stopped");
                    return;
                }
                read = reader.read() => match read {
                    Ok((data, offset)) => {
                        if tx.send(WalRead { data, offset, source: 0 }).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        error!(table = %self.config.name, error = %e, "unable to read from WAL");
                        panic!("unable to read from WAL: {e}");
                    }
                }
            }
        }
    }

    /// The insert worker: single consumer of the reader channel.
    async fn process_inserts(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<WalRead>,
        mut shutdown: watch::Receiver<bool>,
        pool: BufferPool,
    ) {
        let is_follower = self.follow.is_some();
        let mut h = partition_hash();
        let mut start = Instant::now();
        let mut inserted = 0u64;
        let mut skipped = 0u64;
        let mut bytes_read = 0u64;
        info!(table = %self.config.name, follower = is_follower, "insert worker started");

        loop {
            let read = tokio::select! {
                _ = shutdown.changed() => {
                    info!(table = %self.config.name, "insert worker stopped");
                    return;
                }
                read = rx.recv() => match read {
                    Some(read) => read,
                    None => return,
                },
            };

            if read.data.is_empty() {
                // Empty keep-alives carry nothing to apply.
                pool.put(read.data);
                continue;
            }
            bytes_read += read.data.len() as u64;

            // One poison frame must not kill the worker.
            let ok = match std::panic::catch_unwind(AssertUnwindSafe(|| {
                self.insert_frame(&read.data, is_follower, &mut h, read.offset, read.source)
            })) {
                Ok(ok) => ok,
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    error!(table = %self.config.name, panic = %msg, "panic while inserting, skipping frame");
                    false
                }
            };
            if ok {
                inserted += 1;
            } else {
                // Not inserted (stale, wrong partition, filtered or broken):
                // acknowledge the offset so ingest can resume past it.
                self.skip(read.offset, read.source);
                skipped += 1;
            }
            pool.put(read.data);

            let delta = start.elapsed();
            if delta > RATE_LOG_INTERVAL {
                let secs = delta.as_secs_f64();
                debug!(
                    table = %self.config.name,
                    bytes_read,
                    bytes_per_sec = (bytes_read as f64 / secs) as u64,
                    inserted,
                    inserted_per_sec = (inserted as f64 / secs) as u64,
                    skipped,
                    skipped_per_sec = (skipped as f64 / secs) as u64,
                    "ingest rates"
                );
                inserted = 0;
                skipped = 0;
                bytes_read = 0;
                start = Instant::now();
            }
        }
    }

    /// Decode one frame and fold it into the row store. Returns false when
    /// the frame is dropped for any reason; the caller turns that into a
    /// skip marker.
    fn insert_frame(
        &self,
        data: &[u8],
        is_follower: bool,
        h: &mut crc32fast::Hasher,
        offset: u64,
        source: usize,
    ) -> bool {
        let (ts, rest) = match frame::split_ts(data) {
            Ok(split) => split,
            Err(e) => {
                warn!(table = %self.config.name, offset, error = %e, "undecodable frame");
                return false;
            }
        };
        if ts < self.truncate_before() {
            // Old data.
            return false;
        }
        let (dims_raw, rest) = match frame::split_section(rest) {
            Ok(split) => split,
            Err(e) => {
                warn!(table = %self.config.name, offset, error = %e, "undecodable frame dims");
                return false;
            }
        };
        // Copy out of the WAL read buffer: the buffer goes back to the pool
        // and is overwritten by a later read.
        let dims = ByteMap::from_bytes(Bytes::copy_from_slice(dims_raw));
        if is_follower {
            let partition = self.follow.map(|f| f.partition).unwrap_or(0);
            if !in_partition(h, &dims, &self.config.partition_by, partition, self.num_partitions) {
                // Not ours on this table.
                return false;
            }
        }
        let (vals_raw, _) = match frame::split_section(rest) {
            Ok(split) => split,
            Err(e) => {
                warn!(table = %self.config.name, offset, error = %e, "undecodable frame vals");
                return false;
            }
        };
        let vals = ByteMap::from_bytes(Bytes::copy_from_slice(vals_raw));
        self.do_insert(ts, dims, vals, offset, source)
    }

    fn do_insert(
        &self,
        ts: Timestamp,
        dims: ByteMap,
        vals: ByteMap,
        offset: u64,
        source: usize,
    ) -> bool {
        if let Some(where_clause) = &self.config.where_clause {
            if !where_clause.eval(&dims) {
                trace!(table = %self.config.name, ts = %ts, "filtering out inbound point");
                self.stats.record_filtered();
                return false;
            }
        }
        self.clock.advance(ts);
        trace!(table = %self.config.name, ts = %ts, "including inbound point");

        let key = if self.config.group_by.is_empty() {
            dims.clone()
        } else {
            let mut pairs = Vec::with_capacity(self.config.group_by.len());
            for group_by in &self.config.group_by {
                if let Some(value) = group_by.expr.eval(&dims) {
                    pairs.push((group_by.name.as_str(), value));
                }
            }
            ByteMap::from_sorted_pairs(pairs)
        };

        self.cap_memory_size();
        self.store.insert(Insert { key, ts, vals, dims, offset, source });
        self.stats.record_queued();
        self.stats.record_inserted();
        true
    }

    /// Acknowledge an offset without storing anything.
    fn skip(&self, offset: u64, source: usize) {
        self.store.skip(offset, source);
        self.stats.record_queued();
        self.stats.record_skipped();
    }

    /// Keep the store under the configured memory cap by pruning data past
    /// retention. May briefly stall the worker.
    fn cap_memory_size(&self) {
        let Some(max) = self.max_memory_bytes else {
            return;
        };
        if self.store.estimated_bytes() > max {
            self.store.prune(self.truncate_before());
            if self.store.estimated_bytes() > max {
                warn!(table = %self.config.name, max, "memory cap still exceeded after pruning");
            }
        }
    }
}
