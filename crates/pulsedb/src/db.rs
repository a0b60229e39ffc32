//! Database façade
//!
//! Owns the stream → WAL registry and the table registry, wires the SQL
//! planner to them, and assembles query results. One `Db` is one process-
//! wide instance: registries are initialized here and torn down when the
//! database closes, never lazily.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use pulsedb_core::{Timestamp, Value};
use pulsedb_sql::{plan, FlatRowSource, Opts, QueryContext, RowSource};

use crate::error::Error;
use crate::table::{FollowConfig, Table, TableConfig};
use crate::wal::{BufferPool, SyncPolicy, Wal, WalConfig};
use crate::Result;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbOptions {
    /// Data directory; WALs live under `<dir>/wal`.
    pub dir: PathBuf,
    /// Set on followers: this instance receives data via replication and
    /// declines direct inserts.
    pub follow: Option<FollowConfig>,
    /// Cluster width. 1 means standalone.
    pub num_partitions: u32,
    pub wal_sync: SyncPolicy,
    /// Abort queries whose estimated result exceeds this.
    pub max_response_bytes: usize,
    pub query_timeout: Duration,
    /// Soft cap on per-table row store memory.
    pub max_memory_bytes: Option<usize>,
}

impl Default for DbOptions {
    fn default() -> Self {
        DbOptions {
            dir: PathBuf::from("./data"),
            follow: None,
            num_partitions: 1,
            wal_sync: SyncPolicy::Interval { interval: Duration::from_millis(100) },
            max_response_bytes: 25 * 1024 * 1024,
            query_timeout: Duration::from_secs(30),
            max_memory_bytes: None,
        }
    }
}

pub struct Db {
    opts: DbOptions,
    streams: Mutex<HashMap<String, Arc<Wal>>>,
    tables: Mutex<HashMap<String, Arc<Table>>>,
    wal_buffers: BufferPool,
    shutdown: watch::Sender<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Db {
    pub fn open(opts: DbOptions) -> Arc<Db> {
        let (shutdown, _) = watch::channel(false);
        info!(dir = ?opts.dir, follower = opts.follow.is_some(), "database opened");
        Arc::new(Db {
            opts,
            streams: Mutex::new(HashMap::new()),
            tables: Mutex::new(HashMap::new()),
            wal_buffers: BufferPool::new(),
            shutdown,
        })
    }

    /// Register a table, open (or share) its stream's WAL and start its
    /// ingest tasks.
    pub async fn create_table(&self, config: TableConfig) -> Result<()> {
        let name = config.name.trim().to_lowercase();
        let stream = config.stream.trim().to_lowercase();
        if lock(&self.tables).contains_key(&name) {
            return Err(Error::TableExists(name));
        }

        // Bind the lookup first: a guard held across the match arms would
        // deadlock against the insert below.
        let existing = lock(&self.streams).get(&stream).cloned();
        let wal = match existing {
            Some(wal) => wal,
            None => {
                let wal = Wal::open(
                    &stream,
                    WalConfig {
                        directory: self.opts.dir.join("wal"),
                        sync_policy: self.opts.wal_sync,
                    },
                )
                .await?;
                lock(&self.streams).insert(stream.clone(), wal.clone());
                wal
            }
        };

        let mut config = config;
        config.name = name.clone();
        config.stream = stream;
        let table = Table::new(
            config,
            wal,
            self.opts.follow,
            self.opts.num_partitions,
            self.opts.max_memory_bytes,
        );
        table.start(self.shutdown.subscribe(), self.wal_buffers.clone());
        lock(&self.tables).insert(name, table);
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Option<Arc<Table>> {
        lock(&self.tables).get(&name.trim().to_lowercase()).cloned()
    }

    /// Look up a stream's WAL for a direct insert. Fails on followers.
    pub(crate) fn stream_wal(&self, stream: &str) -> Result<Arc<Wal>> {
        if self.opts.follow.is_some() {
            return Err(Error::InsertOnFollower);
        }
        let stream = stream.trim().to_lowercase();
        lock(&self.streams)
            .get(&stream)
            .cloned()
            .ok_or(Error::UnknownStream(stream))
    }

    /// Append an already-encoded frame to a stream's WAL. This is the
    /// replication entry point, so unlike [`Db::insert`] it is legal on
    /// followers. Returns the frame's end offset.
    pub async fn replicate(&self, stream: &str, frame: &[u8]) -> Result<u64> {
        let stream = stream.trim().to_lowercase();
        let wal = lock(&self.streams)
            .get(&stream)
            .cloned()
            .ok_or(Error::UnknownStream(stream))?;
        wal.append(frame).await
    }

    /// Evaluation "now" for relative query windows: the table's virtual
    /// clock, or the wall clock for unknown tables (and sub-query plans).
    pub fn now(&self, table: &str) -> Timestamp {
        self.get_table(table)
            .map(|t| t.now())
            .unwrap_or_else(Timestamp::now)
    }

    /// Planner wiring over this database's registries.
    pub fn planner_opts(self: &Arc<Self>) -> Opts {
        let tables = self.clone();
        let clocks = self.clone();
        let fields = self.clone();
        Opts {
            get_table: Arc::new(move |name| {
                tables.get_table(name).map(|t| t.store() as Arc<dyn RowSource>)
            }),
            now: Arc::new(move |name| clocks.now(name)),
            field_source: Arc::new(move |name| {
                fields.get_table(name).map(|t| t.fields().to_vec())
            }),
            distributed: self.opts.num_partitions > 1,
            partition_keys: Vec::new(),
        }
    }

    /// Plan and run one SQL query.
    pub fn query(self: &Arc<Self>, sql: &str) -> Result<QueryResult> {
        debug!(sql, "running query");
        let flat = plan(sql, &self.planner_opts())?;
        let ctx = QueryContext::with_timeout(self.opts.query_timeout);
        build_result(sql, flat.as_ref(), &ctx, self.opts.max_response_bytes)
    }

    /// Stop all ingest tasks.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
        info!("database closed");
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

// ---------------------------------------------------------------------------
// Query results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub sql: String,
    /// When the result was produced, epoch millis.
    pub ts: i64,
    pub fields: Vec<String>,
    /// Sorted union of dims appearing in row keys.
    pub dims: Vec<String>,
    pub rows: Vec<ResultRow>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    /// Period start, epoch millis.
    pub ts: i64,
    pub key: BTreeMap<String, serde_json::Value>,
    pub vals: Vec<f64>,
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(b) => (*b).into(),
        Value::Int(i) => (*i).into(),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(Into::into)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => s.clone().into(),
        Value::Bytes(b) => b
            .iter()
            .map(|&byte| serde_json::Value::from(byte))
            .collect::<Vec<_>>()
            .into(),
    }
}

/// Iterate a planned pipeline into a [`QueryResult`], aborting once the
/// estimated payload exceeds `max_response_bytes`. The estimate always
/// undershoots the final JSON, which makes the check conservative.
fn build_result(
    sql: &str,
    flat: &dyn FlatRowSource,
    ctx: &QueryContext,
    max_response_bytes: usize,
) -> Result<QueryResult> {
    let fields: Vec<String> = flat.fields().iter().map(|f| f.name.clone()).collect();
    let mut dims: BTreeSet<String> = BTreeSet::new();
    let mut rows = Vec::new();
    let mut estimated = 0usize;
    let mut too_large = false;

    flat.iterate(ctx, &mut |row| {
        let mut key = BTreeMap::new();
        for (dim, value) in row.key.entries() {
            estimated += dim.len() + 8;
            dims.insert(dim.to_string());
            key.insert(dim.to_string(), value_to_json(&value));
        }
        estimated += 8 * row.vals.len() + 16;
        if estimated > max_response_bytes {
            too_large = true;
            return Ok(false);
        }
        rows.push(ResultRow { ts: row.ts.as_millis(), key, vals: row.vals.clone() });
        Ok(true)
    })?;

    if too_large {
        return Err(Error::ResultTooLarge(estimated, max_response_bytes));
    }
    Ok(QueryResult {
        sql: sql.to_string(),
        ts: Timestamp::now().as_millis(),
        fields,
        dims: dims.into_iter().collect(),
        rows,
    })
}
