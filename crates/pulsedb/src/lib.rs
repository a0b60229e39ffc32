//! PulseDB: a time-series analytic database
//!
//! Event streams are normalized into timestamped dimension/value points,
//! made durable in a per-stream write-ahead log, folded into grouped
//! in-memory aggregation state by a per-table insert worker, and queried
//! with aggregating SQL.
//!
//! ## Ingest path
//!
//! ```text
//! caller ──► normalizer ──► WAL append ──► WAL reader ──► insert worker ──► row store
//!            (expand        (durable)      (tails the     (decode, filter,
//!             vectors,                      log)           re-key, copy)
//!             coerce)
//! ```
//!
//! ## Query path
//!
//! SQL is parsed and planned (`pulsedb-sql`) into a pipeline of operators
//! over the table's row store: source → filter → group → flatten →
//! order/offset/limit. See [`Db::query`].
//!
//! ## Example
//!
//! ```ignore
//! use pulsedb::{Db, DbOptions, TableConfig};
//! use pulsedb_sql::{AggExpr, Field};
//!
//! let db = Db::open(DbOptions::default());
//! db.create_table(TableConfig::new(
//!     "metrics",
//!     vec![Field::new("x", AggExpr::Sum("x".to_string()))],
//! ))
//! .await?;
//!
//! db.insert("metrics", ts, &dims, &vals).await?;
//! db.get_table("metrics").unwrap().wait_caught_up().await;
//!
//! let result = db.query("SELECT SUM(x) FROM metrics")?;
//! ```

pub mod clock;
pub mod coalesce;
mod db;
mod error;
mod insert;
pub mod partition;
pub mod stats;
pub mod store;
pub mod table;
pub mod wal;

pub use coalesce::QueryCoalescer;
pub use db::{Db, DbOptions, QueryResult, ResultRow};
pub use error::Error;
pub use stats::StatsSnapshot;
pub use store::{Insert, MemRowStore};
pub use table::{FollowConfig, Table, TableConfig};
pub use wal::{BufferPool, SyncPolicy, Wal, WalConfig, WalReader};

pub type Result<T> = std::result::Result<T, Error>;
