//! Query coalescing
//!
//! Queries against the same table tend to arrive in bursts (dashboards).
//! The coalescer collects pending queries for a short window, groups them
//! by target table and runs each batch concurrently. Queries for other
//! tables seen while collecting are re-queued from a spawned drain task,
//! never from the coalescer loop itself, so a full queue cannot deadlock
//! its only reader. An `immediate` query cuts the collection window short.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use pulsedb_sql::{empty_field_source, parse};

use crate::db::{Db, QueryResult};
use crate::error::Error;
use crate::Result;

struct QueryJob {
    sql: String,
    table: String,
    immediate: bool,
    respond: oneshot::Sender<Result<QueryResult>>,
}

pub struct QueryCoalescer {
    tx: mpsc::Sender<QueryJob>,
}

impl QueryCoalescer {
    /// Start the coalescer loop over `db`.
    pub fn start(db: Arc<Db>, window: Duration, queue: usize) -> Self {
        let (tx, rx) = mpsc::channel(queue);
        let requeue = tx.downgrade();
        tokio::spawn(run(db, rx, requeue, window));
        QueryCoalescer { tx }
    }

    /// Submit a query and wait for its result. `immediate` skips batching.
    pub async fn submit(&self, sql: &str, immediate: bool) -> Result<QueryResult> {
        // Parse up front so grouping by table works and bad SQL fails fast.
        let parsed = parse(sql, &empty_field_source())?;
        let (respond, rx) = oneshot::channel();
        let job = QueryJob {
            sql: sql.to_string(),
            table: parsed.from,
            immediate,
            respond,
        };
        self.tx.send(job).await.map_err(|_| Error::QueryDropped)?;
        rx.await.map_err(|_| Error::QueryDropped)?
    }
}

async fn run(
    db: Arc<Db>,
    mut rx: mpsc::Receiver<QueryJob>,
    requeue: mpsc::WeakSender<QueryJob>,
    window: Duration,
) {
    while let Some(first) = rx.recv().await {
        let table = first.table.clone();
        let mut batch = vec![first];
        let mut remainders = Vec::new();

        if !batch[0].immediate {
            let deadline = tokio::time::sleep(window);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    _ = &mut deadline => break,
                    job = rx.recv() => match job {
                        None => break,
                        Some(job) => {
                            if job.table == table {
                                let immediate = job.immediate;
                                batch.push(job);
                                if immediate {
                                    break;
                                }
                            } else {
                                remainders.push(job);
                            }
                        }
                    }
                }
            }
        }

        debug!(count = batch.len(), table = %table, "executing coalesced queries");

        if !remainders.is_empty() {
            // Drain from a helper task; sending from this loop could block
            // forever once the queue fills, since this loop is its only
            // reader.
            let requeue = requeue.clone();
            tokio::spawn(async move {
                let Some(tx) = requeue.upgrade() else {
                    warn!(dropped = remainders.len(), "coalescer gone, dropping re-queued queries");
                    return;
                };
                for job in remainders {
                    if tx.send(job).await.is_err() {
                        return;
                    }
                }
            });
        }

        let mut handles = Vec::with_capacity(batch.len());
        for job in batch {
            let db = db.clone();
            handles.push(tokio::spawn(async move {
                let result = db.query(&job.sql);
                let _ = job.respond.send(result);
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DbOptions;
    use crate::table::TableConfig;
    use crate::wal::SyncPolicy;
    use pulsedb_sql::{AggExpr, Field};
    use tempfile::TempDir;

    async fn test_db(dir: &TempDir) -> Arc<Db> {
        let db = Db::open(DbOptions {
            dir: dir.path().to_path_buf(),
            wal_sync: SyncPolicy::Never,
            ..Default::default()
        });
        for name in ["t", "u"] {
            db.create_table(TableConfig::new(
                name,
                vec![Field::new("x", AggExpr::Sum("x".to_string()))],
            ))
            .await
            .unwrap();
        }
        db
    }

    #[tokio::test]
    async fn test_batch_same_table() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let coalescer = Arc::new(QueryCoalescer::start(db, Duration::from_millis(20), 16));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let c = coalescer.clone();
            handles.push(tokio::spawn(async move {
                c.submit("SELECT SUM(x) FROM t", false).await
            }));
        }
        for h in handles {
            let result = h.await.unwrap().unwrap();
            assert_eq!(result.fields, vec!["sum(x)".to_string()]);
        }
    }

    #[tokio::test]
    async fn test_requeue_other_tables() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let coalescer = Arc::new(QueryCoalescer::start(db, Duration::from_millis(10), 16));

        let mut handles = Vec::new();
        for i in 0..8 {
            let c = coalescer.clone();
            let table = if i % 2 == 0 { "t" } else { "u" };
            let sql = format!("SELECT SUM(x) FROM {table}");
            handles.push(tokio::spawn(async move { c.submit(&sql, false).await }));
        }
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_immediate_skips_window() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        // Long window: only the immediate fast path can finish quickly.
        let coalescer = QueryCoalescer::start(db, Duration::from_secs(30), 16);
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            coalescer.submit("SELECT SUM(x) FROM t", true),
        )
        .await
        .expect("immediate query should not wait for the window")
        .unwrap();
        assert_eq!(result.sql, "SELECT SUM(x) FROM t");
    }

    #[tokio::test]
    async fn test_parse_error_fails_fast() {
        let dir = TempDir::new().unwrap();
        let db = test_db(&dir).await;
        let coalescer = QueryCoalescer::start(db, Duration::from_millis(10), 16);
        let err = coalescer.submit("BOGUS", false).await.unwrap_err();
        assert!(matches!(err, Error::Sql(_)));
    }
}
