//! Query planner
//!
//! Compiles a SQL statement into a pipeline of dataflow operators ending in
//! a [`FlatRowSource`]. Planning is pure: it wires operators together but
//! never iterates data, so plans are cheap and deterministic under test
//! (the evaluation "now" is a function, not a clock read).

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pulsedb_core::Timestamp;

use crate::error::SqlError;
use crate::operators::{
    Filter, FlatRowSource, Flatten, Group, IncludeFn, Limit, Offset, QueryContext, RowSource,
    Sort, Unflatten,
};
use crate::parser::{parse, FieldSource};
use crate::types::Query;
use crate::Result;

/// Planner configuration.
pub struct Opts {
    /// Base row source for `FROM`.
    pub get_table: Arc<dyn Fn(&str) -> Option<Arc<dyn RowSource>> + Send + Sync>,
    /// Evaluation "now" for relative time offsets.
    pub now: Arc<dyn Fn(&str) -> Timestamp + Send + Sync>,
    /// Field definitions handed to the parser.
    pub field_source: FieldSource,
    /// Plan for multi-partition execution. Consulted by the distributed
    /// executor; single-node pipelines are identical either way.
    pub distributed: bool,
    /// Keys projected for partition-aware planning.
    pub partition_keys: Vec<String>,
}

/// Compile `sql` into an iterable flat-row pipeline.
pub fn plan(sql: &str, opts: &Opts) -> Result<Box<dyn FlatRowSource>> {
    let mut query = parse(sql, &opts.field_source)?;
    tracing::debug!(
        from = %query.from,
        sub_queries = query.sub_queries.len(),
        distributed = opts.distributed,
        "planning query"
    );

    let mut source: Box<dyn RowSource> = match &query.from_subquery {
        Some(sub_sql) => {
            let sub_source = plan(sub_sql, opts)?;
            let sub_fields = sub_source.fields().to_vec();
            Box::new(Unflatten::new(sub_source, sub_fields))
        }
        None => {
            let table = (opts.get_table)(&query.from)
                .ok_or_else(|| SqlError::TableNotFound(query.from.clone()))?;
            Box::new(table)
        }
    };

    let now = (opts.now)(&query.from);
    if query.as_of_offset != 0 {
        query.as_of = now.offset_by(query.as_of_offset);
    }
    if query.until_offset != 0 {
        query.until = now.offset_by(query.until_offset);
    }

    let as_of_changed = !query.as_of.is_zero() && query.as_of != source.as_of();
    let until_changed = !query.until.is_zero() && query.until != source.until();
    let resolution_changed =
        !query.resolution.is_zero() && query.resolution != source.resolution();

    if let Some(where_clause) = query.where_clause.clone() {
        let run_sub_queries = plan_sub_queries(&query, opts)?;
        let has_run_sub_queries = Arc::new(AtomicBool::new(false));
        let include: IncludeFn = Arc::new(move |ctx, key, _vals| {
            if has_run_sub_queries
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                if let Err(err) = run_sub_queries(ctx) {
                    // A timed-out sub-query leaves partial results behind;
                    // the predicate still runs against those.
                    if !matches!(err, SqlError::DeadlineExceeded) {
                        return Err(err);
                    }
                }
            }
            Ok(where_clause.eval(key))
        });
        source = Box::new(Filter::new(source, include, query.where_sql.clone()));
    }

    if as_of_changed
        || until_changed
        || resolution_changed
        || !query.group_by_all
        || query.has_specific_fields
    {
        source = Box::new(Group::new(
            source,
            query.group_by.clone(),
            query.fields.clone(),
            query.resolution,
            query.as_of,
            query.until,
        ));
    }

    let mut flat: Box<dyn FlatRowSource> = Box::new(Flatten::new(source));

    if !query.order_by.is_empty() {
        flat = Box::new(Sort::new(flat, query.order_by.clone()));
    }
    if query.offset > 0 {
        flat = Box::new(Offset::new(flat, query.offset));
    }
    if query.limit > 0 {
        flat = Box::new(Limit::new(flat, query.limit));
    }

    Ok(flat)
}

type RunSubQueries = Arc<dyn Fn(&QueryContext) -> Result<()> + Send + Sync>;

/// Plan each WHERE sub-query now; return a closure that runs them later.
/// The closure fills each sub-query's result snapshot; on deadline expiry it
/// publishes whatever was collected and reports the expiry to the caller.
fn plan_sub_queries(query: &Query, opts: &Opts) -> Result<RunSubQueries> {
    let mut planned = Vec::with_capacity(query.sub_queries.len());
    for sub in &query.sub_queries {
        let flat = plan(&sub.sql, opts)?;
        planned.push((sub.dim.clone(), sub.results.clone(), flat));
    }
    Ok(Arc::new(move |ctx: &QueryContext| {
        for (dim, results, flat) in &planned {
            let mut collected: HashSet<Vec<u8>> = HashSet::new();
            let outcome = flat.iterate(ctx, &mut |row| {
                if let Some(value) = row.key.get(dim) {
                    collected.insert(value.canonical_bytes());
                }
                Ok(true)
            });
            match outcome {
                Ok(_) => results.fill(collected),
                Err(SqlError::DeadlineExceeded) => {
                    results.fill(collected);
                    return Err(SqlError::DeadlineExceeded);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{AggExpr, Field};
    use crate::operators::tests::{sum_source, VecSource};
    use crate::operators::{FlatRow, RowSink, RowVals, Window};
    use crate::parser::empty_field_source;
    use pulsedb_core::{ByteMap, Value};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn opts_for(source: VecSource) -> Opts {
        let table: Arc<dyn RowSource> = Arc::new(source);
        Opts {
            get_table: Arc::new(move |name| (name == "t").then(|| table.clone())),
            now: Arc::new(|_| Timestamp::from_secs(780)),
            field_source: Arc::new(|table| {
                (table == "t").then(|| vec![Field::new("x", AggExpr::Sum("x".to_string()))])
            }),
            distributed: false,
            partition_keys: Vec::new(),
        }
    }

    fn collect(flat: &dyn FlatRowSource) -> Vec<FlatRow> {
        let mut rows = Vec::new();
        flat.iterate(&QueryContext::new(), &mut |row| {
            rows.push(row.clone());
            Ok(true)
        })
        .unwrap();
        rows
    }

    #[test]
    fn test_plan_unknown_table() {
        let opts = opts_for(sum_source(vec![]));
        let err = plan("SELECT SUM(x) FROM nope", &opts).unwrap_err();
        assert!(matches!(err, SqlError::TableNotFound(_)));
    }

    #[test]
    fn test_parse_error_surfaces_verbatim() {
        let opts = opts_for(sum_source(vec![]));
        assert!(matches!(plan("NOT SQL AT ALL", &opts), Err(SqlError::Parse(_))));
    }

    #[test]
    fn test_select_star_plans_without_group() {
        // SELECT * with no window changes keeps the source's own grouping;
        // the pipeline is just source -> flatten.
        let opts = opts_for(sum_source(vec![("A", vec![1.0]), ("B", vec![2.0])]));
        let flat = plan("SELECT * FROM t", &opts).unwrap();
        let rows = collect(flat.as_ref());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].vals, vec![1.0]);
    }

    #[test]
    fn test_specific_fields_force_group() {
        let opts = opts_for(sum_source(vec![("A", vec![1.0]), ("A", vec![2.0])]));
        let flat = plan("SELECT SUM(x) FROM t", &opts).unwrap();
        // Both source rows share key {d: A}; the mandatory re-group merges them.
        let rows = collect(flat.as_ref());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vals, vec![3.0]);
    }

    #[test]
    fn test_planning_is_pure() {
        struct PanickySource {
            fields: Vec<Field>,
        }
        impl RowSource for PanickySource {
            fn fields(&self) -> &[Field] {
                &self.fields
            }
            fn window(&self) -> Window {
                Window {
                    as_of: Timestamp::from_secs(0),
                    until: Timestamp::from_secs(60),
                    resolution: Duration::from_secs(60),
                }
            }
            fn iterate(&self, _ctx: &QueryContext, _sink: RowSink<'_>) -> crate::Result<bool> {
                panic!("planning must not iterate data");
            }
        }
        let table: Arc<dyn RowSource> = Arc::new(PanickySource {
            fields: vec![Field::new("x", AggExpr::Sum("x".to_string()))],
        });
        let opts = Opts {
            get_table: Arc::new(move |_| Some(table.clone())),
            now: Arc::new(|_| Timestamp::from_secs(60)),
            field_source: empty_field_source(),
            distributed: false,
            partition_keys: Vec::new(),
        };
        plan(
            "SELECT SUM(x) FROM t WHERE d IN (SELECT d FROM t) ORDER BY SUM(x) LIMIT 5",
            &opts,
        )
        .unwrap();
    }

    #[test]
    fn test_relative_offsets_resolve_against_now() {
        // now = 780s, ASOF '-2m' -> 660s: only the second period remains.
        let opts = opts_for(sum_source(vec![("A", vec![1.0, 2.0])]));
        let flat = plan("SELECT SUM(x) FROM t ASOF '-2m'", &opts).unwrap();
        let rows = collect(flat.as_ref());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vals, vec![2.0]);
        assert_eq!(rows[0].ts, Timestamp::from_secs(660));
    }

    #[test]
    fn test_from_subquery_unflattens() {
        let opts = opts_for(sum_source(vec![("A", vec![1.0]), ("B", vec![2.0])]));
        let flat = plan("SELECT a FROM (SELECT SUM(x) AS a FROM t)", &opts).unwrap();
        assert_eq!(flat.fields().len(), 1);
        assert_eq!(flat.fields()[0].name, "a");
        let rows = collect(flat.as_ref());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].vals, vec![1.0]);
        assert_eq!(rows[1].vals, vec![2.0]);
    }

    #[test]
    fn test_where_filter_with_subquery_runs_once() {
        let opts = opts_for(sum_source(vec![("A", vec![1.0]), ("B", vec![2.0])]));
        let flat = plan(
            "SELECT SUM(x) FROM t WHERE d IN (SELECT d FROM t WHERE d = 'B' GROUP BY d)",
            &opts,
        )
        .unwrap();
        let rows = collect(flat.as_ref());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].vals, vec![2.0]);
    }

    #[test]
    fn test_subquery_one_shot_under_concurrency() {
        // 100 concurrent predicate invocations; the sub-queries run at most
        // once across the filter's lifetime.
        let runs = Arc::new(AtomicUsize::new(0));
        let runs_clone = runs.clone();
        let has_run = Arc::new(AtomicBool::new(false));
        let include: IncludeFn = Arc::new(move |_ctx, _key, _vals| {
            if has_run
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                runs_clone.fetch_add(1, Ordering::SeqCst);
            }
            Ok(true)
        });
        let key = ByteMap::new(vec![("d".to_string(), Value::Int(1))]);
        let vals: RowVals = vec![];
        let mut handles = Vec::new();
        for _ in 0..100 {
            let include = include.clone();
            let key = key.clone();
            let vals = vals.clone();
            handles.push(std::thread::spawn(move || {
                include(&QueryContext::new(), &key, &vals).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subquery_deadline_is_non_fatal() {
        // The sub-query targets a table whose iteration outlives the query
        // deadline. The sub-query run reports the expiry, the filter
        // swallows it, and the query completes (empty) without error.
        struct SleepySource {
            fields: Vec<Field>,
        }
        impl RowSource for SleepySource {
            fn fields(&self) -> &[Field] {
                &self.fields
            }
            fn window(&self) -> Window {
                Window {
                    as_of: Timestamp::from_secs(600),
                    until: Timestamp::from_secs(660),
                    resolution: Duration::from_secs(60),
                }
            }
            fn iterate(&self, ctx: &QueryContext, sink: RowSink<'_>) -> crate::Result<bool> {
                ctx.check()?;
                std::thread::sleep(Duration::from_millis(50));
                let key = ByteMap::new(vec![("d".to_string(), Value::Str("A".to_string()))]);
                let vals: RowVals =
                    vec![vec![crate::expr::Accum { count: 1, sum: 1.0, min: 1.0, max: 1.0 }]];
                sink(&key, &vals)
            }
        }

        let fast: Arc<dyn RowSource> =
            Arc::new(sum_source(vec![("A", vec![1.0]), ("B", vec![2.0])]));
        let slow: Arc<dyn RowSource> = Arc::new(SleepySource {
            fields: vec![Field::new("x", AggExpr::Sum("x".to_string()))],
        });
        let opts = Opts {
            get_table: Arc::new(move |name| match name {
                "t" => Some(fast.clone()),
                "slow" => Some(slow.clone()),
                _ => None,
            }),
            now: Arc::new(|_| Timestamp::from_secs(780)),
            field_source: empty_field_source(),
            distributed: false,
            partition_keys: Vec::new(),
        };
        let flat = plan(
            "SELECT SUM(x) FROM t WHERE d IN (SELECT d FROM slow GROUP BY d)",
            &opts,
        )
        .unwrap();

        let ctx = QueryContext::with_timeout(Duration::from_millis(5));
        let mut rows = Vec::new();
        let finished = flat
            .iterate(&ctx, &mut |row| {
                rows.push(row.clone());
                Ok(true)
            })
            .unwrap();
        assert!(finished);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_order_offset_limit_pipeline() {
        let opts = opts_for(sum_source(vec![
            ("A", vec![3.0]),
            ("B", vec![1.0]),
            ("C", vec![2.0]),
        ]));
        let flat = plan(
            "SELECT d, SUM(x) FROM t GROUP BY d ORDER BY SUM(x) DESC OFFSET 1 LIMIT 1",
            &opts,
        )
        .unwrap();
        let mut rows = Vec::new();
        let _ = flat
            .iterate(&QueryContext::new(), &mut |row| {
                rows.push(row.clone());
                Ok(true)
            })
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key.get("d"), Some(Value::Str("C".to_string())));
        assert_eq!(rows[0].vals, vec![2.0]);
    }
}
