//! Dataflow operators for query pipelines
//!
//! Two iteration contracts flow through a planned pipeline: a [`RowSource`]
//! yields grouped rows whose field values are still per-period accumulators,
//! and a [`FlatRowSource`] yields one `(ts, key, vals)` tuple per populated
//! period. [`Flatten`] bridges row → flat and [`Unflatten`] bridges back.
//!
//! Operators take their upstream at construction, so a pipeline is wired in
//! dependency order by the time anything can iterate it. Sinks return
//! `Ok(false)` to stop iteration early; operators propagate that upstream
//! and report it to their own caller. Errors abort the iteration they
//! originate in; no operator retries.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pulsedb_core::{ByteMap, Timestamp, Value};

use crate::error::SqlError;
use crate::expr::{Accum, Field, GroupBy, Params};
use crate::Result;
use crate::types::OrderBy;

// ---------------------------------------------------------------------------
// Context + window
// ---------------------------------------------------------------------------

/// Per-iteration context. Deadline checks happen at operator entry and once
/// per emitted row, which bounds how stale a cancelled iteration can run.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    deadline: Option<Instant>,
}

impl QueryContext {
    pub fn new() -> Self {
        QueryContext::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        QueryContext { deadline: Some(deadline) }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        QueryContext { deadline: Some(Instant::now() + timeout) }
    }

    pub fn check(&self) -> Result<()> {
        match self.deadline {
            Some(d) if Instant::now() >= d => Err(SqlError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// A source's time window: `[as_of, until)` in buckets of `resolution`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub as_of: Timestamp,
    pub until: Timestamp,
    pub resolution: Duration,
}

impl Window {
    pub fn num_periods(&self) -> usize {
        let res = self.resolution.as_nanos() as u64;
        if res == 0 || self.until <= self.as_of {
            return 0;
        }
        let span = self.until.as_nanos() - self.as_of.as_nanos();
        span.div_ceil(res) as usize
    }

    /// Bucket index containing `ts`, if inside the window.
    pub fn bucket_of(&self, ts: Timestamp) -> Option<usize> {
        let res = self.resolution.as_nanos() as u64;
        if res == 0 || ts < self.as_of || ts >= self.until {
            return None;
        }
        let idx = ((ts.as_nanos() - self.as_of.as_nanos()) / res) as usize;
        (idx < self.num_periods()).then_some(idx)
    }

    pub fn period_start(&self, idx: usize) -> Timestamp {
        self.as_of
            .add(Duration::from_nanos(self.resolution.as_nanos() as u64 * idx as u64))
    }
}

// ---------------------------------------------------------------------------
// Source traits
// ---------------------------------------------------------------------------

/// Per-row values: one accumulator per field per period.
pub type RowVals = Vec<Vec<Accum>>;

pub type RowSink<'a> = &'a mut dyn FnMut(&ByteMap, &RowVals) -> Result<bool>;

/// A grouped-row source. `iterate` returns `Ok(true)` when the iteration
/// ran to completion and `Ok(false)` when the sink stopped it early.
pub trait RowSource: Send + Sync {
    fn fields(&self) -> &[Field];
    fn window(&self) -> Window;

    fn as_of(&self) -> Timestamp {
        self.window().as_of
    }

    fn until(&self) -> Timestamp {
        self.window().until
    }

    fn resolution(&self) -> Duration {
        self.window().resolution
    }

    fn iterate(&self, ctx: &QueryContext, sink: RowSink<'_>) -> Result<bool>;
}

/// One already-reduced output row.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatRow {
    pub ts: Timestamp,
    pub key: ByteMap,
    pub vals: Vec<f64>,
}

pub type FlatSink<'a> = &'a mut dyn FnMut(&FlatRow) -> Result<bool>;

/// A flat-row source; same early-stop contract as [`RowSource`].
pub trait FlatRowSource: Send + Sync {
    fn fields(&self) -> &[Field];
    fn window(&self) -> Window;
    fn iterate(&self, ctx: &QueryContext, sink: FlatSink<'_>) -> Result<bool>;
}

impl std::fmt::Debug for dyn FlatRowSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlatRowSource")
            .field("fields", &self.fields())
            .field("window", &self.window())
            .finish()
    }
}

impl<T: RowSource + ?Sized> RowSource for Arc<T> {
    fn fields(&self) -> &[Field] {
        (**self).fields()
    }

    fn window(&self) -> Window {
        (**self).window()
    }

    fn iterate(&self, ctx: &QueryContext, sink: RowSink<'_>) -> Result<bool> {
        (**self).iterate(ctx, sink)
    }
}

// ---------------------------------------------------------------------------
// Filter
// ---------------------------------------------------------------------------

pub type IncludeFn =
    Arc<dyn Fn(&QueryContext, &ByteMap, &RowVals) -> Result<bool> + Send + Sync>;

/// Emits each upstream row the predicate admits. A predicate error
/// terminates the iteration with that error.
pub struct Filter {
    source: Box<dyn RowSource>,
    include: IncludeFn,
    label: String,
}

impl Filter {
    pub fn new(source: Box<dyn RowSource>, include: IncludeFn, label: impl Into<String>) -> Self {
        Filter { source, include, label: label.into() }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl RowSource for Filter {
    fn fields(&self) -> &[Field] {
        self.source.fields()
    }

    fn window(&self) -> Window {
        self.source.window()
    }

    fn iterate(&self, ctx: &QueryContext, sink: RowSink<'_>) -> Result<bool> {
        ctx.check()?;
        self.source.iterate(ctx, &mut |key, vals| {
            if (self.include)(ctx, key, vals)? {
                sink(key, vals)
            } else {
                Ok(true)
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Group
// ---------------------------------------------------------------------------

/// Re-aggregates the upstream into a new grouping and time window. An empty
/// `by` list passes keys through unchanged (group-by-all); zero window
/// parameters inherit the upstream's.
pub struct Group {
    source: Box<dyn RowSource>,
    by: Vec<GroupBy>,
    fields: Vec<Field>,
    resolution: Duration,
    as_of: Timestamp,
    until: Timestamp,
}

impl Group {
    pub fn new(
        source: Box<dyn RowSource>,
        by: Vec<GroupBy>,
        fields: Vec<Field>,
        resolution: Duration,
        as_of: Timestamp,
        until: Timestamp,
    ) -> Self {
        Group { source, by, fields, resolution, as_of, until }
    }

    fn re_key(&self, key: &ByteMap) -> ByteMap {
        if self.by.is_empty() {
            return key.clone();
        }
        let mut pairs: Vec<(&str, Value)> = Vec::with_capacity(self.by.len());
        for group_by in &self.by {
            if let Some(val) = group_by.expr.eval(key) {
                pairs.push((group_by.name.as_str(), val));
            }
        }
        ByteMap::from_sorted_pairs(pairs)
    }
}

/// One upstream row period viewed as named reduced values. Lookup matches a
/// field's declared name first, then its expression's input name, so
/// `SUM(x)` re-aggregates cleanly over a source exposing `sum(x)`.
struct PeriodParams<'a> {
    fields: &'a [Field],
    vals: &'a RowVals,
    period: usize,
}

impl Params for PeriodParams<'_> {
    fn get(&self, name: &str) -> Option<f64> {
        let idx = self
            .fields
            .iter()
            .position(|f| f.name == name)
            .or_else(|| self.fields.iter().position(|f| f.expr.input() == name))?;
        let acc = &self.vals[idx][self.period];
        (!acc.is_empty()).then(|| self.fields[idx].expr.value(acc))
    }
}

impl RowSource for Group {
    fn fields(&self) -> &[Field] {
        if self.fields.is_empty() {
            self.source.fields()
        } else {
            &self.fields
        }
    }

    fn window(&self) -> Window {
        let up = self.source.window();
        Window {
            as_of: if self.as_of.is_zero() { up.as_of } else { self.as_of },
            until: if self.until.is_zero() { up.until } else { self.until },
            resolution: if self.resolution.is_zero() { up.resolution } else { self.resolution },
        }
    }

    fn iterate(&self, ctx: &QueryContext, sink: RowSink<'_>) -> Result<bool> {
        ctx.check()?;
        let win = self.window();
        let up_win = self.source.window();
        let up_fields = self.source.fields().to_vec();
        let out_fields = self.fields().to_vec();
        let num_periods = win.num_periods();

        let mut grouped: BTreeMap<ByteMap, RowVals> = BTreeMap::new();
        self.source.iterate(ctx, &mut |key, vals| {
            let new_key = self.re_key(key);
            let row = grouped
                .entry(new_key)
                .or_insert_with(|| vec![vec![Accum::default(); num_periods]; out_fields.len()]);
            for period in 0..up_win.num_periods() {
                let populated = vals.iter().any(|field_vals| !field_vals[period].is_empty());
                if !populated {
                    continue;
                }
                let Some(bucket) = win.bucket_of(up_win.period_start(period)) else {
                    continue;
                };
                let params = PeriodParams { fields: &up_fields, vals, period };
                for (i, field) in out_fields.iter().enumerate() {
                    field.expr.update(&mut row[i][bucket], &params);
                }
            }
            Ok(true)
        })?;

        for (key, vals) in &grouped {
            ctx.check()?;
            if !sink(key, vals)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Flatten
// ---------------------------------------------------------------------------

/// Emits one flat row per populated `(key, period)` combination.
pub struct Flatten {
    source: Box<dyn RowSource>,
}

impl Flatten {
    pub fn new(source: Box<dyn RowSource>) -> Self {
        Flatten { source }
    }
}

impl FlatRowSource for Flatten {
    fn fields(&self) -> &[Field] {
        self.source.fields()
    }

    fn window(&self) -> Window {
        self.source.window()
    }

    fn iterate(&self, ctx: &QueryContext, sink: FlatSink<'_>) -> Result<bool> {
        ctx.check()?;
        let win = self.window();
        let fields = self.source.fields().to_vec();
        self.source.iterate(ctx, &mut |key, vals| {
            for period in 0..win.num_periods() {
                let populated = vals.iter().any(|field_vals| !field_vals[period].is_empty());
                if !populated {
                    continue;
                }
                let row = FlatRow {
                    ts: win.period_start(period),
                    key: key.clone(),
                    vals: fields
                        .iter()
                        .enumerate()
                        .map(|(i, f)| f.expr.value(&vals[i][period]))
                        .collect(),
                };
                if !sink(&row)? {
                    return Ok(false);
                }
            }
            Ok(true)
        })
    }
}

// ---------------------------------------------------------------------------
// Unflatten
// ---------------------------------------------------------------------------

/// Reconstitutes a row source from a flat source, splitting per-period
/// values back into accumulators. Declared fields map positionally onto the
/// flat source's values.
pub struct Unflatten {
    source: Box<dyn FlatRowSource>,
    fields: Vec<Field>,
}

impl Unflatten {
    pub fn new(source: Box<dyn FlatRowSource>, fields: Vec<Field>) -> Self {
        Unflatten { source, fields }
    }
}

impl RowSource for Unflatten {
    fn fields(&self) -> &[Field] {
        &self.fields
    }

    fn window(&self) -> Window {
        self.source.window()
    }

    fn iterate(&self, ctx: &QueryContext, sink: RowSink<'_>) -> Result<bool> {
        ctx.check()?;
        let win = self.window();
        let num_periods = win.num_periods();
        let width = self.fields.len();

        let mut grouped: BTreeMap<ByteMap, RowVals> = BTreeMap::new();
        self.source.iterate(ctx, &mut |row| {
            let Some(bucket) = win.bucket_of(row.ts) else {
                return Ok(true);
            };
            let vals = grouped
                .entry(row.key.clone())
                .or_insert_with(|| vec![vec![Accum::default(); num_periods]; width]);
            for (i, field) in self.fields.iter().enumerate() {
                if let Some(v) = row.vals.get(i) {
                    field.expr.observe(&mut vals[i][bucket], *v);
                }
            }
            Ok(true)
        })?;

        for (key, vals) in &grouped {
            ctx.check()?;
            if !sink(key, vals)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Sort
// ---------------------------------------------------------------------------

/// Buffers the upstream and emits it ordered by the configured keys.
/// Stable on ties.
pub struct Sort {
    source: Box<dyn FlatRowSource>,
    order_by: Vec<OrderBy>,
}

impl Sort {
    pub fn new(source: Box<dyn FlatRowSource>, order_by: Vec<OrderBy>) -> Self {
        Sort { source, order_by }
    }
}

enum SortKey {
    FieldIdx(usize),
    Dim(String),
}

fn cmp_dim_values(a: Option<Value>, b: Option<Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => match (av.as_f64(), bv.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => av.canonical_bytes().cmp(&bv.canonical_bytes()),
        },
    }
}

impl FlatRowSource for Sort {
    fn fields(&self) -> &[Field] {
        self.source.fields()
    }

    fn window(&self) -> Window {
        self.source.window()
    }

    fn iterate(&self, ctx: &QueryContext, sink: FlatSink<'_>) -> Result<bool> {
        ctx.check()?;
        let keys: Vec<(SortKey, bool)> = self
            .order_by
            .iter()
            .map(|ob| {
                let key = match self.fields().iter().position(|f| f.name == ob.name) {
                    Some(idx) => SortKey::FieldIdx(idx),
                    None => SortKey::Dim(ob.name.clone()),
                };
                (key, ob.descending)
            })
            .collect();

        let mut rows: Vec<FlatRow> = Vec::new();
        self.source.iterate(ctx, &mut |row| {
            rows.push(row.clone());
            Ok(true)
        })?;

        rows.sort_by(|a, b| {
            use std::cmp::Ordering;
            for (key, descending) in &keys {
                let ord = match key {
                    SortKey::FieldIdx(i) => a.vals[*i]
                        .partial_cmp(&b.vals[*i])
                        .unwrap_or(Ordering::Equal),
                    SortKey::Dim(name) => cmp_dim_values(a.key.get(name), b.key.get(name)),
                };
                let ord = if *descending { ord.reverse() } else { ord };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        for row in &rows {
            ctx.check()?;
            if !sink(row)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Offset + Limit
// ---------------------------------------------------------------------------

/// Discards the first `n` flat rows.
pub struct Offset {
    source: Box<dyn FlatRowSource>,
    offset: usize,
}

impl Offset {
    pub fn new(source: Box<dyn FlatRowSource>, offset: usize) -> Self {
        Offset { source, offset }
    }
}

impl FlatRowSource for Offset {
    fn fields(&self) -> &[Field] {
        self.source.fields()
    }

    fn window(&self) -> Window {
        self.source.window()
    }

    fn iterate(&self, ctx: &QueryContext, sink: FlatSink<'_>) -> Result<bool> {
        ctx.check()?;
        let mut skipped = 0usize;
        self.source.iterate(ctx, &mut |row| {
            if skipped < self.offset {
                skipped += 1;
                Ok(true)
            } else {
                sink(row)
            }
        })
    }
}

/// Emits at most `n` flat rows, then reports end of stream.
pub struct Limit {
    source: Box<dyn FlatRowSource>,
    limit: usize,
}

impl Limit {
    pub fn new(source: Box<dyn FlatRowSource>, limit: usize) -> Self {
        Limit { source, limit }
    }
}

impl FlatRowSource for Limit {
    fn fields(&self) -> &[Field] {
        self.source.fields()
    }

    fn window(&self) -> Window {
        self.source.window()
    }

    fn iterate(&self, ctx: &QueryContext, sink: FlatSink<'_>) -> Result<bool> {
        ctx.check()?;
        if self.limit == 0 {
            return Ok(false);
        }
        let mut emitted = 0usize;
        self.source.iterate(ctx, &mut |row| {
            emitted += 1;
            let keep_going = sink(row)?;
            Ok(keep_going && emitted < self.limit)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
