//! Aggregate expressions, accumulators and WHERE predicates
//!
//! Aggregates have two input paths: [`AggExpr::update`] folds raw named
//! values (the ingest path and group re-aggregation), while
//! [`AggExpr::observe`] folds an already-reduced value of the same kind (the
//! unflatten path, where a flat row's value is re-admitted into an
//! accumulator).

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use pulsedb_core::{ByteMap, Value};

// ---------------------------------------------------------------------------
// Accumulator
// ---------------------------------------------------------------------------

/// Shared per-(field, period) aggregation state. One shape serves every
/// aggregate kind; the expression decides which parts to read back out.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accum {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl Accum {
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn observe_raw(&mut self, v: f64) {
        if self.count == 0 {
            self.min = v;
            self.max = v;
        } else {
            self.min = self.min.min(v);
            self.max = self.max.max(v);
        }
        self.count += 1;
        self.sum += v;
    }

    pub fn merge(&mut self, other: &Accum) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            *self = *other;
            return;
        }
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

// ---------------------------------------------------------------------------
// Aggregate expressions
// ---------------------------------------------------------------------------

/// Named lookup of numeric values, satisfied by both raw value maps and
/// re-aggregated upstream rows.
pub trait Params {
    fn get(&self, name: &str) -> Option<f64>;
}

impl Params for ByteMap {
    fn get(&self, name: &str) -> Option<f64> {
        ByteMap::get(self, name).and_then(|v| v.as_f64())
    }
}

/// An aggregate over a named input value. `COUNT("*")` counts every update.
#[derive(Debug, Clone, PartialEq)]
pub enum AggExpr {
    Sum(String),
    Count(String),
    Min(String),
    Max(String),
    Avg(String),
}

impl AggExpr {
    pub fn input(&self) -> &str {
        match self {
            AggExpr::Sum(n)
            | AggExpr::Count(n)
            | AggExpr::Min(n)
            | AggExpr::Max(n)
            | AggExpr::Avg(n) => n,
        }
    }

    /// Fold one raw observation into `acc`, reading the input by name.
    pub fn update(&self, acc: &mut Accum, params: &dyn Params) {
        if let AggExpr::Count(name) = self {
            if name == "*" {
                acc.count += 1;
                return;
            }
        }
        if let Some(v) = params.get(self.input()) {
            acc.observe_raw(v);
        }
    }

    /// Fold one already-reduced value of this expression's own kind.
    pub fn observe(&self, acc: &mut Accum, v: f64) {
        match self {
            AggExpr::Count(_) => acc.count += v as u64,
            _ => acc.observe_raw(v),
        }
    }

    /// Extract the reduced value. Empty accumulators read as zero; callers
    /// generally skip empty periods before getting here.
    pub fn value(&self, acc: &Accum) -> f64 {
        match self {
            AggExpr::Sum(_) => acc.sum,
            AggExpr::Count(_) => acc.count as f64,
            AggExpr::Min(_) => {
                if acc.is_empty() {
                    0.0
                } else {
                    acc.min
                }
            }
            AggExpr::Max(_) => {
                if acc.is_empty() {
                    0.0
                } else {
                    acc.max
                }
            }
            AggExpr::Avg(_) => {
                if acc.count == 0 {
                    0.0
                } else {
                    acc.sum / acc.count as f64
                }
            }
        }
    }
}

/// A named aggregate expression. Field ordering is significant everywhere
/// fields travel together.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub expr: AggExpr,
}

impl Field {
    pub fn new(name: impl Into<String>, expr: AggExpr) -> Self {
        Field { name: name.into(), expr }
    }
}

// ---------------------------------------------------------------------------
// Dimension projections
// ---------------------------------------------------------------------------

/// A dimension projection used by GROUP BY re-keying.
#[derive(Debug, Clone, PartialEq)]
pub enum DimExpr {
    Dim(String),
}

impl DimExpr {
    pub fn eval(&self, dims: &ByteMap) -> Option<Value> {
        match self {
            DimExpr::Dim(name) => dims.get(name),
        }
    }
}

/// A named group-by projection.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupBy {
    pub name: String,
    pub expr: DimExpr,
}

impl GroupBy {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        GroupBy { expr: DimExpr::Dim(name.clone()), name }
    }
}

// ---------------------------------------------------------------------------
// WHERE predicates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Materialized results of one WHERE sub-query. The planner fills the set
/// once (compare-and-swap guarded by the enclosing filter); predicates only
/// ever read an immutable snapshot.
#[derive(Debug, Default)]
pub struct SubQueryResults {
    set: OnceLock<HashSet<Vec<u8>>>,
}

impl SubQueryResults {
    pub fn new() -> Arc<Self> {
        Arc::new(SubQueryResults::default())
    }

    /// First fill wins; later fills are dropped.
    pub fn fill(&self, values: HashSet<Vec<u8>>) {
        let _ = self.set.set(values);
    }

    pub fn is_filled(&self) -> bool {
        self.set.get().is_some()
    }

    /// Membership against the snapshot. An unfilled set contains nothing.
    pub fn contains(&self, value: &Value) -> bool {
        self.set
            .get()
            .map(|s| s.contains(&value.canonical_bytes()))
            .unwrap_or(false)
    }
}

/// Predicate tree evaluated against a point's dims.
#[derive(Debug, Clone)]
pub enum Predicate {
    Cmp { dim: String, op: CmpOp, value: Value },
    In { dim: String, results: Arc<SubQueryResults> },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eval(&self, dims: &ByteMap) -> bool {
        match self {
            Predicate::Cmp { dim, op, value } => match dims.get(dim) {
                Some(actual) => eval_cmp(&actual, *op, value),
                None => false,
            },
            Predicate::In { dim, results } => match dims.get(dim) {
                Some(actual) => results.contains(&actual),
                None => false,
            },
            Predicate::And(l, r) => l.eval(dims) && r.eval(dims),
            Predicate::Or(l, r) => l.eval(dims) || r.eval(dims),
            Predicate::Not(inner) => !inner.eval(dims),
        }
    }
}

fn eval_cmp(actual: &Value, op: CmpOp, expected: &Value) -> bool {
    use std::cmp::Ordering;

    let ord = match (actual.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => match (actual, expected) {
            (Value::Str(a), Value::Str(b)) => Some(a.as_str().cmp(b.as_str())),
            _ => {
                // Mixed types only answer equality questions.
                return match op {
                    CmpOp::Eq => actual == expected,
                    CmpOp::Ne => actual != expected,
                    _ => false,
                };
            }
        },
    };
    match (ord, op) {
        (Some(Ordering::Equal), CmpOp::Eq | CmpOp::Le | CmpOp::Ge) => true,
        (Some(Ordering::Less), CmpOp::Lt | CmpOp::Le | CmpOp::Ne) => true,
        (Some(Ordering::Greater), CmpOp::Gt | CmpOp::Ge | CmpOp::Ne) => true,
        _ => false,
    }
}
