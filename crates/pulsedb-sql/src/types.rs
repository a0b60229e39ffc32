//! Parsed query representation

use std::sync::Arc;
use std::time::Duration;

use pulsedb_core::Timestamp;

use crate::expr::{Field, GroupBy, Predicate, SubQueryResults};

/// ORDER BY key: a field name (canonicalized, e.g. `sum(x)`) or a dim name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub name: String,
    pub descending: bool,
}

/// A WHERE-clause sub-query, bound to the result handle its `IN` predicate
/// node reads from.
#[derive(Debug, Clone)]
pub struct SubQuery {
    /// Dimension whose values the sub-query supplies.
    pub dim: String,
    /// Regenerated SQL of the sub-select, planned independently.
    pub sql: String,
    pub results: Arc<SubQueryResults>,
}

/// A parsed SELECT, ready for planning.
#[derive(Debug, Clone)]
pub struct Query {
    /// Original statement text, for diagnostics.
    pub sql: String,
    /// FROM table name (lowercased). Empty when `from_subquery` is set.
    pub from: String,
    /// Regenerated SQL of a derived FROM, planned recursively.
    pub from_subquery: Option<String>,

    pub fields: Vec<Field>,
    /// False only for `SELECT *`.
    pub has_specific_fields: bool,

    pub group_by: Vec<GroupBy>,
    /// True when the query does not project dimensions (all dims pass
    /// through unchanged).
    pub group_by_all: bool,

    pub where_clause: Option<Predicate>,
    /// WHERE text, used as the filter's diagnostic label.
    pub where_sql: String,
    pub sub_queries: Vec<SubQuery>,

    pub as_of: Timestamp,
    pub until: Timestamp,
    /// Signed nanosecond offsets resolved against the table's "now".
    pub as_of_offset: i64,
    pub until_offset: i64,
    /// `ZERO` inherits the source resolution.
    pub resolution: Duration,

    pub order_by: Vec<OrderBy>,
    pub offset: usize,
    pub limit: usize,
}
