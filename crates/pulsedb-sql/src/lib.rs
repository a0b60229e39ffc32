//! PulseDB SQL engine
//!
//! Parses aggregating SELECT statements and compiles them into pipelines of
//! dataflow operators over grouped time-series rows.
//!
//! ## Supported SQL
//!
//! ```sql
//! -- Aggregate over everything
//! SELECT SUM(x) FROM metrics;
//!
//! -- Filter on dimensions
//! SELECT SUM(x) FROM metrics WHERE region = 'eu' AND y > 0;
//!
//! -- Group and window
//! SELECT host, SUM(x), AVG(y) FROM metrics
//! GROUP BY host
//! ASOF '-1h' UNTIL '-5m' RESOLUTION '5m';
//!
//! -- Sub-query in FROM (one level, flat)
//! SELECT a FROM (SELECT SUM(x) AS a FROM metrics);
//!
//! -- Sub-query in WHERE
//! SELECT SUM(x) FROM metrics
//! WHERE host IN (SELECT host FROM hot_hosts GROUP BY host)
//! ORDER BY SUM(x) DESC LIMIT 10;
//! ```
//!
//! ## Limitations
//!
//! - Read-only: no DDL/DML statements
//! - No JOINs; a derived FROM must itself be a plain SELECT
//! - `ASOF`/`UNTIL`/`RESOLUTION` apply to the top-level query only

mod error;
pub mod expr;
pub mod operators;
pub mod parser;
pub mod planner;
mod types;

pub use error::SqlError;
pub use expr::{Accum, AggExpr, CmpOp, DimExpr, Field, GroupBy, Params, Predicate, SubQueryResults};
pub use operators::{
    Filter, FlatRow, FlatRowSource, FlatSink, Flatten, Group, IncludeFn, Limit, Offset,
    QueryContext, RowSink, RowSource, RowVals, Sort, Unflatten, Window,
};
pub use parser::{parse, empty_field_source, FieldSource};
pub use planner::{plan, Opts};
pub use types::{OrderBy, Query, SubQuery};

/// Result type for SQL operations
pub type Result<T> = std::result::Result<T, SqlError>;
