//! SQL error types

use thiserror::Error;

/// SQL planning and execution errors
#[derive(Debug, Error)]
pub enum SqlError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported query shape: {0}")]
    Unsupported(String),

    #[error("nested FROM subqueries not supported")]
    NestedFromSubquery,

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("Execution error: {0}")]
    Execution(String),
}
