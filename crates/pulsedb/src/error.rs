//! Database error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unknown stream: {0}")]
    UnknownStream(String),

    #[error("declining to insert data directly to follower")]
    InsertOnFollower,

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAL corruption at offset {0}")]
    WalCorruption(u64),

    #[error("Decode error: {0}")]
    Decode(#[from] pulsedb_core::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] pulsedb_sql::SqlError),

    #[error("Query result size {0} exceeded limit of {1}")]
    ResultTooLarge(usize, usize),

    #[error("Query dropped before completion")]
    QueryDropped,
}
