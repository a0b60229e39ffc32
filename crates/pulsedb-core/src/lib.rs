//! PulseDB core data model
//!
//! The types shared by the ingest path and the query engine:
//!
//! - [`Timestamp`]: nanosecond instants with a fixed wire encoding
//! - [`Value`] / [`ByteMap`]: an immutable, self-describing encoding of a
//!   string-keyed map of primitives, used for both the dimensions and the
//!   values of a point
//! - [`Point`] and the WAL frame codec: the only persisted ingest artifact
//!
//! Everything here is deliberately dependency-light; the database and SQL
//! crates build on top of it.

pub mod bytemap;
pub mod error;
pub mod frame;
pub mod time;

pub use bytemap::{ByteMap, Value};
pub use error::{Error, Result};
pub use frame::Point;
pub use time::Timestamp;
