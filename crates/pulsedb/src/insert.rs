//! Insert normalization
//!
//! User inserts arrive as dynamic JSON maps. Scalars coerce to floats;
//! vector-valued fields expand into multiple single-valued inserts (the
//! first element folds into the main row, each further element becomes an
//! independent insert with the same dims and timestamp); anything else is
//! logged and dropped without failing the whole insert.
//!
//! Every emitted row is one WAL frame. When several sub-rows are written
//! and some fail, the caller sees the last error; sub-inserts are
//! independent, so "something failed" is all a caller can act on anyway.

use serde_json::Value as JsonValue;
use tracing::{error, trace, warn};

use pulsedb_core::{frame::encode_frame, ByteMap, Timestamp, Value};

use crate::db::Db;
use crate::wal::Wal;
use crate::Result;

impl Db {
    /// Insert one point into a stream. Fails on followers and unknown
    /// streams.
    pub async fn insert(
        &self,
        stream: &str,
        ts: Timestamp,
        dims: &serde_json::Map<String, JsonValue>,
        vals: &serde_json::Map<String, JsonValue>,
    ) -> Result<()> {
        let wal = self.stream_wal(stream)?;
        let dims = json_dims(dims);

        let mut last_err = None;
        let mut main_pairs: Vec<(String, Value)> = Vec::new();

        for (name, value) in vals {
            match value {
                JsonValue::Number(_) => match json_scalar(value) {
                    Some(v) => main_pairs.push((name.clone(), v)),
                    None => warn!(field = %name, "non-finite number, ignoring"),
                },
                JsonValue::Array(items) => {
                    let mut scalars = items.iter().filter_map(json_scalar);
                    if let Some(first) = scalars.next() {
                        // First element rides with the main row.
                        main_pairs.push((name.clone(), first));
                    }
                    // Additional elements become independent inserts.
                    for v in scalars {
                        let sub_vals = ByteMap::new(vec![(name.clone(), v)]);
                        if let Err(e) = self.do_insert_raw(&wal, ts, &dims, &sub_vals).await {
                            last_err = Some(e);
                        }
                    }
                    let dropped = items.iter().filter(|i| json_scalar(i).is_none()).count();
                    if dropped > 0 {
                        error!(field = %name, dropped, "vector contained non-numeric values, ignoring them");
                    }
                }
                other => {
                    error!(field = %name, value = ?other, "insert contained value of unsupported type, ignoring");
                }
            }
        }

        if !main_pairs.is_empty() {
            if let Err(e) = self.do_insert_raw(&wal, ts, &dims, &ByteMap::new(main_pairs)).await {
                last_err = Some(e);
            }
        }

        match last_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Insert with dims and vals already ByteMap-encoded: exactly one WAL
    /// frame, no vector expansion.
    pub async fn insert_raw(
        &self,
        stream: &str,
        ts: Timestamp,
        dims: ByteMap,
        vals: ByteMap,
    ) -> Result<()> {
        let wal = self.stream_wal(stream)?;
        self.do_insert_raw(&wal, ts, &dims, &vals).await
    }

    async fn do_insert_raw(
        &self,
        wal: &Wal,
        ts: Timestamp,
        dims: &ByteMap,
        vals: &ByteMap,
    ) -> Result<()> {
        let frame = encode_frame(ts, dims, vals);
        match wal.append(&frame).await {
            Ok(offset) => {
                trace!(stream = wal.stream(), offset, "appended frame");
                Ok(())
            }
            Err(e) => {
                error!(stream = wal.stream(), error = %e, "WAL append failed");
                Err(e)
            }
        }
    }
}

/// Dims keep their native types; unsupported values are dropped with a log.
fn json_dims(dims: &serde_json::Map<String, JsonValue>) -> ByteMap {
    let mut pairs = Vec::with_capacity(dims.len());
    for (name, value) in dims {
        match json_dim_value(value) {
            Some(v) => pairs.push((name.clone(), v)),
            None => warn!(dim = %name, value = ?value, "unsupported dim value, ignoring"),
        }
    }
    ByteMap::new(pairs)
}

fn json_dim_value(value: &JsonValue) -> Option<Value> {
    match value {
        JsonValue::Bool(b) => Some(Value::Bool(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Int(i))
            } else {
                n.as_f64().map(Value::Float)
            }
        }
        JsonValue::String(s) => Some(Value::Str(s.clone())),
        _ => None,
    }
}

/// Values coerce to floats: integers are promoted.
fn json_scalar(value: &JsonValue) -> Option<Value> {
    value.as_f64().filter(|f| f.is_finite()).map(Value::Float)
}
