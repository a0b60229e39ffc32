//! WAL frame codec
//!
//! The only persisted ingest artifact. One frame is one point:
//!
//! ```text
//! ┌──────────┬───────────┬────────┬───────────┬────────┐
//! │ ts       │ dims len  │ dims   │ vals len  │ vals   │
//! │ (8, BE)  │ (4, BE)   │ (N)    │ (4, BE)   │ (M)    │
//! └──────────┴───────────┴────────┴───────────┴────────┘
//! ```
//!
//! `decode_frame(encode_frame(p)) == p`, byte for byte. The split helpers
//! exist so the insert worker can bail out after reading only the timestamp
//! (stale frame) or only the dims (frame owned by another partition) without
//! touching the rest of the buffer.

use bytes::Bytes;

use crate::bytemap::ByteMap;
use crate::error::{Error, Result};
use crate::time::{Timestamp, WIDTH_TS};

/// Width of a section length prefix in bytes.
pub const WIDTH_LEN: usize = 4;

/// A single ingested point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub ts: Timestamp,
    pub dims: ByteMap,
    pub vals: ByteMap,
}

/// Encode one frame.
pub fn encode_frame(ts: Timestamp, dims: &ByteMap, vals: &ByteMap) -> Vec<u8> {
    let mut buf =
        Vec::with_capacity(WIDTH_TS + WIDTH_LEN * 2 + dims.len() + vals.len());
    ts.encode(&mut buf);
    buf.extend_from_slice(&(dims.len() as i32).to_be_bytes());
    buf.extend_from_slice(dims.as_bytes());
    buf.extend_from_slice(&(vals.len() as i32).to_be_bytes());
    buf.extend_from_slice(vals.as_bytes());
    buf
}

/// Decode a whole frame. The dims and vals are copied into fresh buffers, so
/// the returned [`Point`] does not borrow from (or alias) `data`; callers
/// are free to reuse the read buffer immediately.
pub fn decode_frame(data: &[u8]) -> Result<Point> {
    let (ts, rest) = split_ts(data)?;
    let (dims_raw, rest) = split_section(rest)?;
    let (vals_raw, _) = split_section(rest)?;
    Ok(Point {
        ts,
        dims: ByteMap::from_bytes(Bytes::copy_from_slice(dims_raw)),
        vals: ByteMap::from_bytes(Bytes::copy_from_slice(vals_raw)),
    })
}

/// Read the leading timestamp, returning it and the remainder.
pub fn split_ts(data: &[u8]) -> Result<(Timestamp, &[u8])> {
    let ts = Timestamp::from_bytes(data)?;
    Ok((ts, &data[WIDTH_TS..]))
}

/// Read one length-prefixed section, returning it and the remainder.
pub fn split_section(data: &[u8]) -> Result<(&[u8], &[u8])> {
    if data.len() < WIDTH_LEN {
        return Err(Error::Truncated { needed: WIDTH_LEN, had: data.len() });
    }
    let raw_len = i32::from_be_bytes([data[0], data[1], data[2], data[3]]);
    if raw_len < 0 {
        return Err(Error::InvalidLength(raw_len));
    }
    let len = raw_len as usize;
    let rest = &data[WIDTH_LEN..];
    if rest.len() < len {
        return Err(Error::Truncated { needed: len, had: rest.len() });
    }
    Ok((&rest[..len], &rest[len..]))
}
