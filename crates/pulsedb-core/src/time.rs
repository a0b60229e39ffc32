//! Timestamps and their wire encoding
//!
//! A [`Timestamp`] is an instant with nanosecond precision, encoded on the
//! wire as a big-endian unsigned 64-bit value. `encode`/`from_bytes` are
//! inverse operations; the rest of the system relies on that for WAL frame
//! round-trips.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};

/// Width of an encoded timestamp in bytes.
pub const WIDTH_TS: usize = 8;

/// An instant, in nanoseconds since the Unix epoch.
///
/// `Timestamp::ZERO` is the "unset" sentinel used by query time windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_nanos(ns: u64) -> Self {
        Timestamp(ns)
    }

    pub fn from_millis(ms: u64) -> Self {
        Timestamp(ms * 1_000_000)
    }

    pub fn from_secs(s: u64) -> Self {
        Timestamp(s * 1_000_000_000)
    }

    /// Wall-clock now.
    pub fn now() -> Self {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO);
        Timestamp(since_epoch.as_nanos() as u64)
    }

    pub fn as_nanos(self) -> u64 {
        self.0
    }

    pub fn as_millis(self) -> i64 {
        (self.0 / 1_000_000) as i64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn add(self, d: Duration) -> Self {
        Timestamp(self.0.saturating_add(d.as_nanos() as u64))
    }

    pub fn sub(self, d: Duration) -> Self {
        Timestamp(self.0.saturating_sub(d.as_nanos() as u64))
    }

    /// Shift by a signed offset in nanoseconds. Relative query windows
    /// (`ASOF '-1h'`) resolve through this.
    pub fn offset_by(self, nanos: i64) -> Self {
        if nanos >= 0 {
            Timestamp(self.0.saturating_add(nanos as u64))
        } else {
            Timestamp(self.0.saturating_sub(nanos.unsigned_abs()))
        }
    }

    /// Align down to the start of the aggregation bucket containing `self`.
    pub fn truncate_to(self, resolution: Duration) -> Self {
        let res = resolution.as_nanos() as u64;
        if res == 0 {
            return self;
        }
        Timestamp(self.0 - self.0 % res)
    }

    pub fn to_bytes(self) -> [u8; WIDTH_TS] {
        self.0.to_be_bytes()
    }

    pub fn encode(self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.to_bytes());
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < WIDTH_TS {
            return Err(Error::Truncated {
                needed: WIDTH_TS,
                had: data.len(),
            });
        }
        let mut raw = [0u8; WIDTH_TS];
        raw.copy_from_slice(&data[..WIDTH_TS]);
        Ok(Timestamp(u64::from_be_bytes(raw)))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}
