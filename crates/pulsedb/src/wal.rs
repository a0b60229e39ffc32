//! Per-stream write-ahead log
//!
//! Every insert becomes one WAL entry before anything else happens to it.
//! The file is an append-only sequence of checksummed entries:
//!
//! ```text
//! ┌────────────┬──────────┬─────────────────┐
//! │ frame len  │ CRC32    │ frame           │
//! │ (4, LE)    │ (4, LE)  │ (N bytes)       │
//! └────────────┴──────────┴─────────────────┘
//! ```
//!
//! The CRC covers the frame bytes. Offsets are byte positions of an entry's
//! end, so they are monotonic per stream and storable: on restart, ingest
//! resumes past the last durably applied offset.
//!
//! A [`WalReader`] tails the log: at end-of-log it parks on the writer's
//! notifier instead of polling. Read buffers come from a shared
//! [`BufferPool`]; the insert worker hands them back once it has copied what
//! it needs, so a buffer is only ever owned by one frame at a time.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::Result;

const ENTRY_HEADER: u64 = 8; // len (4) + crc (4)
const POOL_LIMIT: usize = 64;

/// WAL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Directory holding one `.wal` file per stream
    pub directory: PathBuf,

    /// Fsync policy for appends
    pub sync_policy: SyncPolicy,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./data/wal"),
            sync_policy: SyncPolicy::Interval { interval: Duration::from_millis(100) },
        }
    }
}

/// Fsync policy for WAL appends
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SyncPolicy {
    /// Sync after every write (safest, slowest)
    Always,

    /// Sync every N milliseconds (balanced)
    Interval {
        #[serde(with = "duration_ms")]
        interval: Duration,
    },

    /// Never sync (for tests)
    Never,
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Write-ahead log for a single stream
pub struct Wal {
    stream: String,
    path: PathBuf,
    file: AsyncMutex<File>,
    /// Durable end offset. Updated only after a write completes, which is
    /// what makes tail reads up to this point safe.
    size: AsyncMutex<u64>,
    last_sync: AsyncMutex<SystemTime>,
    config: WalConfig,
    notify: Notify,
}

impl Wal {
    /// Open or create the WAL for `stream`. A torn entry at the tail (a
    /// crash mid-append) is truncated away and the log resumes at the last
    /// complete entry.
    pub async fn open(stream: &str, config: WalConfig) -> Result<Arc<Self>> {
        tokio::fs::create_dir_all(&config.directory).await?;

        let path = config.directory.join(format!("{stream}.wal"));
        let size = recover(stream, &path).await?;
        let file = OpenOptions::new().create(true).append(true).open(&path).await?;

        info!(stream = stream, path = ?path, size, "WAL opened");

        Ok(Arc::new(Self {
            stream: stream.to_string(),
            path,
            file: AsyncMutex::new(file),
            size: AsyncMutex::new(size),
            last_sync: AsyncMutex::new(SystemTime::now()),
            config,
            notify: Notify::new(),
        }))
    }

    /// Append one frame as a checksummed entry. Returns the entry's end
    /// offset.
    pub async fn append(&self, frame: &[u8]) -> Result<u64> {
        let mut buffer = Vec::with_capacity(frame.len() + ENTRY_HEADER as usize);
        buffer.extend_from_slice(&(frame.len() as u32).to_le_bytes());
        let mut crc = crc32fast::Hasher::new();
        crc.update(frame);
        buffer.extend_from_slice(&crc.finalize().to_le_bytes());
        buffer.extend_from_slice(frame);

        let mut file = self.file.lock().await;
        file.write_all(&buffer).await?;

        let end = {
            let mut size = self.size.lock().await;
            *size += buffer.len() as u64;
            *size
        };

        let should_sync = match self.config.sync_policy {
            SyncPolicy::Always => true,
            SyncPolicy::Interval { interval } => {
                let mut last_sync = self.last_sync.lock().await;
                let elapsed = SystemTime::now()
                    .duration_since(*last_sync)
                    .unwrap_or(Duration::ZERO);
                if elapsed >= interval {
                    *last_sync = SystemTime::now();
                    true
                } else {
                    false
                }
            }
            SyncPolicy::Never => false,
        };
        if should_sync {
            file.sync_all().await?;
            debug!(stream = self.stream, "WAL synced");
        }
        drop(file);

        self.notify.notify_waiters();
        Ok(end)
    }

    /// Current durable end offset.
    pub async fn offset(&self) -> u64 {
        *self.size.lock().await
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Open a tailing reader positioned at `from_offset`.
    pub async fn reader(self: &Arc<Self>, from_offset: u64, pool: BufferPool) -> Result<WalReader> {
        let file = File::open(&self.path).await?;
        Ok(WalReader { wal: self.clone(), file, offset: from_offset, pool })
    }

    /// Wait until at least `min_offset` bytes are durable.
    async fn wait_for(&self, min_offset: u64) {
        loop {
            let notified = self.notify.notified();
            if self.offset().await >= min_offset {
                return;
            }
            notified.await;
        }
    }
}

/// Walk entry boundaries from the start of the file; anything past the last
/// complete entry is a torn tail and gets truncated away. Returns the valid
/// length. CRCs are not verified here: mid-log corruption is a read-time
/// failure, not something recovery may silently skip.
async fn recover(stream: &str, path: &std::path::Path) -> Result<u64> {
    let mut file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    let total = file.metadata().await?.len();
    let mut valid = 0u64;
    let mut header = [0u8; ENTRY_HEADER as usize];
    while total - valid >= ENTRY_HEADER {
        file.seek(std::io::SeekFrom::Start(valid)).await?;
        file.read_exact(&mut header).await?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as u64;
        if total - valid - ENTRY_HEADER < len {
            break;
        }
        valid += ENTRY_HEADER + len;
    }
    if valid < total {
        warn!(stream, valid, total, "truncating torn WAL tail");
        let rw = OpenOptions::new().write(true).open(path).await?;
        rw.set_len(valid).await?;
        rw.sync_all().await?;
    }
    Ok(valid)
}

/// Tailing reader over one stream's WAL. Owns its read position; blocks
/// (parks) at end-of-log until the writer appends more.
pub struct WalReader {
    wal: Arc<Wal>,
    file: File,
    offset: u64,
    pool: BufferPool,
}

impl WalReader {
    /// Read the next entry, waiting for one if the log is fully consumed.
    /// Returns the frame bytes (a pooled buffer the caller must return) and
    /// the entry's end offset.
    pub async fn read(&mut self) -> Result<(Vec<u8>, u64)> {
        self.wal.wait_for(self.offset + ENTRY_HEADER).await;

        let mut header = [0u8; ENTRY_HEADER as usize];
        self.file.seek(std::io::SeekFrom::Start(self.offset)).await?;
        self.file.read_exact(&mut header).await?;
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        self.wal.wait_for(self.offset + ENTRY_HEADER + len).await;

        let mut frame = self.pool.get(len as usize);
        self.file.read_exact(&mut frame).await?;

        let mut crc = crc32fast::Hasher::new();
        crc.update(&frame);
        if crc.finalize() != expected_crc {
            return Err(Error::WalCorruption(self.offset));
        }

        self.offset += ENTRY_HEADER + len;
        Ok((frame, self.offset))
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// A shared pool of reusable read buffers. The WAL reader takes buffers out;
/// the insert worker puts them back after copying the sections it keeps.
#[derive(Clone, Default)]
pub struct BufferPool {
    inner: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl BufferPool {
    pub fn new() -> Self {
        BufferPool::default()
    }

    /// Take a buffer resized to `len`.
    pub fn get(&self, len: usize) -> Vec<u8> {
        let mut buf = self
            .inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop()
            .unwrap_or_default();
        buf.resize(len, 0);
        buf
    }

    /// Return a buffer for reuse.
    pub fn put(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut pool = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if pool.len() < POOL_LIMIT {
            pool.push(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> WalConfig {
        WalConfig {
            directory: dir.path().to_path_buf(),
            sync_policy: SyncPolicy::Always,
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open("events", config(&dir)).await.unwrap();

        let off1 = wal.append(b"frame-one").await.unwrap();
        let off2 = wal.append(b"frame-two").await.unwrap();
        assert!(off2 > off1);

        let mut reader = wal.reader(0, BufferPool::new()).await.unwrap();
        let (data, off) = reader.read().await.unwrap();
        assert_eq!(&data, b"frame-one");
        assert_eq!(off, off1);
        let (data, off) = reader.read().await.unwrap();
        assert_eq!(&data, b"frame-two");
        assert_eq!(off, off2);
    }

    #[tokio::test]
    async fn test_reader_resumes_at_offset() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open("events", config(&dir)).await.unwrap();
        let off1 = wal.append(b"first").await.unwrap();
        wal.append(b"second").await.unwrap();

        let mut reader = wal.reader(off1, BufferPool::new()).await.unwrap();
        let (data, _) = reader.read().await.unwrap();
        assert_eq!(&data, b"second");
    }

    #[tokio::test]
    async fn test_reader_blocks_until_append() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open("events", config(&dir)).await.unwrap();
        let mut reader = wal.reader(0, BufferPool::new()).await.unwrap();

        let writer = wal.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.append(b"late").await.unwrap();
        });

        let (data, _) = reader.read().await.unwrap();
        assert_eq!(&data, b"late");
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_corruption_is_detected() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open("events", config(&dir)).await.unwrap();
        wal.append(b"healthy").await.unwrap();

        // Flip a payload byte behind the WAL's back.
        let path = dir.path().join("events.wal");
        let mut raw = std::fs::read(&path).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        std::fs::write(&path, raw).unwrap();

        let mut reader = wal.reader(0, BufferPool::new()).await.unwrap();
        let err = reader.read().await.unwrap_err();
        assert!(matches!(err, Error::WalCorruption(0)));
    }

    #[tokio::test]
    async fn test_reopen_preserves_offset() {
        let dir = TempDir::new().unwrap();
        let end = {
            let wal = Wal::open("events", config(&dir)).await.unwrap();
            wal.append(b"persisted").await.unwrap()
        };
        let wal = Wal::open("events", config(&dir)).await.unwrap();
        assert_eq!(wal.offset().await, end);
        let mut reader = wal.reader(0, BufferPool::new()).await.unwrap();
        let (data, _) = reader.read().await.unwrap();
        assert_eq!(&data, b"persisted");
    }

    #[tokio::test]
    async fn test_torn_tail_is_truncated_on_open() {
        let dir = TempDir::new().unwrap();
        let end = {
            let wal = Wal::open("events", config(&dir)).await.unwrap();
            wal.append(b"whole").await.unwrap()
        };

        // Simulate a crash mid-append: a header promising more bytes than
        // the file holds.
        let path = dir.path().join("events.wal");
        let mut raw = std::fs::read(&path).unwrap();
        raw.extend_from_slice(&100u32.to_le_bytes());
        raw.extend_from_slice(&[0xAB; 7]);
        std::fs::write(&path, raw).unwrap();

        let wal = Wal::open("events", config(&dir)).await.unwrap();
        assert_eq!(wal.offset().await, end);
        let mut reader = wal.reader(0, BufferPool::new()).await.unwrap();
        let (data, off) = reader.read().await.unwrap();
        assert_eq!(&data, b"whole");
        assert_eq!(off, end);

        // Appends continue cleanly after the truncated tail.
        let off2 = wal.append(b"next").await.unwrap();
        let (data, _) = reader.read().await.unwrap();
        assert_eq!(&data, b"next");
        assert_eq!(off2, end + 8 + 4);
    }

    #[tokio::test]
    async fn test_empty_frame_entry() {
        let dir = TempDir::new().unwrap();
        let wal = Wal::open("events", config(&dir)).await.unwrap();
        wal.append(b"").await.unwrap();
        let mut reader = wal.reader(0, BufferPool::new()).await.unwrap();
        let (data, _) = reader.read().await.unwrap();
        assert!(data.is_empty());
    }

    #[test]
    fn test_buffer_pool_reuses() {
        let pool = BufferPool::new();
        let buf = pool.get(16);
        assert_eq!(buf.len(), 16);
        pool.put(buf);
        let buf = pool.get(4);
        assert_eq!(buf.len(), 4);
    }
}
