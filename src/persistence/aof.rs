//! Append-Log Buffer
//!
//! Binary delete frames waiting for the append-log writer, plus the
//! capture buffer that accumulates while a log rewrite is running.

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::clock::wall_clock_ms;

/// Frame op codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AofOp {
    Del = 1,
    Unlink = 2,
}

/// Encode one delete frame: op, db, timestamp, length-prefixed key.
fn encode_del(op: AofOp, db: usize, key: &Bytes) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + 4 + 8 + 4 + key.len());
    buf.put_u8(op as u8);
    buf.put_u32_le(db as u32);
    buf.put_u64_le(wall_clock_ms());
    buf.put_u32_le(key.len() as u32);
    buf.put_slice(key);
    buf.freeze()
}

/// In-memory staging for the append log.
///
/// Frames accumulate here until the writer drains them to disk. While a
/// rewrite is in progress every frame is also captured in a second
/// buffer so the rewritten log can be patched up to date. Both buffers
/// are transient overhead for the memory accountant.
pub struct AofBuffer {
    buf: Mutex<BytesMut>,
    rewrite_buf: Mutex<BytesMut>,
    rewriting: AtomicBool,
    entries: AtomicUsize,
}

impl Default for AofBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl AofBuffer {
    pub fn new() -> Self {
        Self {
            buf: Mutex::new(BytesMut::new()),
            rewrite_buf: Mutex::new(BytesMut::new()),
            rewriting: AtomicBool::new(false),
            entries: AtomicUsize::new(0),
        }
    }

    /// Stage a delete frame for the given key.
    pub fn feed_del(&self, db: usize, key: &Bytes, lazy: bool) {
        let op = if lazy { AofOp::Unlink } else { AofOp::Del };
        let frame = encode_del(op, db, key);
        self.buf.lock().put_slice(&frame);
        if self.rewriting.load(Ordering::Acquire) {
            self.rewrite_buf.lock().put_slice(&frame);
        }
        self.entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn buffer_bytes(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn rewrite_buffer_bytes(&self) -> usize {
        self.rewrite_buf.lock().len()
    }

    pub fn entry_count(&self) -> usize {
        self.entries.load(Ordering::Relaxed)
    }

    /// Start capturing frames for an in-progress log rewrite.
    pub fn begin_rewrite(&self) {
        self.rewrite_buf.lock().clear();
        self.rewriting.store(true, Ordering::Release);
    }

    /// Stop capturing and hand back the frames accumulated meanwhile.
    pub fn end_rewrite(&self) -> Bytes {
        self.rewriting.store(false, Ordering::Release);
        self.rewrite_buf.lock().split().freeze()
    }

    /// Drain staged frames into the log writer. Returns bytes written.
    pub fn drain_to<W: Write>(&self, writer: &mut W) -> io::Result<usize> {
        let pending = self.buf.lock().split().freeze();
        writer.write_all(&pending)?;
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_feed_grows_buffer() {
        let aof = AofBuffer::new();
        assert_eq!(aof.buffer_bytes(), 0);
        let key = Bytes::from_static(b"key");
        aof.feed_del(0, &key, false);
        assert_eq!(aof.buffer_bytes(), 1 + 4 + 8 + 4 + key.len());
        assert_eq!(aof.entry_count(), 1);
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode_del(AofOp::Unlink, 3, &Bytes::from_static(b"key"));
        assert_eq!(frame[0], AofOp::Unlink as u8);
        assert_eq!(&frame[1..5], &3u32.to_le_bytes());
        assert_eq!(&frame[13..17], &3u32.to_le_bytes());
        assert_eq!(&frame[17..], b"key");
    }

    #[test]
    fn test_rewrite_capture() {
        let aof = AofBuffer::new();
        aof.feed_del(0, &Bytes::from_static(b"before"), false);
        assert_eq!(aof.rewrite_buffer_bytes(), 0);

        aof.begin_rewrite();
        aof.feed_del(0, &Bytes::from_static(b"during"), false);
        assert!(aof.rewrite_buffer_bytes() > 0);

        let captured = aof.end_rewrite();
        assert!(!captured.is_empty());
        assert_eq!(aof.rewrite_buffer_bytes(), 0);

        aof.feed_del(0, &Bytes::from_static(b"after"), false);
        assert_eq!(aof.rewrite_buffer_bytes(), 0);
    }

    #[test]
    fn test_drain_to_writer_empties_buffer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.aof");
        let aof = AofBuffer::new();
        aof.feed_del(0, &Bytes::from_static(b"k1"), false);
        aof.feed_del(1, &Bytes::from_static(b"k2"), true);
        let staged = aof.buffer_bytes();

        let mut file = File::create(&path).unwrap();
        let written = aof.drain_to(&mut file).unwrap();
        assert_eq!(written, staged);
        assert_eq!(aof.buffer_bytes(), 0);

        let mut on_disk = Vec::new();
        File::open(&path).unwrap().read_to_end(&mut on_disk).unwrap();
        assert_eq!(on_disk.len(), staged);
    }
}
