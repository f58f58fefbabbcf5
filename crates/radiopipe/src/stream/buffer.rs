//! Cache buffer between the ingest thread and the decoder
//!
//! The ingest thread appends demuxed audio bytes; the decoder reads them
//! through a `RingReader`. Reads never block: when nothing is buffered they
//! return 0 and the caller retries later. Unread bytes are never
//! overwritten. The backing `Vec` is compacted (consumed bytes dropped) and
//! grown up to `max_size`; a write that still does not fit fails.
//!
//! Architecture:
//!   Network → IcyDemuxer
//!                  ↓ (ingest thread writes whole slices)
//!            RingCacheBuffer (`Vec<u8>` + Mutex)
//!                  ↓ (audio pull context: Read + Seek)
//!            RingReader → Decoder → PCM

use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::buffer::COMPACTION_SAFETY_MARGIN;
use crate::error::{RadioError, Result};

/// Shared mutable state behind Mutex
struct BufferInner {
    /// Buffered data; `data[0]` sits at absolute offset `base_offset`
    data: Vec<u8>,
    /// Total bytes discarded by compaction
    base_offset: u64,
    /// Absolute read cursor
    read_pos: u64,
    /// Writer finished (end of stream or error)
    finished: bool,
    /// While set, consumed bytes are kept so the reader can rewind
    probe_hold: bool,
    /// Position up to which the consumer has played its reads; `None` when
    /// every read byte counts as played
    consumed_pos: Option<u64>,
}

impl BufferInner {
    fn write_pos(&self) -> u64 {
        self.base_offset + self.data.len() as u64
    }

    fn unread(&self) -> usize {
        (self.write_pos() - self.read_pos) as usize
    }

    /// Drop consumed bytes, keeping a safety margin behind the read cursor.
    fn compact(&mut self) {
        if self.probe_hold {
            return;
        }
        let local_read = (self.read_pos - self.base_offset) as usize;
        let keep_from = local_read.saturating_sub(COMPACTION_SAFETY_MARGIN);
        if keep_from > 0 {
            self.data.drain(..keep_from);
            self.base_offset += keep_from as u64;
        }
    }
}

/// Bounded byte store with a single writer and a single reader.
///
/// Invariant: `position() <= write_position()`, and the bytes in between are
/// exactly the bytes written, in order.
pub struct RingCacheBuffer {
    inner: Mutex<BufferInner>,
    max_size: usize,
}

impl RingCacheBuffer {
    /// Create a buffer with `initial_capacity` bytes reserved that may grow to `max_size`.
    pub fn new(initial_capacity: usize, max_size: usize) -> Self {
        Self {
            inner: Mutex::new(BufferInner {
                data: Vec::with_capacity(initial_capacity.min(max_size)),
                base_offset: 0,
                read_pos: 0,
                finished: false,
                probe_hold: false,
                consumed_pos: None,
            }),
            max_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        // A panic while holding the lock cannot leave the cursors torn: every
        // mutation completes before the guard is released.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append `bytes` at the write cursor.
    ///
    /// Either the whole slice is stored or nothing is: fails with
    /// `BufferOverflow` when the unread bytes plus `bytes` exceed `max_size`.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock();

        if inner.unread() + bytes.len() > self.max_size {
            return Err(RadioError::BufferOverflow {
                requested: bytes.len(),
                available: self.max_size - inner.unread(),
            });
        }

        if inner.data.len() + bytes.len() > inner.data.capacity() {
            inner.compact();
        }

        let needed = inner.data.len() + bytes.len();
        if needed > self.max_size {
            // The unread part fits, but consumed bytes held back by the
            // safety margin or a probe hold do not.
            if inner.probe_hold {
                return Err(RadioError::BufferOverflow {
                    requested: bytes.len(),
                    available: self.max_size.saturating_sub(inner.data.len()),
                });
            }
            let overshoot = needed - self.max_size;
            inner.data.drain(..overshoot);
            inner.base_offset += overshoot as u64;
        }

        if inner.data.len() + bytes.len() > inner.data.capacity() {
            let target = (inner.data.capacity() * 2)
                .max(inner.data.len() + bytes.len())
                .min(self.max_size);
            let additional = target - inner.data.len();
            inner.data.reserve_exact(additional);
        }

        inner.data.extend_from_slice(bytes);
        Ok(())
    }

    /// Copy up to `buf.len()` unread bytes into `buf`, advancing the read cursor.
    ///
    /// Returns the number of bytes copied; 0 when nothing is buffered.
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut inner = self.lock();
        let n = inner.unread().min(buf.len());
        if n == 0 {
            return 0;
        }
        let local_read = (inner.read_pos - inner.base_offset) as usize;
        buf[..n].copy_from_slice(&inner.data[local_read..local_read + n]);
        inner.read_pos += n as u64;
        n
    }

    /// Unread bytes available (write position − read position)
    pub fn len(&self) -> usize {
        self.lock().unread()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Absolute read cursor
    pub fn position(&self) -> u64 {
        self.lock().read_pos
    }

    /// Absolute write cursor (total bytes ever written)
    pub fn write_position(&self) -> u64 {
        self.lock().write_pos()
    }

    /// Bytes written but not yet played: the unread bytes plus whatever the
    /// consumer read ahead and still holds.
    pub fn backlog(&self) -> usize {
        let inner = self.lock();
        let played = inner
            .consumed_pos
            .map_or(inner.read_pos, |pos| pos.min(inner.read_pos));
        (inner.write_pos() - played) as usize
    }

    /// Report that the consumer has played everything before `position`.
    pub fn set_consumed_position(&self, position: u64) {
        self.lock().consumed_pos = Some(position);
    }

    /// Size of the backing store
    pub fn capacity(&self) -> usize {
        self.lock().data.capacity()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Move the read cursor to an absolute position inside the retained bytes.
    pub fn seek(&self, position: u64) -> Result<u64> {
        let mut inner = self.lock();
        if position < inner.base_offset {
            return Err(RadioError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Cannot seek to position {}: data before {} has been compacted",
                    position, inner.base_offset
                ),
            )));
        }
        if position > inner.write_pos() {
            return Err(RadioError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Cannot seek to position {}: only {} bytes written",
                    position,
                    inner.write_pos()
                ),
            )));
        }
        inner.read_pos = position;
        Ok(position)
    }

    /// Keep consumed bytes while a decoder sniffs headers and rewinds.
    pub fn set_probe_hold(&self, hold: bool) {
        self.lock().probe_hold = hold;
    }

    /// Mark the end of input; readers drain what is left.
    pub fn finish(&self) {
        self.lock().finished = true;
    }

    pub fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// True once the writer finished and every byte was read
    pub fn is_drained(&self) -> bool {
        let inner = self.lock();
        inner.finished && inner.unread() == 0
    }

    /// Drop all data and reset the cursors.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.data.clear();
        inner.base_offset = 0;
        inner.read_pos = 0;
        inner.finished = false;
        inner.probe_hold = false;
        inner.consumed_pos = None;
    }
}

/// `Read + Seek` view over a shared `RingCacheBuffer`, handed to decoders.
///
/// A read returning 0 means "nothing buffered right now", not end of stream,
/// unless the buffer is finished.
#[derive(Clone)]
pub struct RingReader {
    buffer: Arc<RingCacheBuffer>,
}

impl RingReader {
    pub fn new(buffer: Arc<RingCacheBuffer>) -> Self {
        Self { buffer }
    }

    pub fn buffer(&self) -> &Arc<RingCacheBuffer> {
        &self.buffer
    }
}

impl Read for RingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.buffer.read(buf))
    }
}

impl Seek for RingReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(offset) => self.buffer.write_position() as i64 + offset,
            SeekFrom::Current(offset) => self.buffer.position() as i64 + offset,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Seek to negative position",
            ));
        }
        self.buffer.seek(target as u64).map_err(|e| match e {
            RadioError::Io(io) => io,
            other => io::Error::other(other.to_string()),
        })
    }
}
