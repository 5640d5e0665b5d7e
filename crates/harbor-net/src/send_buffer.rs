//! Per-connection outbound buffer.
//!
//! A linear buffer managed by read/write positions rather than a ring: the
//! readable region is `[read_pos, write_pos)`. When the read position moves
//! past half the capacity the buffer compacts, moving the readable region
//! back to offset 0. Growth doubles the capacity up to a hard ceiling.
//!
//! Backpressure is signalled, not enforced: the watermark queries tell
//! producers when to pause and resume, but only the 32 MiB ceiling makes
//! `write` fail.

use std::io::{ErrorKind, Write};

/// Initial capacity, 4 KiB.
const INITIAL_CAPACITY: usize = 4096;
/// High watermark, 8 MiB. Producers should pause above this.
const HIGH_WATER_MARK: usize = 8 * 1024 * 1024;
/// Low watermark, 4 MiB. Producers may resume below this.
const LOW_WATER_MARK: usize = 4 * 1024 * 1024;
/// Hard capacity ceiling, 32 MiB. `write` fails rather than grow past it.
const MAX_CAPACITY: usize = 32 * 1024 * 1024;

/// Linear outbound byte buffer with growth, compaction, and watermarks.
pub struct SendBuffer {
    buffer: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Default for SendBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SendBuffer {
    pub fn new() -> Self {
        Self {
            buffer: vec![0; INITIAL_CAPACITY],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Append bytes. Returns false iff the required capacity would exceed
    /// the 32 MiB ceiling; the buffer is left unchanged in that case.
    pub fn write(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        if !self.ensure_writable(data.len()) {
            return false;
        }
        self.buffer[self.write_pos..self.write_pos + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
        true
    }

    /// Drain the readable region with a single non-blocking write.
    ///
    /// `Ok(n)` with n > 0: n bytes left the buffer. `Ok(0)`: the socket
    /// would block (or the buffer was already empty) — wait for a writable
    /// event. `Err`: fatal; the caller closes the connection.
    ///
    /// When the buffer empties both positions reset to 0; otherwise the
    /// buffer compacts once the read position passes half the capacity.
    pub fn send_to_socket<W: Write>(&mut self, sink: &mut W) -> std::io::Result<usize> {
        let readable = self.size();
        if readable == 0 {
            return Ok(0);
        }

        match sink.write(&self.buffer[self.read_pos..self.write_pos]) {
            Ok(sent) => {
                self.read_pos += sent;
                if self.read_pos == self.write_pos {
                    self.read_pos = 0;
                    self.write_pos = 0;
                } else if self.read_pos > self.buffer.len() / 2 {
                    self.compact();
                }
                Ok(sent)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Readable bytes.
    pub fn size(&self) -> usize {
        self.write_pos - self.read_pos
    }

    pub fn is_empty(&self) -> bool {
        self.read_pos == self.write_pos
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Above the 8 MiB high watermark — producers should pause.
    pub fn is_high_water_mark(&self) -> bool {
        self.size() >= HIGH_WATER_MARK
    }

    /// Below the 4 MiB low watermark — producers may resume.
    pub fn is_low_water_mark(&self) -> bool {
        self.size() < LOW_WATER_MARK
    }

    pub fn clear(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Move the readable region to offset 0.
    fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        let readable = self.size();
        self.buffer.copy_within(self.read_pos..self.write_pos, 0);
        self.read_pos = 0;
        self.write_pos = readable;
    }

    /// Make room for `len` more bytes: compact first, then double capacity
    /// up to the ceiling. False if the data cannot fit at the ceiling.
    fn ensure_writable(&mut self, len: usize) -> bool {
        if self.buffer.len() - self.write_pos >= len {
            return true;
        }

        if self.read_pos > 0 {
            self.compact();
            if self.buffer.len() - self.write_pos >= len {
                return true;
            }
        }

        let required = self.write_pos + len;
        if required > MAX_CAPACITY {
            return false;
        }

        let mut new_capacity = self.buffer.len();
        while new_capacity < required {
            new_capacity = (new_capacity * 2).min(MAX_CAPACITY);
        }
        self.buffer.resize(new_capacity, 0);
        true
    }
}
