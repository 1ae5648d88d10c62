//! Contiguous byte buffer with independent read and write cursors.
//!
//! `IoBuffer` stages outbound bytes the kernel did not accept in one write
//! and inbound bytes until a complete message has arrived. The region
//! `begin..end` always holds exactly the unconsumed bytes.
//!
//! ```text
//!  0        begin            end              capacity
//!  |consumed|   data_len     |   free tail    |
//! ```
//!
//! # Sizing
//!
//! - grows geometrically (doubling) when the free tail drops below 1/8 of
//!   the floor size and compaction cannot reclaim enough room
//! - shrinks by half when occupancy falls under 25% of capacity, never
//!   below the floor
//! - never grows beyond `max`; callers treat that as a fatal condition for
//!   the owning connection

/// Growable byte region with a floor size and a hard maximum.
#[derive(Debug)]
pub struct IoBuffer {
    buf: Vec<u8>,
    begin: usize,
    end: usize,
    floor: usize,
    max: usize,
}

impl IoBuffer {
    /// Create a buffer that starts at (and never shrinks below) `floor` bytes.
    #[must_use]
    pub fn new(floor: usize, max: usize) -> Self {
        let floor = floor.max(64);
        let max = max.max(floor);
        Self {
            buf: vec![0; floor],
            begin: 0,
            end: 0,
            floor,
            max,
        }
    }

    /// Number of unconsumed bytes.
    #[inline]
    #[must_use]
    pub const fn data_len(&self) -> usize {
        self.end - self.begin
    }

    #[inline]
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    #[inline]
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes available after the write cursor without compaction.
    #[inline]
    #[must_use]
    pub fn free_space(&self) -> usize {
        self.buf.len() - self.end
    }

    #[inline]
    #[must_use]
    pub const fn floor(&self) -> usize {
        self.floor
    }

    #[inline]
    #[must_use]
    pub const fn max_size(&self) -> usize {
        self.max
    }

    /// Append `data` after the write cursor.
    ///
    /// Returns `false` (leaving the buffer untouched) if holding the extra
    /// bytes would take the buffer past its maximum size.
    pub fn push_data(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        let needed = self.data_len() + data.len();
        if needed > self.max {
            return false;
        }
        if self.free_space() < data.len() {
            self.regularize();
            if self.free_space() < data.len() {
                let mut size = self.buf.len().max(self.floor);
                while size < needed {
                    size = size.saturating_mul(2);
                }
                self.resize(size.min(self.max));
            }
        }
        debug_assert!(self.free_space() >= data.len());
        self.buf[self.end..self.end + data.len()].copy_from_slice(data);
        self.end += data.len();
        true
    }

    /// Consume `n` bytes from the front.
    ///
    /// Popping more than `data_len()` is a contract violation; release
    /// builds clamp to the available length.
    pub fn pop_data(&mut self, n: usize) {
        debug_assert!(self.begin + n <= self.end, "pop past write cursor");
        let n = n.min(self.data_len());
        self.begin += n;
        if self.begin == self.end {
            self.begin = 0;
            self.end = 0;
        }

        let data_len = self.data_len();
        let capacity = self.buf.len();
        if capacity > self.floor && data_len < capacity / 4 {
            self.resize((capacity / 2).max(self.floor));
        }
    }

    /// The unconsumed region, ready to be handed to `send`.
    #[inline]
    #[must_use]
    pub fn peek_data(&self) -> &[u8] {
        &self.buf[self.begin..self.end]
    }

    /// Writable tail for a direct `recv` into the buffer.
    ///
    /// Compacts or doubles the storage first when the tail has shrunk
    /// below an eighth of the floor size. Returns an empty slice when the
    /// buffer is full and already at its maximum size.
    pub fn peek_space(&mut self) -> &mut [u8] {
        let low_water = self.floor / 8;
        if self.free_space() < low_water {
            self.regularize();
            if self.free_space() < low_water && self.buf.len() < self.max {
                let size = self.buf.len().saturating_mul(2).min(self.max);
                self.resize(size);
            }
        }
        &mut self.buf[self.end..]
    }

    /// Commit `n` bytes written into the slice returned by [`peek_space`].
    ///
    /// [`peek_space`]: IoBuffer::peek_space
    pub fn pop_space(&mut self, n: usize) {
        debug_assert!(self.end + n <= self.buf.len(), "commit past capacity");
        self.end = (self.end + n).min(self.buf.len());
    }

    /// Move the unconsumed bytes to offset 0.
    pub fn regularize(&mut self) {
        if self.begin == 0 {
            return;
        }
        let len = self.data_len();
        if len > 0 {
            self.buf.copy_within(self.begin..self.end, 0);
        }
        self.begin = 0;
        self.end = len;
    }

    /// Reallocate to `size` bytes, preserving the unconsumed data.
    ///
    /// The new size is never smaller than the occupied length and never
    /// larger than the configured maximum.
    pub fn resize(&mut self, size: usize) {
        let size = size.max(self.data_len()).min(self.max.max(self.data_len()));
        if size == self.buf.len() {
            return;
        }
        self.regularize();
        self.buf.resize(size, 0);
        self.buf.shrink_to_fit();
    }

    /// Drop all data and return to the floor size.
    pub fn clear(&mut self) {
        self.begin = 0;
        self.end = 0;
        if self.buf.len() != self.floor {
            self.buf = vec![0; self.floor];
        }
    }
}
