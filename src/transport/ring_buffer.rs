//! Fixed capacity byte ring buffer
//!
//! Used for both directions of the UART transport. The buffer itself does no
//! locking; the transport keeps it inside a critical-section mutex so the
//! interrupt handlers and the foreground loop never mutate it concurrently.

/// Circular byte buffer with `N` bytes of storage.
///
/// `bytes_free() + len() == N` at all times.
pub struct RingBuffer<const N: usize> {
    data: [u8; N],
    in_index: usize,
    out_index: usize,
    bytes_free: usize,
}

impl<const N: usize> RingBuffer<N> {
    /// Create an empty buffer.
    pub const fn new() -> Self {
        Self {
            data: [0; N],
            in_index: 0,
            out_index: 0,
            bytes_free: N,
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn bytes_free(&self) -> usize {
        self.bytes_free
    }

    /// Number of bytes waiting to be read.
    pub fn len(&self) -> usize {
        N - self.bytes_free
    }

    pub fn is_empty(&self) -> bool {
        self.bytes_free == N
    }

    pub fn is_full(&self) -> bool {
        self.bytes_free == 0
    }

    /// Store a single byte. Returns false when the buffer is full.
    pub fn push_byte(&mut self, byte: u8) -> bool {
        if self.bytes_free == 0 {
            return false;
        }

        self.data[self.in_index] = byte;
        self.in_index = (self.in_index + 1) % N;
        self.bytes_free -= 1;
        true
    }

    /// Remove the oldest byte.
    pub fn pop_byte(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }

        let byte = self.data[self.out_index];
        self.consume(1);
        Some(byte)
    }

    /// Copy as much of `bytes` as fits. Returns the count written.
    pub fn push(&mut self, bytes: &[u8]) -> usize {
        let count = bytes.len().min(self.bytes_free);

        // At most two copies: up to the end of storage, then from the start
        let first = count.min(N - self.in_index);
        self.data[self.in_index..self.in_index + first].copy_from_slice(&bytes[..first]);
        self.data[..count - first].copy_from_slice(&bytes[first..count]);

        self.in_index = (self.in_index + count) % N;
        self.bytes_free -= count;
        count
    }

    /// Copy up to `buf.len()` of the oldest bytes out. Returns the count read.
    pub fn pop(&mut self, buf: &mut [u8]) -> usize {
        let count = buf.len().min(self.len());

        let first = count.min(N - self.out_index);
        buf[..first].copy_from_slice(&self.data[self.out_index..self.out_index + first]);
        buf[first..count].copy_from_slice(&self.data[..count - first]);

        self.consume(count);
        count
    }

    /// Longest readable run that does not wrap past the end of storage.
    pub fn contiguous(&self) -> &[u8] {
        let run = self.len().min(N - self.out_index);
        &self.data[self.out_index..self.out_index + run]
    }

    /// Discard up to `count` of the oldest bytes, crediting the free count.
    pub fn consume(&mut self, count: usize) {
        let count = count.min(self.len());
        self.out_index = (self.out_index + count) % N;
        self.bytes_free += count;
    }

    pub fn clear(&mut self) {
        self.in_index = 0;
        self.out_index = 0;
        self.bytes_free = N;
    }
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}
