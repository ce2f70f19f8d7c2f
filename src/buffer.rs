//! Plaintext read buffer.

use std::fmt;

/// Holds at most one chunk of decrypted plaintext.
///
/// The stream socket reads into the spare space until the chunk is full or
/// the engine runs dry, and the owner consumes from the front. New reads
/// start only once the owner has consumed everything.
pub(crate) struct ReadBuffer {
    buf: Vec<u8>,
    start: usize,
    end: usize,
}

impl ReadBuffer {
    pub fn new(chunk: usize) -> Self {
        ReadBuffer {
            buf: vec![0; chunk],
            start: 0,
            end: 0,
        }
    }

    /// Unconsumed plaintext.
    pub fn filled(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn is_full(&self) -> bool {
        self.end == self.buf.len()
    }

    /// Space to read into.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.end..]
    }

    /// Mark `n` bytes of the spare space as filled.
    pub fn advance(&mut self, n: usize) {
        self.end = (self.end + n).min(self.buf.len());
    }

    /// Consume up to `n` bytes. Returns true when the buffer became empty.
    pub fn consume(&mut self, n: usize) -> bool {
        self.start = (self.start + n).min(self.end);
        if self.start == self.end {
            self.clear();
            true
        } else {
            false
        }
    }

    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }
}

impl fmt::Debug for ReadBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadBuffer")
            .field("chunk", &self.buf.len())
            .field("len", &(self.end - self.start))
            .finish()
    }
}
