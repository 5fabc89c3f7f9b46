use byteorder::{BigEndian, ByteOrder};

/// Append-only inbound byte stream that accepts socket chunks in
/// arrival order and serves parse operations without per-message copies.
///
/// Bytes are appended to the tail and consumed from the head; the
/// consumed prefix is compacted away once it grows past a threshold
/// rather than on every `discard`, so a long run of small messages
/// doesn't re-shift the buffer on every call.
#[derive(Default)]
pub struct ChunkedBuffer {
    data: Vec<u8>,
    start: usize,
}

const COMPACT_THRESHOLD: usize = 64 * 1024;

impl ChunkedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn length(&self) -> usize {
        self.data.len() - self.start
    }

    fn rest(&self) -> &[u8] {
        &self.data[self.start..]
    }

    pub fn peek_byte(&self, offset: usize) -> Option<u8> {
        self.rest().get(offset).copied()
    }

    pub fn peek_u32(&self, offset: usize) -> Option<u32> {
        let slice = self.rest().get(offset..offset + 4)?;
        Some(BigEndian::read_u32(slice))
    }

    /// Zero-copy peek at `len` bytes starting at `offset`, `None` if not
    /// enough data has arrived yet.
    pub fn peek_bytes(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.rest().get(offset..offset + len)
    }

    /// Removes and returns the first `n` bytes as an owned `Vec`. Use
    /// [`Self::peek_bytes`] + [`Self::discard`] instead when the caller can
    /// consume in place (e.g. copying a PIECE block directly into an
    /// `ActivePiece` buffer) to avoid the extra allocation this performs.
    pub fn consume(&mut self, n: usize) -> Vec<u8> {
        let out = self.rest()[..n].to_vec();
        self.discard(n);
        out
    }

    pub fn discard(&mut self, n: usize) {
        debug_assert!(n <= self.length());
        self.start += n;
        if self.start >= COMPACT_THRESHOLD || self.start == self.data.len() {
            self.data.drain(..self.start);
            self.start = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_consume_preserves_order() {
        let mut buf = ChunkedBuffer::new();
        buf.append(b"hello");
        buf.append(b"world");
        assert_eq!(buf.length(), 10);
        assert_eq!(buf.consume(5), b"hello");
        assert_eq!(buf.consume(5), b"world");
        assert_eq!(buf.length(), 0);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut buf = ChunkedBuffer::new();
        buf.append(&[0, 0, 0, 42, 99]);
        assert_eq!(buf.peek_u32(0), Some(42));
        assert_eq!(buf.peek_byte(4), Some(99));
        assert_eq!(buf.length(), 5);
    }

    #[test]
    fn zero_copy_piece_fast_path() {
        let mut buf = ChunkedBuffer::new();
        let mut frame = vec![0u8, 0, 0, 0];
        frame.extend_from_slice(&[1, 2, 3, 4]);
        buf.append(&frame);
        let block = buf.peek_bytes(4, 4).unwrap().to_vec();
        buf.discard(8);
        assert_eq!(block, vec![1, 2, 3, 4]);
        assert_eq!(buf.length(), 0);
    }

    #[test]
    fn compacts_after_threshold() {
        let mut buf = ChunkedBuffer::new();
        buf.append(&vec![0u8; COMPACT_THRESHOLD + 10]);
        buf.discard(COMPACT_THRESHOLD + 5);
        assert_eq!(buf.length(), 5);
        assert_eq!(buf.start, 0);
    }
}
