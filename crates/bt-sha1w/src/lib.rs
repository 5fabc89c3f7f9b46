//! A thin wrapper around a SHA-1 implementation, kept as its own crate so
//! the hashing backend can be swapped (or, per spec, dispatched onto a
//! worker thread by an adapter) without the rest of the engine depending on
//! a concrete crypto crate.

use sha1::{Digest, Sha1};

/// 20-byte SHA-1 digest, used for both info-hashes and piece hashes.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sha1Digest(pub [u8; 20]);

impl Sha1Digest {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl std::fmt::Debug for Sha1Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::fmt::Display for Sha1Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// One-shot SHA-1 over a single contiguous buffer.
pub fn sha1(data: &[u8]) -> Sha1Digest {
    let mut hasher = Sha1::new();
    hasher.update(data);
    Sha1Digest(hasher.finalize().into())
}

/// Incremental hasher for assembling a digest from several non-contiguous
/// chunks (e.g. a piece whose blocks were appended to a buffer in order but
/// are about to be verified without an extra copy into one slice).
#[derive(Default)]
pub struct IncrementalSha1 {
    inner: Sha1,
}

impl IncrementalSha1 {
    pub fn new() -> Self {
        Self { inner: Sha1::new() }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Sha1Digest {
        Sha1Digest(self.inner.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_answer() {
        // echo -n "abc" | sha1sum
        let d = sha1(b"abc");
        assert_eq!(d.to_hex(), "a9993e364706816aba3e25717850c26c9cd0d89d");
    }

    #[test]
    fn incremental_matches_oneshot() {
        let whole = sha1(b"hello world");
        let mut inc = IncrementalSha1::new();
        inc.update(b"hello ");
        inc.update(b"world");
        assert_eq!(inc.finalize().0, whole.0);
    }

    #[test]
    fn hex_roundtrip() {
        let d = sha1(b"torrent");
        let hex = d.to_hex();
        let back = Sha1Digest::from_hex(&hex).unwrap();
        assert_eq!(d.0, back.0);
    }
}
