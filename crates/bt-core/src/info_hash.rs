use bt_sha1w::Sha1Digest;

/// 20-byte identity of a torrent, `SHA-1(raw info bytes)`.
///
/// Equality and hashing operate on the byte representation. Construction
/// from hex (magnet links, API calls, session keys) normalizes case at the
/// boundary, per spec: "heterogeneous infohash casing ... normalize at the
/// public API boundary to lowercase hex; internally store the 20-byte
/// form."
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn from_digest(d: Sha1Digest) -> Self {
        Self(d.0)
    }

    /// Accepts upper- or lower-case 40-char hex.
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 40 {
            return None;
        }
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Canonical lowercase hex form, used at every indexing boundary
    /// (session keys, logs, API responses).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "InfoHash({})", self.to_hex())
    }
}

impl std::fmt::Display for InfoHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_roundtrip_and_case_normalization() {
        assert!(InfoHash::from_hex("too_short").is_none());

        let lower = "95c6c298c84fee2eee10c044d673537da158f0f8";
        let upper = "95C6C298C84FEE2EEE10C044D673537DA158F0F8";
        let a = InfoHash::from_hex(lower).unwrap();
        let b = InfoHash::from_hex(upper).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_hex(), lower);
    }
}
