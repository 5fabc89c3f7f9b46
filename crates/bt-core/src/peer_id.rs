use rand::RngCore;

/// 20-byte peer identifier sent in the handshake.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 20]);

impl PeerId {
    /// Azureus-style: `-<2-letter client id><4-digit version>-` followed by
    /// 12 random bytes, the convention most clients (including this one's
    /// teacher) follow.
    pub fn generate(client_id: &str, version: [u8; 4]) -> Self {
        let mut buf = [0u8; 20];
        buf[0] = b'-';
        let id_bytes = client_id.as_bytes();
        buf[1] = id_bytes.first().copied().unwrap_or(b'B');
        buf[2] = id_bytes.get(1).copied().unwrap_or(b'T');
        for (i, v) in version.iter().enumerate() {
            buf[3 + i] = b'0' + (v % 10);
        }
        buf[7] = b'-';
        rand::rng().fill_bytes(&mut buf[8..20]);
        Self(buf)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Debug for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerId({})", String::from_utf8_lossy(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_expected_prefix_and_are_unique() {
        let a = PeerId::generate("BT", [0, 0, 0, 1]);
        let b = PeerId::generate("BT", [0, 0, 0, 1]);
        assert_eq!(&a.0[0..8], b"-BT0001-");
        assert_ne!(a.0, b.0);
    }
}
