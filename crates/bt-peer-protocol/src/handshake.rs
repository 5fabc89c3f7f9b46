use bt_core::{InfoHash, PeerId};

pub const PSTR: &[u8] = b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 1 + PSTR.len() + 8 + 20 + 20;

/// Bit set in reserved byte 5 to advertise BEP 10 extended messages.
const EXTENSION_BIT_BEP10: u8 = 0x10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: InfoHash,
    pub peer_id: PeerId,
    pub supports_extended: bool,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("not enough bytes for a handshake yet")]
    NotEnoughData,
    #[error("wrong pstrlen {0}, expected {}", PSTR.len())]
    WrongPstrLen(u8),
    #[error("pstr does not match \"BitTorrent protocol\"")]
    WrongPstrContent,
}

impl Handshake {
    pub fn new(info_hash: InfoHash, peer_id: PeerId) -> Self {
        Self {
            info_hash,
            peer_id,
            supports_extended: true,
        }
    }

    pub fn serialize(&self) -> [u8; HANDSHAKE_LEN] {
        let mut buf = [0u8; HANDSHAKE_LEN];
        buf[0] = PSTR.len() as u8;
        buf[1..1 + PSTR.len()].copy_from_slice(PSTR);
        let reserved_start = 1 + PSTR.len();
        if self.supports_extended {
            buf[reserved_start + 5] = EXTENSION_BIT_BEP10;
        }
        let infohash_start = reserved_start + 8;
        buf[infohash_start..infohash_start + 20].copy_from_slice(self.info_hash.as_bytes());
        let peerid_start = infohash_start + 20;
        buf[peerid_start..peerid_start + 20].copy_from_slice(self.peer_id.as_bytes());
        buf
    }

    /// Parses exactly [`HANDSHAKE_LEN`] bytes. Any other pstrlen/pstr is a
    /// protocol error per spec §4.2 ("close connection").
    pub fn deserialize(buf: &[u8]) -> Result<Self, HandshakeError> {
        if buf.len() < HANDSHAKE_LEN {
            return Err(HandshakeError::NotEnoughData);
        }
        let pstrlen = buf[0];
        if pstrlen as usize != PSTR.len() {
            return Err(HandshakeError::WrongPstrLen(pstrlen));
        }
        if &buf[1..1 + PSTR.len()] != PSTR {
            return Err(HandshakeError::WrongPstrContent);
        }
        let reserved_start = 1 + PSTR.len();
        let supports_extended = buf[reserved_start + 5] & EXTENSION_BIT_BEP10 != 0;
        let infohash_start = reserved_start + 8;
        let mut ih = [0u8; 20];
        ih.copy_from_slice(&buf[infohash_start..infohash_start + 20]);
        let peerid_start = infohash_start + 20;
        let mut pid = [0u8; 20];
        pid.copy_from_slice(&buf[peerid_start..peerid_start + 20]);
        Ok(Self {
            info_hash: InfoHash::from_bytes(ih),
            peer_id: PeerId(pid),
            supports_extended,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let h = Handshake::new(InfoHash::from_bytes([7u8; 20]), PeerId([9u8; 20]));
        let bytes = h.serialize();
        assert_eq!(bytes.len(), HANDSHAKE_LEN);
        let back = Handshake::deserialize(&bytes).unwrap();
        assert_eq!(h, back);
        assert!(back.supports_extended);
    }

    #[test]
    fn rejects_bad_pstr() {
        let mut bytes = Handshake::new(InfoHash::from_bytes([0; 20]), PeerId([0; 20])).serialize();
        bytes[0] = 5;
        assert_eq!(
            Handshake::deserialize(&bytes),
            Err(HandshakeError::WrongPstrLen(5))
        );
    }

    #[test]
    fn rejects_truncated_input() {
        let bytes = [0u8; 10];
        assert_eq!(
            Handshake::deserialize(&bytes),
            Err(HandshakeError::NotEnoughData)
        );
    }
}
