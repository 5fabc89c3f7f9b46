/// Ordered sequence of one bit per piece, MSB-first within each byte.
///
/// Trailing padding bits in the final byte must remain zero; the invariant
/// `popcount(bits) == complete_pieces <= piece_count` is enforced by
/// construction (every mutator either keeps the count consistent or is the
/// only way to flip a bit).
#[derive(Clone, PartialEq, Eq)]
pub struct BitField {
    bytes: Vec<u8>,
    piece_count: u32,
}

impl BitField {
    pub fn new(piece_count: u32) -> Self {
        let byte_len = (piece_count as usize).div_ceil(8);
        Self {
            bytes: vec![0u8; byte_len],
            piece_count,
        }
    }

    pub fn piece_count(&self) -> u32 {
        self.piece_count
    }

    /// Builds from a raw byte slice (wire BITFIELD payload or resumed
    /// session bytes). Rejects a length that's inconsistent with
    /// `piece_count`, and rejects set padding bits in the final byte.
    pub fn from_bytes(bytes: &[u8], piece_count: u32) -> Result<Self, BitFieldError> {
        let expected_len = (piece_count as usize).div_ceil(8);
        if bytes.len() != expected_len {
            return Err(BitFieldError::LengthMismatch {
                expected: expected_len,
                actual: bytes.len(),
            });
        }
        let pad_bits = expected_len * 8 - piece_count as usize;
        if pad_bits > 0 {
            let last = bytes[bytes.len() - 1];
            let mask = (1u8 << pad_bits) - 1;
            if last & mask != 0 {
                return Err(BitFieldError::NonZeroPadding);
            }
        }
        Ok(Self {
            bytes: bytes.to_vec(),
            piece_count,
        })
    }

    pub fn from_hex(hex_str: &str, piece_count: u32) -> Result<Self, BitFieldError> {
        let bytes = hex::decode(hex_str).map_err(|_| BitFieldError::InvalidHex)?;
        Self::from_bytes(&bytes, piece_count)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn has(&self, index: u32) -> bool {
        if index >= self.piece_count {
            return false;
        }
        let byte = self.bytes[(index / 8) as usize];
        let bit = 7 - (index % 8);
        byte & (1 << bit) != 0
    }

    /// Sets a piece complete. No-op if already set. Returns whether the bit
    /// actually flipped, so callers can tell when to fire a HAVE broadcast.
    pub fn set(&mut self, index: u32) -> bool {
        if index >= self.piece_count || self.has(index) {
            return false;
        }
        let byte_idx = (index / 8) as usize;
        let bit = 7 - (index % 8);
        self.bytes[byte_idx] |= 1 << bit;
        true
    }

    pub fn count_ones(&self) -> u32 {
        self.bytes.iter().map(|b| b.count_ones()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.count_ones() == self.piece_count
    }

    pub fn iter_missing(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.piece_count).filter(move |i| !self.has(*i))
    }
}

impl std::fmt::Debug for BitField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BitField({}/{} pieces, {})",
            self.count_ones(),
            self.piece_count,
            self.to_hex()
        )
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BitFieldError {
    #[error("expected {expected} bytes for this piece count, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("padding bits in the final byte must be zero")]
    NonZeroPadding,
    #[error("invalid hex")]
    InvalidHex,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_has() {
        let mut bf = BitField::new(10);
        assert!(!bf.has(3));
        assert!(bf.set(3));
        assert!(bf.has(3));
        assert!(!bf.set(3)); // already set
        assert_eq!(bf.count_ones(), 1);
    }

    #[test]
    fn hex_roundtrip() {
        let mut bf = BitField::new(20);
        bf.set(0);
        bf.set(19);
        bf.set(7);
        let hex_str = bf.to_hex();
        let bf2 = BitField::from_hex(&hex_str, 20).unwrap();
        assert_eq!(bf, bf2);
    }

    #[test]
    fn rejects_nonzero_padding() {
        // piece_count=1 means 1 byte, 7 padding bits; 0x01 sets a pad bit.
        assert_eq!(
            BitField::from_bytes(&[0x01], 1),
            Err(BitFieldError::NonZeroPadding)
        );
        assert!(BitField::from_bytes(&[0x80], 1).is_ok());
    }

    #[test]
    fn rejects_length_mismatch() {
        assert!(BitField::from_bytes(&[0, 0], 9).is_ok());
        assert!(matches!(
            BitField::from_bytes(&[0], 9),
            Err(BitFieldError::LengthMismatch { .. })
        ));
    }

    #[test]
    fn is_complete() {
        let mut bf = BitField::new(3);
        assert!(!bf.is_complete());
        bf.set(0);
        bf.set(1);
        bf.set(2);
        assert!(bf.is_complete());
    }
}
