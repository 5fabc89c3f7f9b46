/// Fixed block size used for REQUEST pipelining (spec §4.2, §4.5).
pub const BLOCK_SIZE: u32 = 16384;

fn last_element_size(total: u64, each: u64) -> u64 {
    let rem = total % each;
    if rem == 0 { each } else { rem }
}

/// A piece index already validated against a [`Lengths`]' piece count.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValidPieceIndex(u32);

impl ValidPieceIndex {
    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Debug for ValidPieceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "piece#{}", self.0)
    }
}

/// Identifies one 16 KiB (or smaller, for the final block) request unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkInfo {
    pub piece_index: ValidPieceIndex,
    pub offset: u32,
    pub size: u32,
}

/// Derived piece/block geometry for one torrent's content length.
#[derive(Clone, Copy, Debug)]
pub struct Lengths {
    total_length: u64,
    piece_length: u32,
    last_piece_id: u32,
    last_piece_length: u32,
}

impl Lengths {
    pub fn new(total_length: u64, piece_length: u32) -> Result<Self, LengthsError> {
        if total_length == 0 {
            return Err(LengthsError::ZeroLength);
        }
        if piece_length == 0 {
            return Err(LengthsError::ZeroPieceLength);
        }
        let total_pieces = total_length.div_ceil(piece_length as u64) as u32;
        Ok(Self {
            total_length,
            piece_length,
            last_piece_id: total_pieces - 1,
            last_piece_length: last_element_size(total_length, piece_length as u64) as u32,
        })
    }

    pub const fn total_length(&self) -> u64 {
        self.total_length
    }

    pub const fn piece_length_default(&self) -> u32 {
        self.piece_length
    }

    pub const fn total_pieces(&self) -> u32 {
        self.last_piece_id + 1
    }

    pub const fn last_piece_id(&self) -> ValidPieceIndex {
        ValidPieceIndex(self.last_piece_id)
    }

    pub const fn validate_piece_index(&self, index: u32) -> Option<ValidPieceIndex> {
        if index > self.last_piece_id {
            None
        } else {
            Some(ValidPieceIndex(index))
        }
    }

    /// Length of a given piece; every piece is `piece_length` except the
    /// last, which may be shorter.
    pub const fn piece_length(&self, index: ValidPieceIndex) -> u32 {
        if index.0 == self.last_piece_id {
            self.last_piece_length
        } else {
            self.piece_length
        }
    }

    /// Byte offset of the start of a piece in the concatenated piece-space.
    pub fn piece_offset(&self, index: ValidPieceIndex) -> u64 {
        index.0 as u64 * self.piece_length as u64
    }

    /// Number of 16 KiB blocks in a piece (the last block of the last piece
    /// may be shorter than 16 KiB, but it is still one block).
    pub fn blocks_per_piece(&self, index: ValidPieceIndex) -> u32 {
        self.piece_length(index).div_ceil(BLOCK_SIZE)
    }

    pub fn block_size(&self, index: ValidPieceIndex, block_index: u32) -> Option<u32> {
        let piece_len = self.piece_length(index);
        let start = block_index.checked_mul(BLOCK_SIZE)?;
        if start >= piece_len {
            return None;
        }
        Some((piece_len - start).min(BLOCK_SIZE))
    }

    pub fn iter_chunks(&self, index: ValidPieceIndex) -> impl Iterator<Item = ChunkInfo> + '_ {
        let n = self.blocks_per_piece(index);
        (0..n).map(move |b| ChunkInfo {
            piece_index: index,
            offset: b * BLOCK_SIZE,
            size: self.block_size(index, b).expect("block index in range"),
        })
    }

    pub const fn piece_bitfield_bytes(&self) -> usize {
        (self.total_pieces() as usize).div_ceil(8)
    }
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthsError {
    #[error("torrent with 0 total length is not valid")]
    ZeroLength,
    #[error("torrent with 0 piece length is not valid")]
    ZeroPieceLength,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_piece_single_block() {
        let l = Lengths::new(100, 16384).unwrap();
        assert_eq!(l.total_pieces(), 1);
        let p0 = l.validate_piece_index(0).unwrap();
        assert_eq!(l.piece_length(p0), 100);
        assert_eq!(l.blocks_per_piece(p0), 1);
        assert_eq!(l.block_size(p0, 0), Some(100));
    }

    #[test]
    fn final_piece_smaller_than_piece_length() {
        let l = Lengths::new(16384 * 3 + 100, 16384).unwrap();
        assert_eq!(l.total_pieces(), 4);
        let last = l.last_piece_id();
        assert_eq!(last.get(), 3);
        assert_eq!(l.piece_length(last), 100);
    }

    #[test]
    fn final_block_of_final_piece_smaller_than_16kib() {
        // piece_length 32768 = 2 blocks; final piece 20000 bytes -> blocks
        // of 16384 and 3616.
        let l = Lengths::new(32768 + 20000, 32768).unwrap();
        let last = l.last_piece_id();
        assert_eq!(l.blocks_per_piece(last), 2);
        assert_eq!(l.block_size(last, 0), Some(16384));
        assert_eq!(l.block_size(last, 1), Some(3616));
        assert_eq!(l.block_size(last, 2), None);
    }

    #[test]
    fn iter_chunks_covers_whole_piece_contiguously() {
        let l = Lengths::new(50000, 32768).unwrap();
        let p0 = l.validate_piece_index(0).unwrap();
        let chunks: Vec<_> = l.iter_chunks(p0).collect();
        let total: u32 = chunks.iter().map(|c| c.size).sum();
        assert_eq!(total, l.piece_length(p0));
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[1].offset, BLOCK_SIZE);
    }

    #[test]
    fn rejects_zero_length() {
        assert_eq!(Lengths::new(0, 16384), Err(LengthsError::ZeroLength));
        assert_eq!(Lengths::new(100, 0), Err(LengthsError::ZeroPieceLength));
    }
}
