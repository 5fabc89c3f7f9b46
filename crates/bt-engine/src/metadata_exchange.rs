//! BEP 9 `ut_metadata` assembly (spec §4.9): request 16 KiB metadata pieces
//! round-robin from peers that advertise `metadata_size`, verify the
//! assembled buffer's SHA-1 against the infohash, and decode the `info`
//! dict once complete.

use bt_core::{InfoHash, TorrentMetadata};
use bt_peer_protocol::UtMetadataMessage;

const METADATA_PIECE_SIZE: u32 = 16384;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PieceState {
    Missing,
    Requested { peer: u64 },
    Received,
}

/// Assembles the `info` dict for a torrent added from a magnet link.
/// Discarded and restarted wholesale on a hash mismatch (spec: "metadata
/// fetch restarts from a disjoint set of peers").
pub struct MetadataAssembly {
    info_hash: InfoHash,
    total_size: u32,
    buffer: Vec<u8>,
    pieces: Vec<PieceState>,
    attempted_peers: std::collections::HashSet<u64>,
}

pub enum AssemblyOutcome {
    StillAssembling,
    Installed(TorrentMetadata),
    Mismatch,
}

impl MetadataAssembly {
    pub fn new(info_hash: InfoHash, total_size: u32) -> Self {
        let piece_count = (total_size as usize).div_ceil(METADATA_PIECE_SIZE as usize);
        Self {
            info_hash,
            total_size,
            buffer: vec![0u8; total_size as usize],
            pieces: vec![PieceState::Missing; piece_count],
            attempted_peers: std::collections::HashSet::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pieces.iter().all(|p| *p == PieceState::Received)
    }

    /// Picks the next metadata piece to request from `peer`, round-robin
    /// over pieces that peer hasn't already been asked for.
    pub fn next_request(&mut self, peer: u64) -> Option<UtMetadataMessage> {
        self.attempted_peers.insert(peer);
        let index = self
            .pieces
            .iter()
            .position(|p| *p == PieceState::Missing)?;
        self.pieces[index] = PieceState::Requested { peer };
        Some(UtMetadataMessage::Request { piece: index as u32 })
    }

    pub fn on_data(&mut self, piece: u32, total_size: u32, data: &[u8]) {
        if total_size != self.total_size {
            return;
        }
        let Some(state) = self.pieces.get_mut(piece as usize) else {
            return;
        };
        let start = piece as usize * METADATA_PIECE_SIZE as usize;
        let end = (start + data.len()).min(self.buffer.len());
        self.buffer[start..end].copy_from_slice(&data[..end - start]);
        *state = PieceState::Received;
    }

    pub fn on_reject(&mut self, piece: u32) {
        if let Some(state) = self.pieces.get_mut(piece as usize) {
            *state = PieceState::Missing;
        }
    }

    /// Releases any in-flight requests attributed to a peer that
    /// disconnected, so other peers can pick them up.
    pub fn release_peer(&mut self, peer: u64) {
        for state in self.pieces.iter_mut() {
            if *state == (PieceState::Requested { peer }) {
                *state = PieceState::Missing;
            }
        }
    }

    /// Verifies the completed buffer against the infohash and decodes it.
    /// On success the caller installs the returned metadata; on mismatch
    /// the caller must construct a fresh `MetadataAssembly`.
    pub fn try_finish(self) -> AssemblyOutcome {
        if !self.is_complete() {
            return AssemblyOutcome::StillAssembling;
        }
        let digest = bt_sha1w::sha1(&self.buffer);
        if InfoHash::from_digest(digest) != self.info_hash {
            return AssemblyOutcome::Mismatch;
        }
        match bt_core::metainfo::install_metadata_from_info_bytes(self.info_hash, self.buffer) {
            Ok(metadata) => AssemblyOutcome::Installed(metadata),
            Err(_) => AssemblyOutcome::Mismatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_requests_each_piece_once() {
        let mut assembly = MetadataAssembly::new(InfoHash::from_bytes([1u8; 20]), 16384 * 2 + 100);
        let req1 = assembly.next_request(1).unwrap();
        let req2 = assembly.next_request(2).unwrap();
        let req3 = assembly.next_request(1);
        assert!(matches!(req1, UtMetadataMessage::Request { piece: 0 }));
        assert!(matches!(req2, UtMetadataMessage::Request { piece: 1 }));
        assert!(matches!(req3, UtMetadataMessage::Request { piece: 2 }));
    }

    #[test]
    fn reject_makes_piece_requestable_again() {
        let mut assembly = MetadataAssembly::new(InfoHash::from_bytes([1u8; 20]), 16384);
        assembly.next_request(1);
        assembly.on_reject(0);
        let req = assembly.next_request(2).unwrap();
        assert!(matches!(req, UtMetadataMessage::Request { piece: 0 }));
    }

    #[test]
    fn mismatched_hash_is_reported_as_mismatch() {
        let mut assembly = MetadataAssembly::new(InfoHash::from_bytes([9u8; 20]), 4);
        assembly.next_request(1);
        assembly.on_data(0, 4, b"xxxx");
        assert!(matches!(assembly.try_finish(), AssemblyOutcome::Mismatch));
    }
}
