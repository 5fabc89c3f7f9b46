//! Rarest-first piece selection with an endgame fallback (spec §4.5).

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::seq::IteratorRandom;

use bt_core::Lengths;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockState {
    Missing,
    Requested { peer: u64 },
    Received,
}

pub struct ActivePiece {
    pub piece_index: u32,
    pub blocks: Vec<BlockState>,
    pub deadlines: Vec<Option<Instant>>,
    pub data: Vec<u8>,
    pub contributors: Vec<u64>,
}

impl ActivePiece {
    fn new(piece_index: u32, lengths: &Lengths) -> Self {
        let valid = lengths
            .validate_piece_index(piece_index)
            .expect("piece_index in range");
        let block_count = lengths.blocks_per_piece(valid) as usize;
        let piece_len = lengths.piece_length(valid) as usize;
        Self {
            piece_index,
            blocks: vec![BlockState::Missing; block_count],
            deadlines: vec![None; block_count],
            data: vec![0u8; piece_len],
            contributors: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.blocks.iter().all(|b| *b == BlockState::Received)
    }

    pub fn missing_block_count(&self) -> usize {
        self.blocks.iter().filter(|b| **b != BlockState::Received).count()
    }
}

/// Tracks per-piece peer availability and drives block-level request
/// scheduling. Does not own the wire protocol; `Torrent` calls in with
/// peer bitfields/haves and reads back "what to request next."
pub struct PieceManager {
    lengths: Lengths,
    availability: Vec<u32>,
    have: bt_core::BitField,
    active: HashMap<u32, ActivePiece>,
    endgame: bool,
    endgame_threshold: usize,
}

impl PieceManager {
    pub fn new(lengths: Lengths, endgame_threshold: usize) -> Self {
        let total = lengths.total_pieces();
        Self {
            have: bt_core::BitField::new(total),
            availability: vec![0; total as usize],
            lengths,
            active: HashMap::new(),
            endgame: false,
            endgame_threshold,
        }
    }

    pub fn have(&self) -> &bt_core::BitField {
        &self.have
    }

    pub fn mark_have_locally(&mut self, piece_index: u32) {
        self.have.set(piece_index);
        self.active.remove(&piece_index);
    }

    pub fn on_peer_bitfield(&mut self, bits: &bt_core::BitField) {
        for i in 0..self.availability.len() as u32 {
            if bits.has(i) {
                self.availability[i as usize] += 1;
            }
        }
        self.recompute_endgame();
    }

    pub fn on_peer_have(&mut self, piece_index: u32) {
        if let Some(slot) = self.availability.get_mut(piece_index as usize) {
            *slot += 1;
        }
        self.recompute_endgame();
    }

    pub fn on_peer_left(&mut self, bits: &bt_core::BitField) {
        for i in 0..self.availability.len() as u32 {
            if bits.has(i) && self.availability[i as usize] > 0 {
                self.availability[i as usize] -= 1;
            }
        }
    }

    fn recompute_endgame(&mut self) {
        let missing_blocks: usize = self.active.values().map(ActivePiece::missing_block_count).sum();
        let unstarted_missing_pieces = (0..self.have.piece_count())
            .filter(|&i| !self.have.has(i) && !self.active.contains_key(&i))
            .count();
        self.endgame = unstarted_missing_pieces == 0 && missing_blocks > 0
            && missing_blocks <= self.endgame_threshold;
    }

    pub fn is_endgame(&self) -> bool {
        self.endgame
    }

    /// Rarest-first candidate selection among pieces the given peer has
    /// and we're missing, breaking ties among equally-rare pieces randomly
    /// for swarm health. Starts an `ActivePiece` on first selection.
    pub fn pick_piece_for_peer(&mut self, peer_bits: &bt_core::BitField) -> Option<u32> {
        let mut best_rarity: Option<u32> = None;
        let mut candidates: Vec<u32> = Vec::new();
        for i in 0..self.have.piece_count() {
            if self.have.has(i) || !peer_bits.has(i) {
                continue;
            }
            if !self.endgame && self.active.contains_key(&i) {
                continue;
            }
            let rarity = self.availability[i as usize];
            match best_rarity {
                Some(best) if rarity > best => continue,
                Some(best) if rarity < best => {
                    best_rarity = Some(rarity);
                    candidates.clear();
                    candidates.push(i);
                }
                _ => {
                    best_rarity = Some(rarity);
                    candidates.push(i);
                }
            }
        }
        let piece_index = candidates.into_iter().choose(&mut rand::rng())?;
        self.active
            .entry(piece_index)
            .or_insert_with(|| ActivePiece::new(piece_index, &self.lengths));
        Some(piece_index)
    }

    pub fn active_piece_mut(&mut self, piece_index: u32) -> Option<&mut ActivePiece> {
        self.active.get_mut(&piece_index)
    }

    /// Count of blocks currently `Requested` from `peer_id` across every
    /// active piece, so the caller can cap cumulative outstanding requests
    /// per peer at `pipelineDepth` instead of re-issuing a fresh budget of
    /// requests every tick (spec §4.4, Testable Property #5).
    pub fn outstanding_for_peer(&self, peer_id: u64) -> usize {
        self.active
            .values()
            .flat_map(|piece| piece.blocks.iter())
            .filter(|b| **b == BlockState::Requested { peer: peer_id })
            .count()
    }

    /// Finds the next block request to issue for `piece_index`, marking it
    /// `Requested`. In endgame, a block already `Requested` by someone else
    /// may be requested again (in-flight duplicates are spec'd behavior).
    pub fn next_block_request(
        &mut self,
        piece_index: u32,
        peer_id: u64,
        deadline: Duration,
        now: Instant,
    ) -> Option<(u32, u32, u32)> {
        let piece = self.active.get_mut(&piece_index)?;
        let block_index = if self.endgame {
            piece
                .blocks
                .iter()
                .position(|b| *b != BlockState::Received)?
        } else {
            piece.blocks.iter().position(|b| *b == BlockState::Missing)?
        };
        piece.blocks[block_index] = BlockState::Requested { peer: peer_id };
        piece.deadlines[block_index] = Some(now + deadline);
        let begin = block_index as u32 * bt_core::BLOCK_SIZE;
        let valid = self.lengths.validate_piece_index(piece_index)?;
        let size = self.lengths.block_size(valid, block_index as u32)?;
        Some((piece_index, begin, size))
    }

    /// Reclaims blocks whose deadline has passed back to `Missing`.
    pub fn reap_timed_out(&mut self, now: Instant) {
        for piece in self.active.values_mut() {
            for (block, deadline) in piece.blocks.iter_mut().zip(piece.deadlines.iter_mut()) {
                if let BlockState::Requested { .. } = block {
                    if deadline.map_or(false, |d| now >= d) {
                        *block = BlockState::Missing;
                        *deadline = None;
                    }
                }
            }
        }
    }

    /// Releases all in-flight requests attributed to a disconnecting peer.
    pub fn release_peer(&mut self, peer_id: u64) {
        for piece in self.active.values_mut() {
            for (block, deadline) in piece.blocks.iter_mut().zip(piece.deadlines.iter_mut()) {
                if *block == (BlockState::Requested { peer: peer_id }) {
                    *block = BlockState::Missing;
                    *deadline = None;
                }
            }
        }
    }

    pub fn on_block_received(&mut self, piece_index: u32, begin: u32, data: &[u8], peer_id: u64) -> bool {
        let Some(piece) = self.active.get_mut(&piece_index) else {
            return false;
        };
        let block_index = (begin / bt_core::BLOCK_SIZE) as usize;
        let Some(slot) = piece.blocks.get_mut(block_index) else {
            return false;
        };
        if *slot == BlockState::Received {
            return false;
        }
        *slot = BlockState::Received;
        piece.deadlines[block_index] = None;
        if !piece.contributors.contains(&peer_id) {
            piece.contributors.push(peer_id);
        }
        let start = begin as usize;
        piece.data[start..start + data.len()].copy_from_slice(data);
        piece.is_complete()
    }

    pub fn take_completed(&mut self, piece_index: u32) -> Option<ActivePiece> {
        self.active.remove(&piece_index)
    }

    /// Reverts a piece whose hash failed verification back to all-missing,
    /// keeping it active so it's retried rather than re-picked from scratch.
    pub fn reset_failed_piece(&mut self, piece_index: u32) {
        if let Some(piece) = self.active.get_mut(&piece_index) {
            for block in piece.blocks.iter_mut() {
                *block = BlockState::Missing;
            }
            piece.deadlines.iter_mut().for_each(|d| *d = None);
            piece.contributors.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lengths() -> Lengths {
        Lengths::new(bt_core::BLOCK_SIZE as u64 * 3 * 2, bt_core::BLOCK_SIZE * 3).unwrap()
    }

    #[test]
    fn rarest_first_prefers_least_available_piece() {
        let mut pm = PieceManager::new(lengths(), 20);
        let mut all = bt_core::BitField::new(2);
        all.set(0);
        all.set(1);
        pm.on_peer_bitfield(&all);
        let mut just_one = bt_core::BitField::new(2);
        just_one.set(1);
        pm.on_peer_bitfield(&just_one);

        // piece 1 is now available from 2 peers, piece 0 from 1: piece 0 is rarer.
        let picked = pm.pick_piece_for_peer(&all);
        assert_eq!(picked, Some(0));
    }

    #[test]
    fn block_lifecycle_completes_piece() {
        let mut pm = PieceManager::new(lengths(), 20);
        let mut bits = bt_core::BitField::new(2);
        bits.set(0);
        pm.on_peer_bitfield(&bits);
        let piece = pm.pick_piece_for_peer(&bits).unwrap();
        assert_eq!(piece, 0);

        let mut done = false;
        loop {
            let Some((p, begin, size)) =
                pm.next_block_request(piece, 1, Duration::from_secs(30), Instant::now())
            else {
                break;
            };
            let block = vec![0xABu8; size as usize];
            done = pm.on_block_received(p, begin, &block, 1);
        }
        assert!(done);
        assert!(pm.active_piece_mut(0).unwrap().is_complete());
    }

    #[test]
    fn timed_out_block_is_reclaimed() {
        let mut pm = PieceManager::new(lengths(), 20);
        let mut bits = bt_core::BitField::new(2);
        bits.set(0);
        pm.on_peer_bitfield(&bits);
        let piece = pm.pick_piece_for_peer(&bits).unwrap();
        let past = Instant::now();
        pm.next_block_request(piece, 1, Duration::from_secs(0), past);
        pm.reap_timed_out(Instant::now() + Duration::from_millis(1));
        let p = pm.active_piece_mut(0).unwrap();
        assert_eq!(p.blocks[0], BlockState::Missing);
    }
}
