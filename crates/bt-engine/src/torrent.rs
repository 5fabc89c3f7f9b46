//! Per-torrent scheduler and tick loop (spec §4.7).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use bt_core::{BitField, InfoHash, PeerId, TorrentMetadata};
use bt_peer_protocol::{Message, PexMessage, RequestSpec};

use crate::adapters::{FileSystem, PeerSocket, SocketFactory};
use crate::config::TorrentOptions;
use crate::error::{EngineError, Result};
use crate::metadata_exchange::{AssemblyOutcome, MetadataAssembly};
use crate::peer_connection::{ConnectionPhase, PeerConnection, PeerEvent};
use crate::pex::{PeerCandidateQueue, PexSchedule};
use crate::piece_manager::PieceManager;
use crate::storage::content::TorrentContentStorage;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TorrentLifecycle {
    AwaitingMetadata,
    Checking,
    Downloading,
    Seeding,
    Paused,
    Error(String),
    Removed,
}

struct PeerSlot<Sock: PeerSocket> {
    conn: PeerConnection,
    socket: Sock,
    pex: PexSchedule,
}

/// Everything the torrent needs from the outside world each tick: a place
/// to dial new peers, and whether an announce to trackers is due. Tracker
/// polling itself is driven by `SessionManager`/the CLI binary, which calls
/// [`Torrent::apply_announce`] with results — `Torrent` never blocks on
/// network I/O directly.
pub struct Torrent<FS: FileSystem, Sock: PeerSocket> {
    pub info_hash: InfoHash,
    pub lifecycle: TorrentLifecycle,
    pub metadata: Option<TorrentMetadata>,
    pub options: TorrentOptions,

    piece_manager: Option<PieceManager>,
    storage: Option<TorrentContentStorage<FS>>,
    /// Storage root resolved at add-time for a magnet torrent, held until
    /// metadata arrives so `install_metadata` can allocate files on it.
    pending_storage_fs: Option<Arc<FS>>,
    metadata_assembly: Option<MetadataAssembly>,
    bitfield: Option<BitField>,

    peers: HashMap<u64, PeerSlot<Sock>>,
    next_peer_id: u64,
    pub peer_candidates: PeerCandidateQueue,
    our_peer_id: PeerId,

    pub uploaded: u64,
    pub downloaded: u64,
    bitfield_dirty: bool,
    completed_announced: bool,
    last_housekeeping: Instant,
}

impl<FS: FileSystem, Sock: PeerSocket> Torrent<FS, Sock> {
    pub fn new_from_metadata(
        metadata: TorrentMetadata,
        storage: TorrentContentStorage<FS>,
        our_peer_id: PeerId,
        options: TorrentOptions,
    ) -> Self {
        let total_pieces = metadata.lengths.total_pieces();
        Self {
            info_hash: metadata.info_hash,
            lifecycle: TorrentLifecycle::Checking,
            piece_manager: Some(PieceManager::new(metadata.lengths, options.endgame_threshold_blocks)),
            bitfield: Some(BitField::new(total_pieces)),
            metadata: Some(metadata),
            storage: Some(storage),
            pending_storage_fs: None,
            metadata_assembly: None,
            peers: HashMap::new(),
            next_peer_id: 0,
            peer_candidates: PeerCandidateQueue::new(),
            our_peer_id,
            uploaded: 0,
            downloaded: 0,
            bitfield_dirty: false,
            completed_announced: false,
            last_housekeeping: Instant::now(),
            options,
        }
    }

    pub fn new_from_magnet(
        info_hash: InfoHash,
        our_peer_id: PeerId,
        options: TorrentOptions,
        storage_fs: Arc<FS>,
    ) -> Self {
        Self {
            info_hash,
            lifecycle: TorrentLifecycle::AwaitingMetadata,
            piece_manager: None,
            bitfield: None,
            metadata: None,
            storage: None,
            pending_storage_fs: Some(storage_fs),
            metadata_assembly: None,
            peers: HashMap::new(),
            next_peer_id: 0,
            peer_candidates: PeerCandidateQueue::new(),
            our_peer_id,
            uploaded: 0,
            downloaded: 0,
            bitfield_dirty: false,
            completed_announced: false,
            last_housekeeping: Instant::now(),
            options,
        }
    }

    pub fn restore_bitfield(&mut self, bits: BitField) {
        if let Some(existing) = self.bitfield.as_mut() {
            for i in 0..bits.piece_count() {
                if bits.has(i) {
                    existing.set(i);
                    if let Some(pm) = self.piece_manager.as_mut() {
                        pm.mark_have_locally(i);
                    }
                }
            }
        }
        if self.lifecycle == TorrentLifecycle::Checking {
            self.lifecycle = TorrentLifecycle::Downloading;
        }
    }

    pub fn bitfield(&self) -> Option<&BitField> {
        self.bitfield.as_ref()
    }

    pub fn take_bitfield_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.bitfield_dirty, false)
    }

    pub fn left_bytes(&self) -> u64 {
        match (&self.metadata, &self.bitfield) {
            (Some(meta), Some(bf)) => {
                let verified: u64 = (0..bf.piece_count())
                    .filter(|&i| bf.has(i))
                    .map(|i| {
                        let valid = meta.lengths.validate_piece_index(i).expect("in range");
                        meta.lengths.piece_length(valid) as u64
                    })
                    .sum();
                meta.lengths.total_length() - verified
            }
            _ => u64::MAX,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.bitfield.as_ref().is_some_and(BitField::is_complete)
    }

    pub fn connect_peer(&mut self, factory: &impl SocketFactory<Socket = Sock>, addr: SocketAddr) -> Result<u64> {
        let total_pieces = self
            .bitfield
            .as_ref()
            .map(BitField::piece_count)
            .unwrap_or(0);
        let socket = factory.connect(addr)?;
        let id = self.next_peer_id;
        self.next_peer_id += 1;
        let mut conn = PeerConnection::new_outbound(id, addr, self.info_hash, self.our_peer_id, total_pieces);
        conn.begin_handshake();
        self.queue_initial_bitfield(&mut conn);
        self.peers.insert(
            id,
            PeerSlot {
                conn,
                socket,
                pex: PexSchedule::default(),
            },
        );
        Ok(id)
    }

    /// Registers a socket an accept() handed us. Unlike `connect_peer`,
    /// there's no dial step: the socket is already established.
    pub fn accept_peer(&mut self, socket: Sock, addr: SocketAddr) -> Result<u64> {
        let total_pieces = self
            .bitfield
            .as_ref()
            .map(BitField::piece_count)
            .unwrap_or(0);
        let id = self.next_peer_id;
        self.next_peer_id += 1;
        let mut conn = PeerConnection::new_inbound(id, addr, self.info_hash, self.our_peer_id, total_pieces);
        conn.begin_handshake();
        self.queue_initial_bitfield(&mut conn);
        self.peers.insert(
            id,
            PeerSlot {
                conn,
                socket,
                pex: PexSchedule::default(),
            },
        );
        Ok(id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Currently connected peer addresses, for session persistence.
    pub fn peer_addrs(&self) -> Vec<SocketAddr> {
        self.peers.values().map(|slot| slot.conn.addr).collect()
    }

    /// Queues our bitfield right behind the handshake, the way every real
    /// client pipelines it (spec §4.2: handshake followed by an optional
    /// bitfield). Skipped while we have nothing verified yet.
    fn queue_initial_bitfield(&self, conn: &mut PeerConnection) {
        if let Some(bits) = &self.bitfield {
            if bits.count_ones() > 0 {
                conn.queue_message(&Message::Bitfield(bits.as_bytes().to_vec()));
            }
        }
    }

    /// Runs one tick of the 5-step algorithm from spec §4.7. `now` is
    /// passed in rather than read internally so tests can drive time.
    pub fn tick(&mut self, now: Instant) -> Result<()> {
        if matches!(self.lifecycle, TorrentLifecycle::Paused | TorrentLifecycle::Removed) {
            return Ok(());
        }

        self.drain_inbound(now)?;
        self.process_completions()?;
        self.generate_requests(now);
        self.flush_outbound();

        if now.duration_since(self.last_housekeeping) >= self.options.tick_interval * 10 {
            self.housekeeping(now);
            self.last_housekeeping = now;
        }
        Ok(())
    }

    fn drain_inbound(&mut self, now: Instant) -> Result<()> {
        let _ = now;
        let high_watermark = self.options.per_peer_read_high_watermark;
        let mut dead = Vec::new();
        let mut pending: Vec<(u64, PeerEvent)> = Vec::new();

        for (&id, slot) in self.peers.iter_mut() {
            let mut buf = [0u8; 64 * 1024];
            loop {
                match slot.socket.try_recv(&mut buf) {
                    Ok(Some(0)) => {
                        dead.push(id);
                        break;
                    }
                    Ok(Some(n)) => {
                        if n >= high_watermark {
                            warn!(peer = id, "inbound backpressure threshold hit");
                        }
                        for event in slot.conn.feed_bytes(&buf[..n]) {
                            if let PeerEvent::ProtocolError(msg) = &event {
                                debug!(peer = id, %msg, "protocol violation, closing");
                                dead.push(id);
                            }
                            pending.push((id, event));
                        }
                        if slot.conn.phase == ConnectionPhase::Closed {
                            dead.push(id);
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        dead.push(id);
                        break;
                    }
                }
            }
        }

        let mut piece_completions = Vec::new();
        for (id, event) in pending {
            match event {
                PeerEvent::ProtocolError(_) | PeerEvent::Unchoked | PeerEvent::Choked => {}
                PeerEvent::Have(index) => {
                    if let Some(pm) = self.piece_manager.as_mut() {
                        pm.on_peer_have(index);
                    }
                    self.update_interest(id);
                }
                PeerEvent::BitfieldReceived => {
                    if let Some(slot) = self.peers.get(&id) {
                        let bits = slot.conn.peer_bitfield.clone();
                        if let Some(pm) = self.piece_manager.as_mut() {
                            pm.on_peer_bitfield(&bits);
                        }
                    }
                    self.update_interest(id);
                }
                PeerEvent::BlockReceived { piece_index, begin, block } => {
                    if let Some(pm) = self.piece_manager.as_mut() {
                        if pm.on_block_received(piece_index, begin, &block, id) {
                            piece_completions.push(piece_index);
                        }
                    }
                }
                PeerEvent::BlockRequested(spec) => self.serve_upload_request(id, spec),
                PeerEvent::Interested => self.maybe_unchoke(id),
                PeerEvent::Cancel(_) | PeerEvent::NotInterested => {}
                PeerEvent::ExtendedHandshake(hs) => self.on_extended_handshake(id, hs),
                PeerEvent::UtMetadata(msg) => self.handle_ut_metadata(id, msg),
                PeerEvent::Pex(pex_msg) => {
                    self.peer_candidates.offer(pex_msg.added);
                    self.peer_candidates.withdraw(pex_msg.dropped);
                }
            }
        }

        for id in dead {
            self.disconnect_peer(id);
        }
        for piece_index in piece_completions {
            self.verify_piece(piece_index)?;
        }
        Ok(())
    }

    /// Recomputes whether we still want anything from `peer` and sends
    /// INTERESTED/NOT_INTERESTED on change (spec §4.4's four-flag state,
    /// kept in sync with what the peer's bitfield actually offers).
    fn update_interest(&mut self, peer: u64) {
        let Some(our_bits) = &self.bitfield else { return };
        let Some(slot) = self.peers.get_mut(&peer) else { return };
        let interested = (0..slot.conn.peer_bitfield.piece_count())
            .any(|i| slot.conn.peer_bitfield.has(i) && !our_bits.has(i));
        if interested != slot.conn.am_interested {
            slot.conn.am_interested = interested;
            let msg = if interested { Message::Interested } else { Message::NotInterested };
            slot.conn.queue_message(&msg);
        }
    }

    /// The fixed policy spec.md substitutes for tit-for-tat: unchoke every
    /// interested peer up to `max_unchoked_peers`, never choke back.
    fn maybe_unchoke(&mut self, peer: u64) {
        let unchoked = self.peers.values().filter(|s| !s.conn.am_choking).count();
        if unchoked >= self.options.max_unchoked_peers {
            return;
        }
        if let Some(slot) = self.peers.get_mut(&peer) {
            if slot.conn.am_choking {
                slot.conn.am_choking = false;
                slot.conn.queue_message(&Message::Unchoke);
            }
        }
    }

    fn serve_upload_request(&mut self, peer: u64, spec: RequestSpec) {
        let Some(bf) = &self.bitfield else { return };
        if !bf.has(spec.index) {
            return;
        }
        if self.peers.get(&peer).is_some_and(|slot| slot.conn.am_choking) {
            return;
        }
        let Some(storage) = self.storage.as_mut() else { return };
        if let Ok(block) = storage.read_block(spec.index, spec.begin, spec.length) {
            if let Some(slot) = self.peers.get_mut(&peer) {
                slot.conn.queue_message(&Message::Piece {
                    index: spec.index,
                    begin: spec.begin,
                    block,
                });
                self.uploaded += spec.length as u64;
            }
        }
    }

    fn handle_ut_metadata(&mut self, peer: u64, msg: bt_peer_protocol::UtMetadataMessage) {
        use bt_peer_protocol::UtMetadataMessage as M;
        match msg {
            M::Request { piece } => {
                if let Some(meta) = &self.metadata {
                    let start = piece as usize * 16384;
                    if let Some(chunk) = meta.raw_info.get(start..) {
                        let len = chunk.len().min(16384);
                        let data = chunk[..len].to_vec();
                        let total_size = meta.raw_info.len() as u32;
                        if let Some(extended_id) =
                            self.peers.get(&peer).and_then(|slot| slot.conn.extension_ids.ut_metadata)
                        {
                            if let Some(slot) = self.peers.get_mut(&peer) {
                                slot.conn.queue_message(&Message::Extended {
                                    extended_id,
                                    payload: M::Data { piece, total_size, data }.encode(),
                                });
                            }
                        }
                    }
                }
            }
            M::Data { piece, total_size, data } => {
                if self.metadata_assembly.is_none() && self.metadata.is_none() {
                    self.metadata_assembly = Some(MetadataAssembly::new(self.info_hash, total_size));
                }
                let mut installed = None;
                if let Some(assembly) = self.metadata_assembly.as_mut() {
                    assembly.on_data(piece, total_size, &data);
                    if assembly.is_complete() {
                        let assembly = self.metadata_assembly.take().unwrap();
                        match assembly.try_finish() {
                            AssemblyOutcome::Installed(metadata) => installed = Some(metadata),
                            AssemblyOutcome::Mismatch => {
                                warn!("metadata hash mismatch, restarting assembly");
                            }
                            AssemblyOutcome::StillAssembling => {}
                        }
                    }
                }
                match installed {
                    Some(metadata) => self.install_metadata(metadata),
                    None => self.request_metadata_piece(peer),
                }
            }
            M::Reject { piece } => {
                if let Some(assembly) = self.metadata_assembly.as_mut() {
                    assembly.on_reject(piece);
                }
                self.request_metadata_piece(peer);
            }
        }
    }

    /// A peer's extended handshake advertised `metadata_size`: starts (or
    /// keeps feeding) the BEP 9 assembly for this torrent's metadata.
    fn on_extended_handshake(&mut self, peer: u64, hs: bt_peer_protocol::ExtendedHandshake) {
        if self.metadata.is_some() {
            return;
        }
        let Some(total_size) = hs.metadata_size else { return };
        if self.metadata_assembly.is_none() {
            self.metadata_assembly = Some(MetadataAssembly::new(self.info_hash, total_size));
        }
        self.request_metadata_piece(peer);
    }

    /// Requests the next round-robin metadata piece from `peer`, using the
    /// extension id that peer itself advertised for `ut_metadata`.
    fn request_metadata_piece(&mut self, peer: u64) {
        let Some(extended_id) = self.peers.get(&peer).and_then(|slot| slot.conn.extension_ids.ut_metadata) else {
            return;
        };
        let Some(assembly) = self.metadata_assembly.as_mut() else { return };
        let Some(msg) = assembly.next_request(peer) else { return };
        if let Some(slot) = self.peers.get_mut(&peer) {
            slot.conn.queue_message(&Message::Extended { extended_id, payload: msg.encode() });
        }
    }

    fn install_metadata(&mut self, metadata: TorrentMetadata) {
        let total_pieces = metadata.lengths.total_pieces();
        if let Some(fs) = self.pending_storage_fs.take() {
            let mut storage = TorrentContentStorage::new(fs, metadata.files.clone(), metadata.lengths);
            match storage.allocate() {
                Ok(()) => self.storage = Some(storage),
                Err(e) => {
                    warn!(info_hash = %self.info_hash, error = %e, "failed to allocate storage for assembled metadata");
                    self.lifecycle = TorrentLifecycle::Error(e.to_string());
                    return;
                }
            }
        }
        self.piece_manager = Some(PieceManager::new(metadata.lengths, self.options.endgame_threshold_blocks));
        self.bitfield = Some(BitField::new(total_pieces));
        self.metadata = Some(metadata);
        self.lifecycle = TorrentLifecycle::Checking;
        info!(info_hash = %self.info_hash, "metadata installed");
    }

    fn process_completions(&mut self) -> Result<()> {
        Ok(())
    }

    fn verify_piece(&mut self, piece_index: u32) -> Result<()> {
        let Some(pm) = self.piece_manager.as_mut() else {
            return Ok(());
        };
        let Some(piece) = pm.take_completed(piece_index) else {
            return Ok(());
        };
        let digest = bt_sha1w::sha1(&piece.data);
        let expected = self
            .metadata
            .as_ref()
            .and_then(|m| m.piece_hashes.get(piece_index as usize).copied());

        if expected == Some(digest) {
            if let Some(storage) = self.storage.as_mut() {
                storage.write_verified_piece(piece_index, &piece.data)?;
            }
            if let Some(bf) = self.bitfield.as_mut() {
                bf.set(piece_index);
                self.bitfield_dirty = true;
            }
            if let Some(pm) = self.piece_manager.as_mut() {
                pm.mark_have_locally(piece_index);
            }
            for slot in self.peers.values_mut() {
                slot.conn.queue_message(&Message::Have(piece_index));
            }
            if self.is_complete() && !self.completed_announced {
                self.completed_announced = true;
                self.lifecycle = TorrentLifecycle::Seeding;
                info!(info_hash = %self.info_hash, "torrent complete");
            }
        } else {
            warn!(piece_index, "piece hash mismatch, resetting");
            for &peer in &piece.contributors {
                if let Some(slot) = self.peers.get_mut(&peer) {
                    slot.conn.bad_piece_strikes += 1;
                    if slot.conn.bad_piece_strikes >= self.options.bad_piece_ban_threshold {
                        self.peer_candidates.ban(slot.conn.addr);
                    }
                }
            }
            self.peers.retain(|_, slot| slot.conn.bad_piece_strikes < self.options.bad_piece_ban_threshold);
            if let Some(pm) = self.piece_manager.as_mut() {
                pm.reset_failed_piece(piece_index);
            }
            return Err(EngineError::PieceHashMismatch { piece_index });
        }
        Ok(())
    }

    fn generate_requests(&mut self, now: Instant) {
        let Some(pm) = self.piece_manager.as_mut() else { return };
        pm.reap_timed_out(now);

        for (&id, slot) in self.peers.iter_mut() {
            if slot.conn.peer_choking || slot.conn.phase != ConnectionPhase::Active {
                continue;
            }
            let mut budget = self.options.pipeline_depth.saturating_sub(pm.outstanding_for_peer(id));
            while budget > 0 {
                let Some(piece_index) = pm.pick_piece_for_peer(&slot.conn.peer_bitfield) else {
                    break;
                };
                let Some((index, begin, length)) =
                    pm.next_block_request(piece_index, id, self.options.request_timeout, now)
                else {
                    break;
                };
                slot.conn.queue_message(&Message::Request(RequestSpec { index, begin, length }));
                budget -= 1;
            }
        }
    }

    fn flush_outbound(&mut self) {
        for slot in self.peers.values_mut() {
            let bytes = slot.conn.take_outgoing();
            if !bytes.is_empty() {
                let _ = slot.socket.try_send(&bytes);
            }
        }
    }

    fn housekeeping(&mut self, now: Instant) {
        let idle_timeout = self.options.peer_idle_timeout;
        let dead: Vec<u64> = self
            .peers
            .iter()
            .filter(|(_, slot)| slot.conn.is_idle(idle_timeout))
            .map(|(&id, _)| id)
            .collect();
        for id in dead {
            self.disconnect_peer(id);
        }
        self.send_pex_updates(now);
    }

    /// Sends each peer whose `PexSchedule` is due a PEX message listing the
    /// other peers we're currently connected to (spec §4.10: bidirectional
    /// exchange, capped at once per 60s per peer).
    fn send_pex_updates(&mut self, now: Instant) {
        let due: Vec<u64> = self.peers.iter().filter(|(_, slot)| slot.pex.due(now)).map(|(&id, _)| id).collect();
        if due.is_empty() {
            return;
        }
        let all_addrs: Vec<(u64, SocketAddr)> = self.peers.iter().map(|(&id, slot)| (id, slot.conn.addr)).collect();
        for id in due {
            let Some(extended_id) = self.peers.get(&id).and_then(|slot| slot.conn.extension_ids.ut_pex) else {
                continue;
            };
            let added: Vec<SocketAddr> =
                all_addrs.iter().filter(|(other, _)| *other != id).map(|(_, addr)| *addr).collect();
            let msg = PexMessage { added, dropped: Vec::new() };
            if let Some(slot) = self.peers.get_mut(&id) {
                slot.conn.queue_message(&Message::Extended { extended_id, payload: msg.encode() });
                slot.pex.mark_sent(now);
            }
        }
    }

    fn disconnect_peer(&mut self, id: u64) {
        if let Some(mut slot) = self.peers.remove(&id) {
            slot.socket.shutdown();
            if let Some(pm) = self.piece_manager.as_mut() {
                pm.release_peer(id);
            }
            if let Some(assembly) = self.metadata_assembly.as_mut() {
                assembly.release_peer(id);
            }
            self.peer_candidates.mark_disconnected(slot.conn.addr);
        }
    }

    pub fn pause(&mut self) {
        for (_, mut slot) in self.peers.drain() {
            slot.socket.shutdown();
        }
        self.lifecycle = TorrentLifecycle::Paused;
    }

    pub fn resume(&mut self) {
        if self.lifecycle == TorrentLifecycle::Paused {
            self.lifecycle = if self.is_complete() {
                TorrentLifecycle::Seeding
            } else {
                TorrentLifecycle::Downloading
            };
        }
    }
}
