//! Per-peer wire state machine (spec §4.4). `Torrent` owns one of these per
//! connected peer and drives it forward each tick by feeding it bytes read
//! from the peer's `PeerSocket` and pulling bytes to write back out.

use std::net::SocketAddr;
use std::time::Instant;

use bt_core::{BitField, InfoHash, PeerId};
use bt_peer_protocol::{
    ChunkedBuffer, ExtendedHandshake, Handshake, Message, ParseOutcome, PeerExtensionIds,
    RequestSpec,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionPhase {
    Connecting,
    HandshakeSent,
    HandshakeReceived,
    BitfieldExchanged,
    Active,
    Closed,
}

pub struct PeerConnection {
    pub id: u64,
    pub addr: SocketAddr,
    pub phase: ConnectionPhase,
    pub peer_id: Option<PeerId>,
    pub peer_choking: bool,
    pub peer_interested: bool,
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_bitfield: BitField,
    pub extension_ids: PeerExtensionIds,
    pub last_activity: Instant,
    pub bad_piece_strikes: u32,
    pub bytes_downloaded: u64,
    pub bytes_uploaded: u64,

    recv_buf: ChunkedBuffer,
    send_buf: Vec<u8>,
    our_info_hash: InfoHash,
    our_peer_id: PeerId,
}

pub enum PeerEvent {
    Choked,
    Unchoked,
    Interested,
    NotInterested,
    BitfieldReceived,
    Have(u32),
    BlockReceived { piece_index: u32, begin: u32, block: Vec<u8> },
    BlockRequested(RequestSpec),
    Cancel(RequestSpec),
    ExtendedHandshake(ExtendedHandshake),
    UtMetadata(bt_peer_protocol::UtMetadataMessage),
    Pex(bt_peer_protocol::PexMessage),
    ProtocolError(String),
}

impl PeerConnection {
    pub fn new_outbound(
        id: u64,
        addr: SocketAddr,
        our_info_hash: InfoHash,
        our_peer_id: PeerId,
        total_pieces: u32,
    ) -> Self {
        Self {
            id,
            addr,
            phase: ConnectionPhase::Connecting,
            peer_id: None,
            peer_choking: true,
            peer_interested: false,
            am_choking: true,
            am_interested: false,
            peer_bitfield: BitField::new(total_pieces),
            extension_ids: PeerExtensionIds::default(),
            last_activity: Instant::now(),
            bad_piece_strikes: 0,
            bytes_downloaded: 0,
            bytes_uploaded: 0,
            recv_buf: ChunkedBuffer::new(),
            send_buf: Vec::new(),
            our_info_hash,
            our_peer_id,
        }
    }

    /// Wraps a socket an accept() handed us. The wire state machine is
    /// identical either way; only who connects first differs.
    pub fn new_inbound(
        id: u64,
        addr: SocketAddr,
        our_info_hash: InfoHash,
        our_peer_id: PeerId,
        total_pieces: u32,
    ) -> Self {
        Self::new_outbound(id, addr, our_info_hash, our_peer_id, total_pieces)
    }

    pub fn begin_handshake(&mut self) {
        let hs = Handshake {
            info_hash: self.our_info_hash,
            peer_id: self.our_peer_id,
            supports_extended: true,
        };
        self.send_buf.extend_from_slice(&hs.serialize());
        self.phase = ConnectionPhase::HandshakeSent;
    }

    pub fn take_outgoing(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.send_buf)
    }

    pub fn queue_message(&mut self, msg: &Message) {
        self.send_buf.extend_from_slice(&bt_peer_protocol::serialize(msg));
    }

    pub fn feed_bytes(&mut self, bytes: &[u8]) -> Vec<PeerEvent> {
        self.last_activity = Instant::now();
        self.recv_buf.append(bytes);
        let mut events = Vec::new();

        if matches!(
            self.phase,
            ConnectionPhase::Connecting | ConnectionPhase::HandshakeSent
        ) {
            let Some(hs_bytes) = self.recv_buf.peek_bytes(0, bt_peer_protocol::HANDSHAKE_LEN) else {
                return events;
            };
            match Handshake::deserialize(hs_bytes) {
                Ok(hs) => {
                    if hs.info_hash != self.our_info_hash {
                        events.push(PeerEvent::ProtocolError("infohash mismatch".into()));
                        self.phase = ConnectionPhase::Closed;
                        return events;
                    }
                    self.recv_buf.discard(bt_peer_protocol::HANDSHAKE_LEN);
                    self.peer_id = Some(hs.peer_id);
                    self.phase = ConnectionPhase::HandshakeReceived;
                    if hs.supports_extended {
                        self.queue_extended_handshake();
                    }
                }
                Err(e) => {
                    events.push(PeerEvent::ProtocolError(e.to_string()));
                    self.phase = ConnectionPhase::Closed;
                    return events;
                }
            }
        }

        loop {
            match bt_peer_protocol::try_parse_message(&mut self.recv_buf) {
                Ok(ParseOutcome::NeedMoreData) => break,
                Ok(ParseOutcome::Message(msg)) => {
                    if let Some(event) = self.apply_message(msg) {
                        events.push(event);
                    }
                }
                Err(e) => {
                    events.push(PeerEvent::ProtocolError(e.to_string()));
                    self.phase = ConnectionPhase::Closed;
                    break;
                }
            }
        }
        events
    }

    fn queue_extended_handshake(&mut self) {
        let hs = ExtendedHandshake::ours(None);
        self.send_buf.extend_from_slice(&bt_peer_protocol::serialize(&Message::Extended {
            extended_id: 0,
            payload: hs.encode(),
        }));
    }

    fn apply_message(&mut self, msg: Message) -> Option<PeerEvent> {
        if self.phase == ConnectionPhase::HandshakeReceived {
            self.phase = ConnectionPhase::BitfieldExchanged;
        }
        let event = self.apply_message_inner(msg);
        // A BITFIELD is optional (BEP 3): a peer with nothing yet is allowed
        // to go straight to other messages, so the first post-handshake
        // message of any kind closes out the exchange window.
        if self.phase == ConnectionPhase::BitfieldExchanged {
            self.phase = ConnectionPhase::Active;
        }
        event
    }

    fn apply_message_inner(&mut self, msg: Message) -> Option<PeerEvent> {
        match msg {
            Message::KeepAlive => None,
            Message::Choke => {
                self.peer_choking = true;
                Some(PeerEvent::Choked)
            }
            Message::Unchoke => {
                self.peer_choking = false;
                Some(PeerEvent::Unchoked)
            }
            Message::Interested => {
                self.peer_interested = true;
                Some(PeerEvent::Interested)
            }
            Message::NotInterested => {
                self.peer_interested = false;
                Some(PeerEvent::NotInterested)
            }
            Message::Have(index) => {
                if index >= self.peer_bitfield.piece_count() {
                    self.phase = ConnectionPhase::Closed;
                    return Some(PeerEvent::ProtocolError(format!(
                        "HAVE index {index} out of range (piece count {})",
                        self.peer_bitfield.piece_count()
                    )));
                }
                self.peer_bitfield.set(index);
                Some(PeerEvent::Have(index))
            }
            Message::Bitfield(bytes) => {
                match BitField::from_bytes(&bytes, self.peer_bitfield.piece_count()) {
                    Ok(bf) => {
                        self.peer_bitfield = bf;
                        self.phase = ConnectionPhase::Active;
                        Some(PeerEvent::BitfieldReceived)
                    }
                    Err(e) => Some(PeerEvent::ProtocolError(e.to_string())),
                }
            }
            Message::Request(spec) => Some(PeerEvent::BlockRequested(spec)),
            Message::Cancel(spec) => Some(PeerEvent::Cancel(spec)),
            Message::Piece { index, begin, block } => {
                self.bytes_downloaded += block.len() as u64;
                Some(PeerEvent::BlockReceived {
                    piece_index: index,
                    begin,
                    block,
                })
            }
            Message::Extended { extended_id, payload } => self.apply_extended(extended_id, payload),
            Message::Unknown(_) => None,
        }
    }

    fn apply_extended(&mut self, extended_id: u8, payload: Vec<u8>) -> Option<PeerEvent> {
        if extended_id == 0 {
            let hs = ExtendedHandshake::decode(&payload).ok()?;
            self.extension_ids = hs.m.clone();
            return Some(PeerEvent::ExtendedHandshake(hs));
        }
        if Some(extended_id) == self.extension_ids.ut_metadata {
            return bt_peer_protocol::UtMetadataMessage::decode(&payload)
                .ok()
                .map(PeerEvent::UtMetadata);
        }
        if Some(extended_id) == self.extension_ids.ut_pex {
            return bt_peer_protocol::PexMessage::decode(&payload).ok().map(PeerEvent::Pex);
        }
        None
    }

    pub fn is_idle(&self, timeout: std::time::Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }
}
