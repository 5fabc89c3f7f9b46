use std::net::{SocketAddr, UdpSocket};
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use rand::RngCore;
use tracing::debug;

use crate::{decode_compact_ipv4_peers, AnnounceEvent, AnnounceRequest, AnnounceResponse, TrackerError};

const PROTOCOL_ID: u64 = 0x41727101980;
const ACTION_CONNECT: u32 = 0;
const ACTION_ANNOUNCE: u32 = 1;
const ACTION_ERROR: u32 = 3;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const ANNOUNCE_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECTION_ID_TTL: Duration = Duration::from_secs(60);

pub struct UdpTrackerClient {
    addr: SocketAddr,
    cached_connection: Option<(u64, Instant)>,
}

impl UdpTrackerClient {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            cached_connection: None,
        }
    }

    pub fn announce(&mut self, req: &AnnounceRequest) -> Result<AnnounceResponse, TrackerError> {
        let socket = UdpSocket::bind("0.0.0.0:0").map_err(|e| TrackerError::Transient(e.to_string()))?;
        socket
            .connect(self.addr)
            .map_err(|e| TrackerError::Transient(e.to_string()))?;

        let connection_id = self.connection_id(&socket)?;
        let txid = rand::rng().next_u32();

        let mut packet = [0u8; 98];
        BigEndian::write_u64(&mut packet[0..8], connection_id);
        BigEndian::write_u32(&mut packet[8..12], ACTION_ANNOUNCE);
        BigEndian::write_u32(&mut packet[12..16], txid);
        packet[16..36].copy_from_slice(req.info_hash.as_bytes());
        packet[36..56].copy_from_slice(&req.peer_id);
        BigEndian::write_u64(&mut packet[56..64], req.downloaded);
        BigEndian::write_u64(&mut packet[64..72], req.left);
        BigEndian::write_u64(&mut packet[72..80], req.uploaded);
        BigEndian::write_u32(&mut packet[80..84], event_code(req.event));
        BigEndian::write_u32(&mut packet[84..88], 0); // ip, 0 = use sender's
        BigEndian::write_u32(&mut packet[88..92], req.key);
        BigEndian::write_i32(&mut packet[92..96], req.num_want.unwrap_or(-1));
        BigEndian::write_u16(&mut packet[96..98], req.port);

        socket
            .set_read_timeout(Some(ANNOUNCE_TIMEOUT))
            .map_err(|e| TrackerError::Transient(e.to_string()))?;
        socket
            .send(&packet)
            .map_err(|e| TrackerError::Transient(e.to_string()))?;

        let mut buf = [0u8; 2048];
        let n = socket.recv(&mut buf).map_err(|e| TrackerError::Transient(e.to_string()))?;
        parse_announce_reply(&buf[..n], txid)
    }

    fn connection_id(&mut self, socket: &UdpSocket) -> Result<u64, TrackerError> {
        if let Some((id, fetched_at)) = self.cached_connection {
            if fetched_at.elapsed() < CONNECTION_ID_TTL {
                return Ok(id);
            }
        }
        let txid = rand::rng().next_u32();
        let mut req = [0u8; 16];
        BigEndian::write_u64(&mut req[0..8], PROTOCOL_ID);
        BigEndian::write_u32(&mut req[8..12], ACTION_CONNECT);
        BigEndian::write_u32(&mut req[12..16], txid);

        socket
            .set_read_timeout(Some(CONNECT_TIMEOUT))
            .map_err(|e| TrackerError::Transient(e.to_string()))?;
        socket.send(&req).map_err(|e| TrackerError::Transient(e.to_string()))?;

        let mut buf = [0u8; 16];
        let n = socket.recv(&mut buf).map_err(|e| TrackerError::Transient(e.to_string()))?;
        if n < 16 {
            return Err(TrackerError::Transient("short connect response".into()));
        }
        let action = BigEndian::read_u32(&buf[0..4]);
        let recv_txid = BigEndian::read_u32(&buf[4..8]);
        if recv_txid != txid {
            return Err(TrackerError::Transient("transaction id mismatch".into()));
        }
        if action != ACTION_CONNECT {
            return Err(TrackerError::Transient(format!("unexpected action {action}")));
        }
        let connection_id = BigEndian::read_u64(&buf[8..16]);
        self.cached_connection = Some((connection_id, Instant::now()));
        debug!(connection_id, "udp tracker connected");
        Ok(connection_id)
    }
}

fn event_code(event: AnnounceEvent) -> u32 {
    match event {
        AnnounceEvent::None => 0,
        AnnounceEvent::Completed => 1,
        AnnounceEvent::Started => 2,
        AnnounceEvent::Stopped => 3,
    }
}

fn parse_announce_reply(buf: &[u8], expected_txid: u32) -> Result<AnnounceResponse, TrackerError> {
    if buf.len() < 8 {
        return Err(TrackerError::Transient("short announce reply".into()));
    }
    let action = BigEndian::read_u32(&buf[0..4]);
    let txid = BigEndian::read_u32(&buf[4..8]);
    if txid != expected_txid {
        return Err(TrackerError::Transient("transaction id mismatch".into()));
    }
    if action == ACTION_ERROR {
        let msg = String::from_utf8_lossy(&buf[8..]).into_owned();
        return Err(TrackerError::Permanent(msg));
    }
    if action != ACTION_ANNOUNCE {
        return Err(TrackerError::Transient(format!("unexpected action {action}")));
    }
    if buf.len() < 20 {
        return Err(TrackerError::Transient("truncated announce reply".into()));
    }
    let interval_seconds = BigEndian::read_u32(&buf[8..12]) as u64;
    let incomplete = BigEndian::read_u32(&buf[12..16]);
    let complete = BigEndian::read_u32(&buf[16..20]);
    let peers = decode_compact_ipv4_peers(&buf[20..]);
    Ok(AnnounceResponse {
        interval_seconds,
        min_interval_seconds: None,
        complete: Some(complete),
        incomplete: Some(incomplete),
        peers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_announce_reply() {
        let mut buf = vec![0u8; 20 + 6];
        BigEndian::write_u32(&mut buf[0..4], ACTION_ANNOUNCE);
        BigEndian::write_u32(&mut buf[4..8], 42);
        BigEndian::write_u32(&mut buf[8..12], 1800);
        BigEndian::write_u32(&mut buf[12..16], 3);
        BigEndian::write_u32(&mut buf[16..20], 7);
        buf[20..24].copy_from_slice(&[10, 0, 0, 1]);
        BigEndian::write_u16(&mut buf[24..26], 6881);

        let resp = parse_announce_reply(&buf, 42).unwrap();
        assert_eq!(resp.interval_seconds, 1800);
        assert_eq!(resp.incomplete, Some(3));
        assert_eq!(resp.complete, Some(7));
        assert_eq!(resp.peers.len(), 1);
        assert_eq!(resp.peers[0].port(), 6881);
    }

    #[test]
    fn rejects_mismatched_txid() {
        let mut buf = vec![0u8; 20];
        BigEndian::write_u32(&mut buf[0..4], ACTION_ANNOUNCE);
        BigEndian::write_u32(&mut buf[4..8], 1);
        assert!(matches!(
            parse_announce_reply(&buf, 2),
            Err(TrackerError::Transient(_))
        ));
    }

    #[test]
    fn error_action_carries_utf8_message() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&ACTION_ERROR.to_be_bytes());
        buf.extend_from_slice(&5u32.to_be_bytes());
        buf.extend_from_slice(b"nope");
        let err = parse_announce_reply(&buf, 5).unwrap_err();
        assert!(matches!(err, TrackerError::Permanent(ref m) if m == "nope"));
    }
}
