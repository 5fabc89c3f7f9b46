use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use bt_bencode::Value;

use crate::extended::ExtendedError;

/// BEP 11 compact peer exchange payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PexMessage {
    pub added: Vec<SocketAddr>,
    pub dropped: Vec<SocketAddr>,
}

impl PexMessage {
    pub fn encode(&self) -> Vec<u8> {
        let (added4, added6) = split_compact(&self.added);
        let (dropped4, dropped6) = split_compact(&self.dropped);
        let mut entries = Vec::new();
        if !added4.is_empty() {
            entries.push((b"added".to_vec(), Value::Bytes(added4)));
        }
        if !added6.is_empty() {
            entries.push((b"added6".to_vec(), Value::Bytes(added6)));
        }
        if !dropped4.is_empty() {
            entries.push((b"dropped".to_vec(), Value::Bytes(dropped4)));
        }
        if !dropped6.is_empty() {
            entries.push((b"dropped6".to_vec(), Value::Bytes(dropped6)));
        }
        bt_bencode::encode(&Value::Dict(entries))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ExtendedError> {
        let value = bt_bencode::decode(buf)?;
        let mut added = Vec::new();
        if let Some(b) = value.get(b"added").and_then(Value::as_bytes) {
            added.extend(decode_compact_v4(b));
        }
        if let Some(b) = value.get(b"added6").and_then(Value::as_bytes) {
            added.extend(decode_compact_v6(b));
        }
        let mut dropped = Vec::new();
        if let Some(b) = value.get(b"dropped").and_then(Value::as_bytes) {
            dropped.extend(decode_compact_v4(b));
        }
        if let Some(b) = value.get(b"dropped6").and_then(Value::as_bytes) {
            dropped.extend(decode_compact_v6(b));
        }
        Ok(Self { added, dropped })
    }
}

fn split_compact(addrs: &[SocketAddr]) -> (Vec<u8>, Vec<u8>) {
    let mut v4 = Vec::new();
    let mut v6 = Vec::new();
    for addr in addrs {
        match addr {
            SocketAddr::V4(a) => {
                v4.extend_from_slice(&a.ip().octets());
                v4.extend_from_slice(&a.port().to_be_bytes());
            }
            SocketAddr::V6(a) => {
                v6.extend_from_slice(&a.ip().octets());
                v6.extend_from_slice(&a.port().to_be_bytes());
            }
        }
    }
    (v4, v6)
}

pub fn decode_compact_v4(bytes: &[u8]) -> Vec<SocketAddr> {
    bytes
        .chunks_exact(6)
        .map(|c| {
            let ip = Ipv4Addr::new(c[0], c[1], c[2], c[3]);
            let port = u16::from_be_bytes([c[4], c[5]]);
            SocketAddr::V4(SocketAddrV4::new(ip, port))
        })
        .collect()
}

pub fn decode_compact_v6(bytes: &[u8]) -> Vec<SocketAddr> {
    bytes
        .chunks_exact(18)
        .map(|c| {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&c[0..16]);
            let ip = Ipv6Addr::from(octets);
            let port = u16::from_be_bytes([c[16], c[17]]);
            SocketAddr::V6(SocketAddrV6::new(ip, port, 0, 0))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_v4_and_v6() {
        let msg = PexMessage {
            added: vec![
                "1.2.3.4:6881".parse().unwrap(),
                "[::1]:6881".parse().unwrap(),
            ],
            dropped: vec!["5.6.7.8:51413".parse().unwrap()],
        };
        let encoded = msg.encode();
        let back = PexMessage::decode(&encoded).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn empty_message_encodes_to_empty_dict() {
        let msg = PexMessage::default();
        assert_eq!(msg.encode(), b"de");
    }
}
