//! Persists per-torrent resume state keyed by infohash (spec §3, §6):
//! `session:<hex-infohash>:{bitfield|metadata|progress|peers}`.

use std::net::SocketAddr;
use std::sync::Arc;

use bt_bencode::Value;
use bt_core::{BitField, InfoHash};
use tracing::debug;

use crate::adapters::SessionStore;
use crate::error::Result;

#[derive(Clone, Debug, Default)]
pub struct Progress {
    pub downloaded: u64,
    pub uploaded: u64,
    pub added_at: u64,
    pub status: String,
}

fn key(info_hash: &InfoHash, suffix: &str) -> String {
    format!("session:{}:{suffix}", info_hash.to_hex())
}

pub struct SessionManager<S: SessionStore> {
    store: Arc<S>,
}

impl<S: SessionStore> SessionManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn save_bitfield(&self, info_hash: &InfoHash, bits: &BitField) -> Result<()> {
        self.store.set(&key(info_hash, "bitfield"), bits.as_bytes())?;
        Ok(())
    }

    pub fn load_bitfield(&self, info_hash: &InfoHash, piece_count: u32) -> Result<Option<BitField>> {
        let Some(bytes) = self.store.get(&key(info_hash, "bitfield"))? else {
            return Ok(None);
        };
        Ok(BitField::from_bytes(&bytes, piece_count).ok())
    }

    pub fn save_metadata(&self, info_hash: &InfoHash, raw_info: &[u8]) -> Result<()> {
        self.store.set(&key(info_hash, "metadata"), raw_info)?;
        Ok(())
    }

    pub fn load_metadata(&self, info_hash: &InfoHash) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get(&key(info_hash, "metadata"))?)
    }

    pub fn save_progress(&self, info_hash: &InfoHash, progress: &Progress) -> Result<()> {
        let value = Value::Dict(vec![
            (b"downloaded".to_vec(), Value::Integer(progress.downloaded as i64)),
            (b"uploaded".to_vec(), Value::Integer(progress.uploaded as i64)),
            (b"addedAt".to_vec(), Value::Integer(progress.added_at as i64)),
            (b"status".to_vec(), Value::Bytes(progress.status.clone().into_bytes())),
        ]);
        self.store.set(&key(info_hash, "progress"), &bt_bencode::encode(&value))?;
        Ok(())
    }

    pub fn load_progress(&self, info_hash: &InfoHash) -> Result<Option<Progress>> {
        let Some(bytes) = self.store.get(&key(info_hash, "progress"))? else {
            return Ok(None);
        };
        let Ok(value) = bt_bencode::decode(&bytes) else {
            return Ok(None);
        };
        Ok(Some(Progress {
            downloaded: value.get(b"downloaded").and_then(Value::as_integer).unwrap_or(0) as u64,
            uploaded: value.get(b"uploaded").and_then(Value::as_integer).unwrap_or(0) as u64,
            added_at: value.get(b"addedAt").and_then(Value::as_integer).unwrap_or(0) as u64,
            status: value
                .get(b"status")
                .and_then(Value::as_bytes)
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default(),
        }))
    }

    /// Compact IPv4/IPv6 list with last-seen timestamps (spec §6): each
    /// entry is a one-byte family tag, the address, the port, then an
    /// 8-byte big-endian unix-seconds timestamp.
    pub fn save_peers(&self, info_hash: &InfoHash, peers: &[(SocketAddr, u64)]) -> Result<()> {
        let mut bytes = Vec::new();
        for (addr, last_seen) in peers {
            match addr {
                SocketAddr::V4(a) => {
                    bytes.push(4);
                    bytes.extend_from_slice(&a.ip().octets());
                    bytes.extend_from_slice(&a.port().to_be_bytes());
                }
                SocketAddr::V6(a) => {
                    bytes.push(6);
                    bytes.extend_from_slice(&a.ip().octets());
                    bytes.extend_from_slice(&a.port().to_be_bytes());
                }
            }
            bytes.extend_from_slice(&last_seen.to_be_bytes());
        }
        self.store.set(&key(info_hash, "peers"), &bytes)?;
        Ok(())
    }

    pub fn load_peers(&self, info_hash: &InfoHash) -> Result<Vec<(SocketAddr, u64)>> {
        let Some(bytes) = self.store.get(&key(info_hash, "peers"))? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        let mut cursor = &bytes[..];
        loop {
            let Some(&family) = cursor.first() else { break };
            let entry_len = match family {
                4 => 1 + 4 + 2 + 8,
                6 => 1 + 16 + 2 + 8,
                _ => break,
            };
            if cursor.len() < entry_len {
                break;
            }
            let rest = &cursor[1..];
            let addr = match family {
                4 => {
                    let ip = std::net::Ipv4Addr::new(rest[0], rest[1], rest[2], rest[3]);
                    let port = u16::from_be_bytes([rest[4], rest[5]]);
                    SocketAddr::from((ip, port))
                }
                _ => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(&rest[0..16]);
                    let ip = std::net::Ipv6Addr::from(octets);
                    let port = u16::from_be_bytes([rest[16], rest[17]]);
                    SocketAddr::from((ip, port))
                }
            };
            let ts_offset = entry_len - 8;
            let mut ts_bytes = [0u8; 8];
            ts_bytes.copy_from_slice(&cursor[ts_offset..entry_len]);
            out.push((addr, u64::from_be_bytes(ts_bytes)));
            cursor = &cursor[entry_len..];
        }
        Ok(out)
    }

    pub fn delete_all(&self, info_hash: &InfoHash) -> Result<()> {
        for suffix in ["bitfield", "metadata", "progress", "peers"] {
            self.store.delete(&key(info_hash, suffix))?;
        }
        Ok(())
    }

    /// Enumerates every infohash with at least one session record, for
    /// `BtEngine::restore_session`.
    pub fn known_info_hashes(&self) -> Result<Vec<InfoHash>> {
        let keys = self.store.keys_with_prefix("session:")?;
        let mut hashes = Vec::new();
        for k in keys {
            if let Some(hex) = k.split(':').nth(1) {
                if let Some(ih) = InfoHash::from_hex(hex) {
                    if !hashes.contains(&ih) {
                        hashes.push(ih);
                    }
                }
            }
        }
        debug!(count = hashes.len(), "discovered persisted torrents");
        Ok(hashes)
    }
}
