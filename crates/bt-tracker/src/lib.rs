//! HTTP and UDP (BEP 15) tracker clients.
//!
//! Both clients are blocking: the engine core never awaits network I/O
//! itself (spec §5, §9 — "no async keyword need appear in the core's
//! API"), so a caller that wants non-blocking behavior is expected to run
//! `announce()` on a worker thread and post the result back, the same way
//! the storage and socket adapters do.

pub mod http;
pub mod stats;
pub mod udp;

pub use stats::{backoff_delay, clamp_interval, TrackerStats, TrackerStatus};

use std::net::SocketAddr;

use bt_core::InfoHash;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnnounceEvent {
    None,
    Started,
    Stopped,
    Completed,
}

#[derive(Clone, Debug)]
pub struct AnnounceRequest {
    pub info_hash: InfoHash,
    pub peer_id: [u8; 20],
    pub port: u16,
    pub uploaded: u64,
    pub downloaded: u64,
    pub left: u64,
    pub event: AnnounceEvent,
    pub num_want: Option<i32>,
    pub key: u32,
}

#[derive(Clone, Debug, Default)]
pub struct AnnounceResponse {
    pub interval_seconds: u64,
    pub min_interval_seconds: Option<u64>,
    pub complete: Option<u32>,
    pub incomplete: Option<u32>,
    pub peers: Vec<SocketAddr>,
}

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {
    #[error("transient tracker error: {0}")]
    Transient(String),
    #[error("permanent tracker error: {0}")]
    Permanent(String),
}

pub(crate) fn decode_compact_ipv4_peers(bytes: &[u8]) -> Vec<SocketAddr> {
    bytes
        .chunks_exact(6)
        .map(|c| {
            let ip = std::net::Ipv4Addr::new(c[0], c[1], c[2], c[3]);
            let port = u16::from_be_bytes([c[4], c[5]]);
            SocketAddr::from((ip, port))
        })
        .collect()
}
