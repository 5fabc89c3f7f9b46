//! Peer-candidate queue fed by tracker announces and PEX messages (spec
//! §4.10): dedup against known/connected/banned sets before a candidate is
//! handed to the connection attempt loop.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Per-peer PEX message cadence: spec caps it at "≤ once per 60s per peer".
pub const PEX_MIN_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
pub struct PeerCandidateQueue {
    known: HashSet<SocketAddr>,
    banned: HashSet<SocketAddr>,
    queue: Vec<SocketAddr>,
}

impl PeerCandidateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ban(&mut self, addr: SocketAddr) {
        self.banned.insert(addr);
        self.queue.retain(|a| *a != addr);
    }

    pub fn mark_connected(&mut self, addr: SocketAddr) {
        self.known.insert(addr);
        self.queue.retain(|a| *a != addr);
    }

    pub fn mark_disconnected(&mut self, addr: SocketAddr) {
        self.known.remove(&addr);
    }

    /// Offers addresses discovered via tracker announce, PEX `added`, or a
    /// magnet's fallback peer list. Duplicates against known/connected/
    /// banned sets and the queue itself are silently dropped.
    pub fn offer(&mut self, addrs: impl IntoIterator<Item = SocketAddr>) {
        for addr in addrs {
            if self.banned.contains(&addr) || self.known.contains(&addr) {
                continue;
            }
            if !self.queue.contains(&addr) {
                self.queue.push(addr);
            }
        }
    }

    /// Applies a PEX `dropped` list: peers the sender no longer sees. This
    /// only removes them from our candidate queue, not from `known` — we
    /// may still be connected to one directly.
    pub fn withdraw(&mut self, addrs: impl IntoIterator<Item = SocketAddr>) {
        let dropped: HashSet<_> = addrs.into_iter().collect();
        self.queue.retain(|a| !dropped.contains(a));
    }

    pub fn pop_next(&mut self) -> Option<SocketAddr> {
        self.queue.pop()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Tracks when a peer was last sent (or may next send) a PEX message, so
/// the torrent can enforce the 60s-per-peer cadence from both directions.
pub struct PexSchedule {
    last_sent: Option<Instant>,
}

impl Default for PexSchedule {
    fn default() -> Self {
        Self { last_sent: None }
    }
}

impl PexSchedule {
    pub fn due(&self, now: Instant) -> bool {
        self.last_sent.map_or(true, |t| now.duration_since(t) >= PEX_MIN_INTERVAL)
    }

    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn offer_deduplicates_against_known_and_banned() {
        let mut q = PeerCandidateQueue::new();
        q.mark_connected(addr(1));
        q.ban(addr(2));
        q.offer([addr(1), addr(2), addr(3)]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_next(), Some(addr(3)));
    }

    #[test]
    fn withdraw_removes_from_queue_only() {
        let mut q = PeerCandidateQueue::new();
        q.offer([addr(1), addr(2)]);
        q.withdraw([addr(1)]);
        assert_eq!(q.len(), 1);
        assert_eq!(q.pop_next(), Some(addr(2)));
    }

    #[test]
    fn schedule_is_due_until_marked_sent() {
        let mut sched = PexSchedule::default();
        let now = Instant::now();
        assert!(sched.due(now));
        sched.mark_sent(now);
        assert!(!sched.due(now));
    }
}
