use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerStatus {
    Idle,
    Announcing,
    Live,
    Error,
}

/// Observability surface shared by both tracker clients (spec §4.8).
#[derive(Clone, Debug)]
pub struct TrackerStats {
    pub status: TrackerStatus,
    pub interval: Duration,
    pub seeders: u32,
    pub leechers: u32,
    pub last_peers_received: u32,
    pub unique_peers_discovered: u32,
    pub last_error: Option<String>,
    pub next_announce: Option<Instant>,
    pub consecutive_failures: u32,
}

impl Default for TrackerStats {
    fn default() -> Self {
        Self {
            status: TrackerStatus::Idle,
            interval: Duration::from_secs(1800),
            seeders: 0,
            leechers: 0,
            last_peers_received: 0,
            unique_peers_discovered: 0,
            last_error: None,
            next_announce: None,
            consecutive_failures: 0,
        }
    }
}

/// `delay = min(5 * 2^consecutive_failures, 300)` seconds (spec §4.8).
pub fn backoff_delay(consecutive_failures: u32) -> Duration {
    let secs = 5u64.saturating_mul(1u64 << consecutive_failures.min(6));
    Duration::from_secs(secs.min(300))
}

/// Clamp a tracker-provided interval to `[60, 3600]` seconds (spec §6).
pub fn clamp_interval(seconds: u64) -> Duration {
    Duration::from_secs(seconds.clamp(60, 3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps_at_300() {
        assert_eq!(backoff_delay(0), Duration::from_secs(5));
        assert_eq!(backoff_delay(1), Duration::from_secs(10));
        assert_eq!(backoff_delay(2), Duration::from_secs(20));
        assert_eq!(backoff_delay(10), Duration::from_secs(300));
    }

    #[test]
    fn interval_is_clamped() {
        assert_eq!(clamp_interval(10), Duration::from_secs(60));
        assert_eq!(clamp_interval(10_000), Duration::from_secs(3600));
        assert_eq!(clamp_interval(900), Duration::from_secs(900));
    }
}
