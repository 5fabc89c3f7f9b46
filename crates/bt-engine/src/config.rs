use std::time::Duration;

/// Tunables spec.md leaves as "tuned constants ... a reimplementer should
/// expose them as configuration and choose defaults via benchmarking
/// rather than copying specific numbers" (spec §9 open question). The
/// values below are reasonable defaults, not load-bearing constants.
#[derive(Clone, Debug)]
pub struct TorrentOptions {
    /// Max outstanding REQUESTs per peer (spec §4.4: "typical 50-500").
    pub pipeline_depth: usize,
    /// Endgame triggers once total missing blocks across all active
    /// pieces drops below this (spec §4.5 example: 20).
    pub endgame_threshold_blocks: usize,
    /// A request not answered within this long reverts to `Missing`.
    pub request_timeout: Duration,
    /// Tick period driving `Torrent::tick` (spec §4.7 default: 100ms).
    pub tick_interval: Duration,
    /// Per-peer pending-bytes threshold before read backpressure kicks in.
    pub per_peer_read_high_watermark: usize,
    pub max_peers_per_torrent: usize,
    /// Peer disconnected after this many verified-bad pieces it contributed
    /// blocks to (spec §4.5 example: 3).
    pub bad_piece_ban_threshold: u32,
    pub keepalive_interval: Duration,
    pub peer_idle_timeout: Duration,
    /// Tit-for-tat choking is out of scope; instead unchoke every interested
    /// peer up to this many at a time (spec.md's fixed-policy substitute).
    pub max_unchoked_peers: usize,
}

impl Default for TorrentOptions {
    fn default() -> Self {
        Self {
            pipeline_depth: 128,
            endgame_threshold_blocks: 20,
            request_timeout: Duration::from_secs(30),
            tick_interval: Duration::from_millis(100),
            per_peer_read_high_watermark: 32 * 1024 * 1024,
            max_peers_per_torrent: 50,
            bad_piece_ban_threshold: 3,
            keepalive_interval: Duration::from_secs(120),
            peer_idle_timeout: Duration::from_secs(180),
            max_unchoked_peers: 8,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub listen_port: u16,
    pub torrent_defaults: TorrentOptions,
    /// Number of worker threads in the hasher adapter's pool (spec §5:
    /// "parallelism lives in the adapter").
    pub hasher_worker_threads: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            listen_port: 0,
            torrent_defaults: TorrentOptions::default(),
            hasher_worker_threads: 4,
        }
    }
}
