//! Minimal front end driving [`bt_engine::BtEngine`] against real sockets
//! and disk. Everything here is the adapter wiring the engine core
//! deliberately stays out of: accepting connections, dialing peers,
//! pacing the tick loop.

mod std_adapters;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use bt_core::InfoHash;
use bt_engine::{BtEngine, SessionOptions};

use std_adapters::{DirFileSystem, FileSessionStore, TcpPeerListener, TcpSocketFactory};

#[derive(Parser)]
#[command(version, author, about = "BitTorrent engine command-line driver")]
struct Opts {
    /// Path to a .torrent file. Mutually exclusive with --magnet.
    #[arg(long, conflicts_with = "magnet")]
    torrent: Option<PathBuf>,

    /// A magnet link. Mutually exclusive with --torrent.
    #[arg(long)]
    magnet: Option<String>,

    /// Directory the torrent's files are written into.
    #[arg(long, default_value = "./downloads")]
    data_dir: PathBuf,

    /// Directory session resume state (bitfields, metadata, progress) is
    /// persisted to between runs.
    #[arg(long, default_value = "./session")]
    session_dir: PathBuf,

    /// Address to accept incoming peer connections on.
    #[arg(long, default_value = "0.0.0.0:0")]
    listen: SocketAddr,

    /// A peer address to dial directly, e.g. when no tracker/DHT peer
    /// source is configured. May be repeated.
    #[arg(long = "peer")]
    peers: Vec<SocketAddr>,

    /// How often the tick loop runs.
    #[arg(long, value_parser = humantime_parse, default_value = "100ms")]
    tick_interval: Duration,

    /// Exit once the torrent finishes downloading instead of seeding
    /// indefinitely.
    #[arg(long)]
    exit_on_complete: bool,
}

fn humantime_parse(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (num, unit) = s.split_at(s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len()));
    let n: u64 = num.parse().map_err(|_| format!("invalid duration: {s}"))?;
    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "s" | "" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        other => Err(format!("unknown duration unit: {other}")),
    }
}

const STORAGE_ROOT_KEY: &str = "default";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();
    let fs = Arc::new(DirFileSystem::new(opts.data_dir.clone()));
    let store = Arc::new(FileSessionStore::new(opts.session_dir.clone()).context("opening session dir")?);
    let socket_factory = Arc::new(TcpSocketFactory);

    let mut engine: BtEngine<TcpSocketFactory, DirFileSystem, FileSessionStore> = BtEngine::new(
        socket_factory.clone(),
        store,
        SessionOptions {
            listen_port: opts.listen.port(),
            ..SessionOptions::default()
        },
    );
    engine.register_storage_root(STORAGE_ROOT_KEY, "default", fs);

    let restored = engine.restore_session().context("restoring prior session")?;
    info!(restored, "resumed torrents from prior session");

    let info_hash = if let Some(path) = &opts.torrent {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        engine
            .add_torrent_from_bytes(&bytes, STORAGE_ROOT_KEY)
            .context("adding torrent")?
    } else if let Some(magnet) = &opts.magnet {
        engine
            .add_torrent_from_magnet(magnet, STORAGE_ROOT_KEY)
            .context("adding magnet")?
    } else {
        anyhow::bail!("one of --torrent or --magnet is required");
    };

    info!(%info_hash, "added torrent, starting tick loop");

    let mut listener = TcpPeerListener::bind(opts.listen).context("binding listen socket")?;
    info!(addr = %listener.local_addr()?, "listening for incoming peers");

    for addr in &opts.peers {
        if let Some(torrent) = engine_connect(&mut engine, &info_hash, *addr, &socket_factory) {
            info!(peer = %addr, id = torrent, "dialed peer");
        }
    }

    run_loop(&mut engine, &info_hash, &mut listener, opts.tick_interval, opts.exit_on_complete)
}

fn engine_connect(
    engine: &mut BtEngine<TcpSocketFactory, DirFileSystem, FileSessionStore>,
    info_hash: &InfoHash,
    addr: SocketAddr,
    factory: &TcpSocketFactory,
) -> Option<u64> {
    engine
        .torrent_connect_peer(info_hash, factory, addr)
        .inspect_err(|e| error!(peer = %addr, error = %e, "failed to dial peer"))
        .ok()
}

fn run_loop(
    engine: &mut BtEngine<TcpSocketFactory, DirFileSystem, FileSessionStore>,
    info_hash: &InfoHash,
    listener: &mut TcpPeerListener,
    tick_interval: Duration,
    exit_on_complete: bool,
) -> Result<()> {
    loop {
        let tick_start = Instant::now();

        while let Some((socket, addr)) = listener.try_accept().context("accepting peer connection")? {
            if let Err(e) = engine.torrent_accept_peer(info_hash, socket, addr) {
                error!(peer = %addr, error = %e, "failed to accept peer");
            }
        }

        engine.tick_all(tick_start);

        if exit_on_complete {
            if let Some(torrent) = engine.get_torrent(info_hash) {
                if torrent.is_complete() {
                    info!(%info_hash, "download complete, exiting");
                    return Ok(());
                }
            }
        }

        let elapsed = tick_start.elapsed();
        if elapsed < tick_interval {
            std::thread::sleep(tick_interval - elapsed);
        }
    }
}
