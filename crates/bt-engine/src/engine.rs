//! `BtEngine`: owns every torrent, the shared socket factory, session
//! store, and listen port (spec §4.15, §5 "shared resources").

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{info, instrument};

use bt_core::{InfoHash, MagnetLink, PeerId};

use crate::adapters::{FileSystem, SessionStore, SocketFactory};
use crate::config::SessionOptions;
use crate::error::{EngineError, Result};
use crate::session_manager::{Progress, SessionManager};
use crate::storage::content::TorrentContentStorage;
use crate::storage::root_manager::StorageRootManager;
use crate::torrent::{Torrent, TorrentLifecycle};

fn now_unix() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

/// Ties the per-torrent scheduler to the adapters it runs against. One
/// `BtEngine` per process; `SF` is the socket factory type, `FS` the
/// filesystem adapter type, `SS` the session store type.
pub struct BtEngine<SF: SocketFactory, FS: FileSystem, SS: SessionStore> {
    torrents: HashMap<InfoHash, Torrent<FS, SF::Socket>>,
    socket_factory: Arc<SF>,
    storage_roots: StorageRootManager<FS>,
    sessions: SessionManager<SS>,
    options: SessionOptions,
    our_peer_id: PeerId,
}

impl<SF: SocketFactory, FS: FileSystem, SS: SessionStore> BtEngine<SF, FS, SS> {
    pub fn new(socket_factory: Arc<SF>, session_store: Arc<SS>, options: SessionOptions) -> Self {
        Self {
            torrents: HashMap::new(),
            socket_factory,
            storage_roots: StorageRootManager::new(),
            sessions: SessionManager::new(session_store),
            our_peer_id: PeerId::generate("bt", [0, 1, 0, 0]),
            options,
        }
    }

    pub fn register_storage_root(&self, key: impl Into<String>, label: impl Into<String>, fs: Arc<FS>) {
        self.storage_roots.register_root(key, label, fs);
    }

    #[instrument(skip(self, torrent_bytes))]
    pub fn add_torrent_from_bytes(
        &mut self,
        torrent_bytes: &[u8],
        storage_root_key: impl Into<String>,
    ) -> Result<InfoHash> {
        let metadata = bt_core::metainfo::parse_torrent_file(torrent_bytes)?;
        let info_hash = metadata.info_hash;
        let fs = self.storage_roots_for(info_hash, storage_root_key)?;

        let mut storage = TorrentContentStorage::new(fs, metadata.files.clone(), metadata.lengths);
        storage.allocate()?;

        let mut torrent = Torrent::new_from_metadata(
            metadata.clone(),
            storage,
            self.our_peer_id,
            self.options.torrent_defaults.clone(),
        );
        if let Some(bits) = self.sessions.load_bitfield(&info_hash, metadata.lengths.total_pieces())? {
            torrent.restore_bitfield(bits);
        }
        self.sessions.save_metadata(&info_hash, &metadata.raw_info)?;
        info!(%info_hash, "torrent added");
        self.torrents.insert(info_hash, torrent);
        Ok(info_hash)
    }

    #[instrument(skip(self))]
    pub fn add_torrent_from_magnet(
        &mut self,
        magnet: &str,
        storage_root_key: impl Into<String>,
    ) -> Result<InfoHash> {
        let link = MagnetLink::parse(magnet)?;
        let info_hash = link.info_hash;
        // Metadata doesn't exist yet; resolving the storage root now and
        // handing it to the torrent lets `install_metadata` allocate files
        // as soon as it's assembled.
        let fs = self.storage_roots_for(info_hash, storage_root_key)?;
        let torrent = Torrent::new_from_magnet(info_hash, self.our_peer_id, self.options.torrent_defaults.clone(), fs);
        self.torrents.insert(info_hash, torrent);
        info!(%info_hash, "magnet torrent added, awaiting metadata");
        Ok(info_hash)
    }

    fn storage_roots_for(&self, info_hash: InfoHash, storage_root_key: impl Into<String>) -> Result<Arc<FS>> {
        self.storage_roots.assign(info_hash, storage_root_key);
        self.storage_roots.resolve(&info_hash)
    }

    pub fn remove_torrent(&mut self, info_hash: &InfoHash, delete_session: bool) -> Result<()> {
        if let Some(mut torrent) = self.torrents.remove(info_hash) {
            torrent.pause();
        }
        self.storage_roots.unassign(info_hash);
        if delete_session {
            self.sessions.delete_all(info_hash)?;
        }
        Ok(())
    }

    pub fn pause(&mut self, info_hash: &InfoHash) -> Result<()> {
        self.get_torrent_mut(info_hash)?.pause();
        Ok(())
    }

    pub fn resume(&mut self, info_hash: &InfoHash) -> Result<()> {
        self.get_torrent_mut(info_hash)?.resume();
        Ok(())
    }

    pub fn get_torrent(&self, info_hash: &InfoHash) -> Option<&Torrent<FS, SF::Socket>> {
        self.torrents.get(info_hash)
    }

    fn get_torrent_mut(&mut self, info_hash: &InfoHash) -> Result<&mut Torrent<FS, SF::Socket>> {
        self.torrents
            .get_mut(info_hash)
            .ok_or(EngineError::UnknownTorrent(*info_hash))
    }

    /// Dials `addr` as a new peer for the given torrent.
    pub fn torrent_connect_peer(&mut self, info_hash: &InfoHash, factory: &SF, addr: std::net::SocketAddr) -> Result<u64> {
        self.get_torrent_mut(info_hash)?.connect_peer(factory, addr)
    }

    /// Hands an already-accepted inbound socket to the torrent it belongs
    /// to. Callers demultiplex by infohash from the peer's handshake before
    /// calling this (a single listener is shared across every torrent).
    pub fn torrent_accept_peer(&mut self, info_hash: &InfoHash, socket: SF::Socket, addr: std::net::SocketAddr) -> Result<u64> {
        self.get_torrent_mut(info_hash)?.accept_peer(socket, addr)
    }

    /// Re-populates the torrent set from persisted session records after a
    /// restart. Returns the number of torrents restored.
    pub fn restore_session(&mut self) -> Result<usize> {
        let hashes = self.sessions.known_info_hashes()?;
        let mut restored = 0;
        for info_hash in hashes {
            if self.torrents.contains_key(&info_hash) {
                continue;
            }
            let Some(raw_info) = self.sessions.load_metadata(&info_hash)? else {
                continue;
            };
            let metadata = bt_core::metainfo::install_metadata_from_info_bytes(info_hash, raw_info)?;
            let Ok(fs) = self.storage_roots.resolve(&info_hash) else {
                continue;
            };
            let mut storage = TorrentContentStorage::new(fs, metadata.files.clone(), metadata.lengths);
            storage.allocate()?;
            let mut torrent = Torrent::new_from_metadata(
                metadata.clone(),
                storage,
                self.our_peer_id,
                self.options.torrent_defaults.clone(),
            );
            if let Some(bits) = self.sessions.load_bitfield(&info_hash, metadata.lengths.total_pieces())? {
                torrent.restore_bitfield(bits);
            }
            self.torrents.insert(info_hash, torrent);
            restored += 1;
        }
        info!(restored, "session restore complete");
        Ok(restored)
    }

    /// Drives every torrent's tick loop once, persisting resume state for
    /// any torrent whose bitfield changed this tick.
    pub fn tick_all(&mut self, now: Instant) {
        for (info_hash, torrent) in self.torrents.iter_mut() {
            if let Err(e) = torrent.tick(now) {
                tracing::warn!(%info_hash, error = %e, "torrent tick reported an error");
            }
            if torrent.peer_count() > 0 {
                let now_ts = now_unix();
                let peers: Vec<(std::net::SocketAddr, u64)> =
                    torrent.peer_addrs().into_iter().map(|addr| (addr, now_ts)).collect();
                let _ = self.sessions.save_peers(info_hash, &peers);
            }
            if torrent.take_bitfield_dirty() {
                if let Some(bits) = torrent.bitfield() {
                    let _ = self.sessions.save_bitfield(info_hash, bits);
                }
                let status = match torrent.lifecycle {
                    TorrentLifecycle::Seeding => "seeding",
                    TorrentLifecycle::Downloading => "downloading",
                    TorrentLifecycle::Error(_) => "error",
                    _ => "unknown",
                };
                let _ = self.sessions.save_progress(
                    info_hash,
                    &Progress {
                        downloaded: torrent.downloaded,
                        uploaded: torrent.uploaded,
                        added_at: now_unix(),
                        status: status.to_string(),
                    },
                );
            }
        }
    }

    pub fn socket_factory(&self) -> &Arc<SF> {
        &self.socket_factory
    }
}
