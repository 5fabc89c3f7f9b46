//! Trait boundaries the engine core runs against (spec §6). The engine is
//! single-threaded and cooperative: every trait here is polled from inside
//! `Torrent::tick`, never invoked via callback. `bt-cli` supplies the
//! concrete std-backed implementations; tests use in-memory fakes.

use std::io;
use std::net::SocketAddr;
use std::path::Path;

/// A confined storage root. Paths are opaque to callers: a root is
/// identified only by the key `StorageRootManager` hands back, never by a
/// filesystem path a torrent could escape.
pub trait FileHandle: Send {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize>;
    fn set_len(&mut self, len: u64) -> io::Result<()>;
    fn sync(&mut self) -> io::Result<()>;
}

pub trait FileSystem: Send + Sync {
    type Handle: FileHandle;

    fn open_rw(&self, path: &Path) -> io::Result<Self::Handle>;
    fn create(&self, path: &Path) -> io::Result<Self::Handle>;
    fn exists(&self, path: &Path) -> io::Result<bool>;
    fn mkdirs(&self, path: &Path) -> io::Result<()>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn file_len(&self, path: &Path) -> io::Result<u64>;
}

/// One established (or establishing) peer TCP connection, polled for
/// readiness rather than driven by callbacks.
pub trait PeerSocket: Send {
    /// Non-blocking read. `Ok(None)` means no data is available right now,
    /// not EOF; a closed connection surfaces as `Err`.
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>>;
    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize>;
    fn peer_addr(&self) -> io::Result<SocketAddr>;
    fn shutdown(&mut self);
}

pub trait SocketFactory: Send + Sync {
    type Socket: PeerSocket;

    /// Begins a non-blocking connect; the returned socket may not be
    /// writable yet, matching `try_send`/`try_recv`'s non-blocking contract.
    fn connect(&self, addr: SocketAddr) -> io::Result<Self::Socket>;
}

pub trait Listener: Send {
    type Socket: PeerSocket;

    /// Non-blocking accept; `Ok(None)` means nothing pending.
    fn try_accept(&mut self) -> io::Result<Option<(Self::Socket, SocketAddr)>>;
    fn local_addr(&self) -> io::Result<SocketAddr>;
}

/// Binary-transparent key/value persistence for session state (spec §6:
/// `session:<hex-infohash>:{bitfield|metadata|progress|peers}`).
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> io::Result<()>;
    fn delete(&self, key: &str) -> io::Result<()>;
    fn keys_with_prefix(&self, prefix: &str) -> io::Result<Vec<String>>;
}
