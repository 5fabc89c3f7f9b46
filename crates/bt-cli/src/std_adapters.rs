//! `std::fs` / `std::net`-backed implementations of the engine's adapter
//! traits (spec §6). Every socket is put in non-blocking mode so the tick
//! loop never parks waiting on peer I/O.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use bt_engine::{FileHandle, FileSystem, Listener, PeerSocket, SessionStore, SocketFactory};

/// Confines all paths handed to it under `root` — a torrent's files never
/// escape the directory the engine assigned as its storage root.
pub struct DirFileSystem {
    root: PathBuf,
}

impl DirFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        self.root.join(path)
    }
}

/// Newtype over `std::fs::File` so the orphan rule lets us impl the
/// engine's `FileHandle` trait against it.
pub struct StdFileHandle(File);

impl FileHandle for StdFileHandle {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        FileExt::read_at(&self.0, buf, offset)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        FileExt::write_at(&self.0, buf, offset)?;
        Ok(buf.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.0.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.0.sync_data()
    }
}

impl FileSystem for DirFileSystem {
    type Handle = StdFileHandle;

    fn open_rw(&self, path: &Path) -> io::Result<Self::Handle> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.resolve(path))
            .map(StdFileHandle)
    }

    fn create(&self, path: &Path) -> io::Result<Self::Handle> {
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(self.resolve(path))
            .map(StdFileHandle)
    }

    fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.resolve(path).exists())
    }

    fn mkdirs(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(self.resolve(path))
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(self.resolve(path))
    }

    fn file_len(&self, path: &Path) -> io::Result<u64> {
        Ok(fs::metadata(self.resolve(path))?.len())
    }
}

/// Non-blocking wrapper over `TcpStream`. `try_recv`/`try_send` translate
/// `WouldBlock` into `Ok(None)` / `Ok(0)` so the engine's poll loop never
/// has to special-case the error kind itself.
pub struct TcpPeerSocket {
    stream: TcpStream,
}

impl TcpPeerSocket {
    fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream })
    }
}

impl PeerSocket for TcpPeerSocket {
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.stream.read(buf) {
            Ok(0) => Ok(Some(0)),
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }
}

pub struct TcpSocketFactory;

impl SocketFactory for TcpSocketFactory {
    type Socket = TcpPeerSocket;

    fn connect(&self, addr: SocketAddr) -> io::Result<Self::Socket> {
        // A connect() in non-blocking mode returns WouldBlock immediately;
        // the handshake write is buffered and flushed once writable, same
        // as every other outbound message.
        let stream = TcpStream::connect(addr)?;
        TcpPeerSocket::new(stream)
    }
}

pub struct TcpPeerListener {
    listener: StdTcpListener,
}

impl TcpPeerListener {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = StdTcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(Self { listener })
    }
}

impl Listener for TcpPeerListener {
    type Socket = TcpPeerSocket;

    fn try_accept(&mut self) -> io::Result<Option<(Self::Socket, SocketAddr)>> {
        match self.listener.accept() {
            Ok((stream, addr)) => Ok(Some((TcpPeerSocket::new(stream)?, addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// One file per key under `dir`, named by a hex-escaped key so the
/// `session:<hash>:bitfield`-style keys never collide with path separators.
pub struct FileSessionStore {
    dir: PathBuf,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let escaped: String = key
            .bytes()
            .map(|b| format!("{b:02x}"))
            .collect();
        self.dir.join(escaped)
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> io::Result<()> {
        fs::write(self.path_for(key), value)
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> io::Result<Vec<String>> {
        let prefix_hex: String = prefix.bytes().map(|b| format!("{b:02x}")).collect();
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix_hex) {
                continue;
            }
            if let Some(decoded) = unhex(name) {
                out.push(decoded);
            }
        }
        Ok(out)
    }
}

fn unhex(s: &str) -> Option<String> {
    if s.len() % 2 != 0 {
        return None;
    }
    let mut bytes = Vec::with_capacity(s.len() / 2);
    let chars: Vec<char> = s.chars().collect();
    for pair in chars.chunks(2) {
        let byte = u8::from_str_radix(&pair.iter().collect::<String>(), 16).ok()?;
        bytes.push(byte);
    }
    String::from_utf8(bytes).ok()
}
