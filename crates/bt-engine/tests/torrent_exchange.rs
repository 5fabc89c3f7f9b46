//! End-to-end exchange between two in-process `Torrent`s: a seeder that
//! already has every piece and a leecher that starts empty, connected by
//! an in-memory socket pair instead of real TCP.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bt_core::PeerId;
use bt_engine::{FileHandle, FileSystem, PeerSocket, SocketFactory, Torrent, TorrentOptions};

struct MemHandle(Arc<Mutex<Vec<u8>>>);

impl FileHandle for MemHandle {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.0.lock().unwrap();
        let start = offset as usize;
        if start >= data.len() {
            return Ok(0);
        }
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<usize> {
        let mut data = self.0.lock().unwrap();
        let end = offset as usize + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset as usize..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn set_len(&mut self, len: u64) -> io::Result<()> {
        self.0.lock().unwrap().resize(len as usize, 0);
        Ok(())
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
struct MemFs {
    files: Mutex<HashMap<PathBuf, Arc<Mutex<Vec<u8>>>>>,
}

impl MemFs {
    fn contents(&self, path: &Path) -> Vec<u8> {
        self.files.lock().unwrap().get(path).unwrap().lock().unwrap().clone()
    }
}

impl FileSystem for MemFs {
    type Handle = MemHandle;

    fn open_rw(&self, path: &Path) -> io::Result<Self::Handle> {
        let mut files = self.files.lock().unwrap();
        let entry = files.entry(path.to_path_buf()).or_insert_with(|| Arc::new(Mutex::new(Vec::new())));
        Ok(MemHandle(entry.clone()))
    }

    fn create(&self, path: &Path) -> io::Result<Self::Handle> {
        self.open_rw(path)
    }

    fn exists(&self, path: &Path) -> io::Result<bool> {
        Ok(self.files.lock().unwrap().contains_key(path))
    }

    fn mkdirs(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.files.lock().unwrap().remove(path);
        Ok(())
    }

    fn file_len(&self, path: &Path) -> io::Result<u64> {
        Ok(self.files.lock().unwrap().get(path).map(|d| d.lock().unwrap().len()).unwrap_or(0) as u64)
    }
}

/// Two non-blocking in-memory pipes wired into each other, standing in
/// for a real `TcpStream` pair.
struct PipeSocket {
    tx: Sender<Vec<u8>>,
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

fn pipe_pair() -> (PipeSocket, PipeSocket) {
    let (tx_a, rx_b) = std::sync::mpsc::channel();
    let (tx_b, rx_a) = std::sync::mpsc::channel();
    (
        PipeSocket { tx: tx_a, rx: rx_a, pending: Vec::new() },
        PipeSocket { tx: tx_b, rx: rx_b, pending: Vec::new() },
    )
}

impl PeerSocket for PipeSocket {
    fn try_recv(&mut self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        loop {
            match self.rx.try_recv() {
                Ok(mut chunk) => self.pending.append(&mut chunk),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if self.pending.is_empty() {
                        return Ok(Some(0));
                    }
                    break;
                }
            }
        }
        if self.pending.is_empty() {
            return Ok(None);
        }
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(Some(n))
    }

    fn try_send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.tx.send(buf.to_vec());
        Ok(buf.len())
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok("127.0.0.1:0".parse().unwrap())
    }

    fn shutdown(&mut self) {}
}

/// A `SocketFactory` that only ever returns the one pre-wired socket
/// handed to it, to drive `Torrent::connect_peer` in a test without a
/// real dialer.
struct FixedSocketFactory(Mutex<Option<PipeSocket>>);

impl SocketFactory for FixedSocketFactory {
    type Socket = PipeSocket;

    fn connect(&self, _addr: SocketAddr) -> io::Result<Self::Socket> {
        self.0
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "socket already taken"))
    }
}

fn make_torrent_bytes(piece_count: usize) -> (Vec<u8>, Vec<u8>) {
    let piece_len = 16384usize;
    let mut data = Vec::with_capacity(piece_len * piece_count);
    for i in 0..piece_count {
        data.extend(std::iter::repeat((i as u8).wrapping_add(1)).take(piece_len));
    }
    let mut pieces_field = Vec::new();
    for chunk in data.chunks(piece_len) {
        pieces_field.extend_from_slice(bt_sha1w::sha1(chunk).as_bytes());
    }

    let mut info = Vec::new();
    info.extend_from_slice(format!("d6:lengthi{}e4:name8:file.bin12:piece lengthi{}e6:pieces{}:", data.len(), piece_len, pieces_field.len()).as_bytes());
    info.extend_from_slice(&pieces_field);
    info.extend_from_slice(b"e");

    let mut torrent = Vec::new();
    torrent.extend_from_slice(b"d8:announce3:foo4:info");
    torrent.extend_from_slice(&info);
    torrent.extend_from_slice(b"e");

    (torrent, data)
}

#[test]
fn leecher_downloads_full_file_from_seeder() {
    let (torrent_bytes, original_data) = make_torrent_bytes(3);
    let metadata = bt_core::metainfo::parse_torrent_file(&torrent_bytes).unwrap();

    let seeder_fs = Arc::new(MemFs::default());
    let mut seeder_storage = bt_engine::TorrentContentStorage::new(seeder_fs.clone(), metadata.files.clone(), metadata.lengths);
    seeder_storage.allocate().unwrap();
    for (i, chunk) in original_data.chunks(16384).enumerate() {
        seeder_storage.write_verified_piece(i as u32, chunk).unwrap();
    }

    let mut seeder = Torrent::new_from_metadata(
        metadata.clone(),
        seeder_storage,
        PeerId::generate("BT", [0, 0, 0, 1]),
        TorrentOptions::default(),
    );
    let full_bits = bt_core::BitField::new(metadata.lengths.total_pieces());
    let mut full_bits = full_bits;
    for i in 0..metadata.lengths.total_pieces() {
        full_bits.set(i);
    }
    seeder.restore_bitfield(full_bits);
    assert!(seeder.is_complete());

    let leecher_fs = Arc::new(MemFs::default());
    let mut leecher_storage = bt_engine::TorrentContentStorage::new(leecher_fs.clone(), metadata.files.clone(), metadata.lengths);
    leecher_storage.allocate().unwrap();
    let mut leecher = Torrent::new_from_metadata(
        metadata.clone(),
        leecher_storage,
        PeerId::generate("BT", [0, 0, 0, 2]),
        TorrentOptions::default(),
    );

    let (seeder_socket, leecher_socket) = pipe_pair();
    let seeder_factory = FixedSocketFactory(Mutex::new(Some(seeder_socket)));
    let leecher_factory = FixedSocketFactory(Mutex::new(Some(leecher_socket)));

    let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
    seeder.connect_peer(&seeder_factory, addr).unwrap();
    leecher.connect_peer(&leecher_factory, addr).unwrap();

    let start = Instant::now();
    let mut now = start;
    while !leecher.is_complete() {
        now += Duration::from_millis(100);
        seeder.tick(now).unwrap();
        leecher.tick(now).unwrap();
        assert!(now.duration_since(start) < Duration::from_secs(10), "exchange did not converge");
    }

    let path = PathBuf::from("file.bin");
    assert_eq!(leecher_fs.contents(&path), original_data);
    assert_eq!(leecher.peer_count(), 1);
}
