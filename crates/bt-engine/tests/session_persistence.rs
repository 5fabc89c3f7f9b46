//! Round-trips every session record kind through an in-memory store,
//! the way a restart would read them back.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use bt_core::{BitField, InfoHash};
use bt_engine::adapters::SessionStore;
use bt_engine::session_manager::{Progress, SessionManager};

#[derive(Default)]
struct MemStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl SessionStore for MemStore {
    fn get(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> io::Result<()> {
        self.entries.lock().unwrap().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> io::Result<()> {
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> io::Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

fn info_hash(byte: u8) -> InfoHash {
    InfoHash([byte; 20])
}

#[test]
fn bitfield_metadata_progress_and_peers_round_trip() {
    let store = Arc::new(MemStore::default());
    let sessions = SessionManager::new(store);
    let ih = info_hash(0xAB);

    let mut bits = BitField::new(10);
    bits.set(0);
    bits.set(3);
    bits.set(9);
    sessions.save_bitfield(&ih, &bits).unwrap();
    let loaded_bits = sessions.load_bitfield(&ih, 10).unwrap().unwrap();
    assert!(loaded_bits.has(0) && loaded_bits.has(3) && loaded_bits.has(9));
    assert!(!loaded_bits.has(1));

    sessions.save_metadata(&ih, b"d4:name3:foo6:lengthi1024ee").unwrap();
    assert_eq!(sessions.load_metadata(&ih).unwrap().unwrap(), b"d4:name3:foo6:lengthi1024ee".to_vec());

    let progress = Progress {
        downloaded: 4096,
        uploaded: 1024,
        added_at: 1_700_000_000,
        status: "downloading".to_string(),
    };
    sessions.save_progress(&ih, &progress).unwrap();
    let loaded = sessions.load_progress(&ih).unwrap().unwrap();
    assert_eq!(loaded.downloaded, 4096);
    assert_eq!(loaded.uploaded, 1024);
    assert_eq!(loaded.added_at, 1_700_000_000);
    assert_eq!(loaded.status, "downloading");

    let addr: std::net::SocketAddr = "203.0.113.5:6881".parse().unwrap();
    sessions.save_peers(&ih, &[(addr, 1_700_000_500)]).unwrap();
    let peers = sessions.load_peers(&ih).unwrap();
    assert_eq!(peers, vec![(addr, 1_700_000_500)]);

    assert_eq!(sessions.known_info_hashes().unwrap(), vec![ih]);

    sessions.delete_all(&ih).unwrap();
    assert!(sessions.load_bitfield(&ih, 10).unwrap().is_none());
    assert!(sessions.load_metadata(&ih).unwrap().is_none());
    assert!(sessions.load_progress(&ih).unwrap().is_none());
    assert!(sessions.load_peers(&ih).unwrap().is_empty());
    assert!(sessions.known_info_hashes().unwrap().is_empty());
}

#[test]
fn known_info_hashes_dedupes_across_suffixes() {
    let store = Arc::new(MemStore::default());
    let sessions = SessionManager::new(store);
    let ih = info_hash(0x11);

    sessions.save_metadata(&ih, b"irrelevant").unwrap();
    sessions.save_progress(&ih, &Progress::default()).unwrap();

    let hashes = sessions.known_info_hashes().unwrap();
    assert_eq!(hashes, vec![ih]);
}
