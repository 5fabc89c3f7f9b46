//! Maps a torrent to the filesystem adapter that owns its data (spec §3's
//! `StorageRoot`, spec §4.14). The engine never touches a root's path
//! directly — it only ever asks this manager to resolve a root key to the
//! `FileSystem` handle that was registered for it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::adapters::FileSystem;
use crate::error::{EngineError, Result};
use bt_core::InfoHash;

#[derive(Clone, Debug)]
pub struct StorageRoot {
    pub key: String,
    pub label: String,
}

/// `FS` is a single concrete filesystem adapter type shared by every root
/// this manager tracks (e.g. one std::fs-backed implementation mounting
/// different directories per key).
pub struct StorageRootManager<FS: FileSystem> {
    roots: RwLock<HashMap<String, (StorageRoot, Arc<FS>)>>,
    assignments: RwLock<HashMap<InfoHash, String>>,
}

impl<FS: FileSystem> StorageRootManager<FS> {
    pub fn new() -> Self {
        Self {
            roots: RwLock::new(HashMap::new()),
            assignments: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_root(&self, key: impl Into<String>, label: impl Into<String>, fs: Arc<FS>) {
        let key = key.into();
        self.roots
            .write()
            .insert(key.clone(), (StorageRoot { key, label: label.into() }, fs));
    }

    pub fn assign(&self, info_hash: InfoHash, root_key: impl Into<String>) {
        self.assignments.write().insert(info_hash, root_key.into());
    }

    pub fn unassign(&self, info_hash: &InfoHash) {
        self.assignments.write().remove(info_hash);
    }

    pub fn resolve(&self, info_hash: &InfoHash) -> Result<Arc<FS>> {
        let assignments = self.assignments.read();
        let root_key = assignments
            .get(info_hash)
            .ok_or(EngineError::MissingStorageRoot { info_hash: *info_hash })?;
        let roots = self.roots.read();
        roots
            .get(root_key)
            .map(|(_, fs)| Arc::clone(fs))
            .ok_or(EngineError::MissingStorageRoot { info_hash: *info_hash })
    }

    pub fn list_roots(&self) -> Vec<StorageRoot> {
        self.roots.read().values().map(|(r, _)| r.clone()).collect()
    }
}

impl<FS: FileSystem> Default for StorageRootManager<FS> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::FileHandle;
    use std::io;
    use std::path::Path;

    struct FakeHandle;
    impl FileHandle for FakeHandle {
        fn read_at(&mut self, _offset: u64, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }
        fn write_at(&mut self, _offset: u64, buf: &[u8]) -> io::Result<usize> {
            Ok(buf.len())
        }
        fn set_len(&mut self, _len: u64) -> io::Result<()> {
            Ok(())
        }
        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct FakeFs;
    impl FileSystem for FakeFs {
        type Handle = FakeHandle;
        fn open_rw(&self, _path: &Path) -> io::Result<Self::Handle> {
            Ok(FakeHandle)
        }
        fn create(&self, _path: &Path) -> io::Result<Self::Handle> {
            Ok(FakeHandle)
        }
        fn exists(&self, _path: &Path) -> io::Result<bool> {
            Ok(false)
        }
        fn mkdirs(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }
        fn remove_file(&self, _path: &Path) -> io::Result<()> {
            Ok(())
        }
        fn file_len(&self, _path: &Path) -> io::Result<u64> {
            Ok(0)
        }
    }

    #[test]
    fn missing_assignment_is_an_error() {
        let mgr: StorageRootManager<FakeFs> = StorageRootManager::new();
        let info_hash = InfoHash::from_bytes([1u8; 20]);
        assert!(matches!(
            mgr.resolve(&info_hash),
            Err(EngineError::MissingStorageRoot { .. })
        ));
    }

    #[test]
    fn resolves_assigned_root() {
        let mgr = StorageRootManager::new();
        mgr.register_root("default", "Default", Arc::new(FakeFs));
        let info_hash = InfoHash::from_bytes([2u8; 20]);
        mgr.assign(info_hash, "default");
        assert!(mgr.resolve(&info_hash).is_ok());
    }
}
