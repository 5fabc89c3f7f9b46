//! Piece-to-file mapping and the verified-write path (spec §4.6).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bt_core::metainfo::FileEntry;
use bt_core::Lengths;

use crate::adapters::{FileHandle, FileSystem};
use crate::error::Result;

/// One write split against the multi-file layout: `length` bytes starting
/// at `local_offset` inside the file at `path`.
struct FileSpan {
    path: PathBuf,
    local_offset: u64,
    length: u64,
}

/// Splits a `[piece_offset, piece_offset + data.len())` write against a
/// file vector whose entries carry cumulative offsets in piece-space.
fn spans_for_write(files: &[FileEntry], piece_offset: u64, len: u64) -> Vec<FileSpan> {
    let end = piece_offset + len;
    let mut spans = Vec::new();
    for file in files {
        let file_start = file.offset;
        let file_end = file.offset + file.length;
        let overlap_start = piece_offset.max(file_start);
        let overlap_end = end.min(file_end);
        if overlap_start >= overlap_end {
            continue;
        }
        spans.push(FileSpan {
            path: PathBuf::from_iter(&file.path),
            local_offset: overlap_start - file_start,
            length: overlap_end - overlap_start,
        });
    }
    spans
}

/// Given a verified piece's bytes, persists them to the files they span
/// and serves reads for the upload path. Handles are opened lazily in
/// `r+` and cached for the storage's lifetime.
pub struct TorrentContentStorage<FS: FileSystem> {
    fs: Arc<FS>,
    files: Vec<FileEntry>,
    lengths: Lengths,
    handles: HashMap<PathBuf, FS::Handle>,
}

impl<FS: FileSystem> TorrentContentStorage<FS> {
    pub fn new(fs: Arc<FS>, files: Vec<FileEntry>, lengths: Lengths) -> Self {
        Self {
            fs,
            files,
            lengths,
            handles: HashMap::new(),
        }
    }

    /// Creates every file in the layout up front (zero-length files must
    /// exist even though they're never written to).
    pub fn allocate(&mut self) -> Result<()> {
        for file in &self.files {
            let path = PathBuf::from_iter(&file.path);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    self.fs.mkdirs(parent)?;
                }
            }
            if !self.fs.exists(&path)? {
                let mut handle = self.fs.create(&path)?;
                handle.set_len(file.length)?;
            }
        }
        Ok(())
    }

    fn handle_for(&mut self, path: &PathBuf) -> Result<&mut FS::Handle> {
        if !self.handles.contains_key(path) {
            let handle = self.fs.open_rw(path)?;
            self.handles.insert(path.clone(), handle);
        }
        Ok(self.handles.get_mut(path).expect("just inserted"))
    }

    /// Writes one verified piece's bytes, splitting across overlapping
    /// files. Idempotent: replaying the same verified write produces the
    /// same bytes on disk.
    pub fn write_verified_piece(&mut self, piece_index: u32, data: &[u8]) -> Result<()> {
        let valid = self
            .lengths
            .validate_piece_index(piece_index)
            .expect("caller verifies piece_index before writing");
        let piece_offset = self.lengths.piece_offset(valid);
        let spans = spans_for_write(&self.files, piece_offset, data.len() as u64);
        let mut consumed = 0u64;
        for span in spans {
            let slice = &data[consumed as usize..(consumed + span.length) as usize];
            let handle = self.handle_for(&span.path)?;
            handle.write_at(span.local_offset, slice)?;
            consumed += span.length;
        }
        Ok(())
    }

    /// Reads a block back out for serving an upload REQUEST. Only ever
    /// called against piece indices the local bitfield has verified.
    pub fn read_block(&mut self, piece_index: u32, begin: u32, len: u32) -> Result<Vec<u8>> {
        let valid = self
            .lengths
            .validate_piece_index(piece_index)
            .expect("caller verifies piece_index before reading");
        let piece_offset = self.lengths.piece_offset(valid) + begin as u64;
        let spans = spans_for_write(&self.files, piece_offset, len as u64);
        let mut out = vec![0u8; len as usize];
        let mut consumed = 0usize;
        for span in spans {
            let handle = self.handle_for(&span.path)?;
            let n = handle.read_at(span.local_offset, &mut out[consumed..consumed + span.length as usize])?;
            consumed += n;
        }
        out.truncate(consumed);
        Ok(out)
    }

    pub fn sync_all(&mut self) -> Result<()> {
        for handle in self.handles.values_mut() {
            handle.sync()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, length: u64, offset: u64) -> FileEntry {
        FileEntry {
            path: vec![path.to_string()],
            length,
            offset,
        }
    }

    #[test]
    fn single_piece_spans_one_file() {
        let files = vec![entry("a.bin", 100, 0)];
        let spans = spans_for_write(&files, 0, 100);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].local_offset, 0);
        assert_eq!(spans[0].length, 100);
    }

    #[test]
    fn write_spanning_two_files_splits_correctly() {
        let files = vec![entry("a.bin", 50, 0), entry("b.bin", 50, 50)];
        // A write of 30 bytes starting at offset 40 covers the last 10
        // bytes of a.bin and the first 20 bytes of b.bin.
        let spans = spans_for_write(&files, 40, 30);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].path, PathBuf::from("a.bin"));
        assert_eq!(spans[0].local_offset, 40);
        assert_eq!(spans[0].length, 10);
        assert_eq!(spans[1].path, PathBuf::from("b.bin"));
        assert_eq!(spans[1].local_offset, 0);
        assert_eq!(spans[1].length, 20);
    }

    #[test]
    fn zero_length_file_never_receives_a_span() {
        let files = vec![entry("a.bin", 50, 0), entry("empty.bin", 0, 50), entry("b.bin", 50, 50)];
        let spans = spans_for_write(&files, 0, 100);
        assert!(spans.iter().all(|s| s.path != PathBuf::from("empty.bin")));
    }
}
