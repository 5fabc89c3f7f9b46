use bt_bencode::Value;
use bt_sha1w::Sha1Digest;

use crate::info_hash::InfoHash;
use crate::lengths::{Lengths, LengthsError};

/// One entry of the `files` list (multi-file mode) or the synthesized
/// single entry for single-file mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    /// Path components, e.g. `["subdir", "file.bin"]`.
    pub path: Vec<String>,
    pub length: u64,
    /// Offset of this file's first byte in the concatenated piece-space.
    pub offset: u64,
}

/// Resolved content description for a torrent. Immutable once installed,
/// per spec §3: "Created once ... Immutable once installed."
#[derive(Clone, Debug)]
pub struct TorrentMetadata {
    pub info_hash: InfoHash,
    pub name: String,
    pub lengths: Lengths,
    pub piece_hashes: Vec<Sha1Digest>,
    pub files: Vec<FileEntry>,
    /// The raw bencoded `info` dict, kept around so it can be written
    /// verbatim to `session:<hex>:metadata`.
    pub raw_info: Vec<u8>,
}

#[derive(thiserror::Error, Debug)]
pub enum MetainfoError {
    #[error("malformed bencode: {0}")]
    Bencode(#[from] bt_bencode::Error),
    #[error("invalid torrent: {0}")]
    InvalidTorrent(String),
    #[error(transparent)]
    Lengths(#[from] LengthsError),
}

/// Parses a complete `.torrent` file's bytes into [`TorrentMetadata`].
pub fn parse_torrent_file(bytes: &[u8]) -> Result<TorrentMetadata, MetainfoError> {
    let raw_info = bt_bencode::extract_raw_info(bytes)?.to_vec();
    let info_hash = InfoHash::from_digest(bt_sha1w::sha1(&raw_info));
    let top = bt_bencode::decode(bytes)?;
    let info = top
        .get(b"info")
        .ok_or_else(|| MetainfoError::InvalidTorrent("missing info dict".into()))?;
    build_metadata(info_hash, info, raw_info)
}

/// Assembles metadata from a raw `info` dict fetched piece-by-piece over
/// ut_metadata (BEP 9), after the caller has already verified
/// `SHA-1(raw_info) == info_hash`.
pub fn install_metadata_from_info_bytes(
    info_hash: InfoHash,
    raw_info: Vec<u8>,
) -> Result<TorrentMetadata, MetainfoError> {
    let info = bt_bencode::decode(&raw_info)?;
    build_metadata(info_hash, &info, raw_info)
}

fn build_metadata(
    info_hash: InfoHash,
    info: &Value,
    raw_info: Vec<u8>,
) -> Result<TorrentMetadata, MetainfoError> {
    let err = |m: &str| MetainfoError::InvalidTorrent(m.to_string());

    let name = info
        .get(b"name")
        .and_then(Value::as_bytes)
        .map(|b| String::from_utf8_lossy(b).into_owned())
        .unwrap_or_else(|| "torrent-content".to_string());

    let piece_length = info
        .get(b"piece length")
        .and_then(Value::as_integer)
        .ok_or_else(|| err("missing piece length"))? as u32;

    let pieces_bytes = info
        .get(b"pieces")
        .and_then(Value::as_bytes)
        .ok_or_else(|| err("missing pieces"))?;
    if pieces_bytes.len() % 20 != 0 {
        return Err(err("pieces length is not a multiple of 20"));
    }
    let piece_hashes: Vec<Sha1Digest> = pieces_bytes
        .chunks_exact(20)
        .map(|c| Sha1Digest(c.try_into().expect("chunks_exact(20)")))
        .collect();

    let files = match info.get(b"files") {
        Some(Value::List(entries)) => {
            let mut files = Vec::with_capacity(entries.len());
            let mut offset = 0u64;
            for entry in entries {
                let length = entry
                    .get(b"length")
                    .and_then(Value::as_integer)
                    .ok_or_else(|| err("file entry missing length"))? as u64;
                let path_list = entry
                    .get(b"path")
                    .and_then(Value::as_list)
                    .ok_or_else(|| err("file entry missing path"))?;
                let path = path_list
                    .iter()
                    .map(|p| {
                        p.as_bytes()
                            .map(|b| String::from_utf8_lossy(b).into_owned())
                            .ok_or_else(|| err("path component is not a byte-string"))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                files.push(FileEntry {
                    path,
                    length,
                    offset,
                });
                offset += length;
            }
            files
        }
        _ => {
            let length = info
                .get(b"length")
                .and_then(Value::as_integer)
                .ok_or_else(|| err("single-file torrent missing length"))?
                as u64;
            vec![FileEntry {
                path: vec![name.clone()],
                length,
                offset: 0,
            }]
        }
    };

    let total_length: u64 = files.iter().map(|f| f.length).sum();
    let lengths = Lengths::new(total_length, piece_length)?;

    if lengths.total_pieces() as usize != piece_hashes.len() {
        return Err(err("piece hash count does not match piece length/total length"));
    }

    Ok(TorrentMetadata {
        info_hash,
        name,
        lengths,
        piece_hashes,
        files,
        raw_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_single_file_torrent() -> Vec<u8> {
        let piece = vec![0xABu8; 16384];
        let hash = bt_sha1w::sha1(&piece);
        let mut info = Vec::new();
        info.extend_from_slice(b"d6:lengthi16384e4:name8:file.bin12:piece lengthi16384e6:pieces20:");
        info.extend_from_slice(&hash.0);
        info.extend_from_slice(b"e");

        let mut torrent = Vec::new();
        torrent.extend_from_slice(b"d8:announce3:foo4:info");
        torrent.extend_from_slice(&info);
        torrent.extend_from_slice(b"e");
        torrent
    }

    #[test]
    fn parses_single_file_torrent() {
        let bytes = make_single_file_torrent();
        let meta = parse_torrent_file(&bytes).unwrap();
        assert_eq!(meta.files.len(), 1);
        assert_eq!(meta.files[0].length, 16384);
        assert_eq!(meta.lengths.total_pieces(), 1);
        assert_eq!(meta.name, "file.bin");
    }

    #[test]
    fn install_from_info_bytes_matches_direct_parse() {
        let bytes = make_single_file_torrent();
        let raw_info = bt_bencode::extract_raw_info(&bytes).unwrap().to_vec();
        let ih = InfoHash::from_digest(bt_sha1w::sha1(&raw_info));
        let meta = install_metadata_from_info_bytes(ih, raw_info).unwrap();
        assert_eq!(meta.files[0].length, 16384);
    }

    #[test]
    fn multi_file_offsets_are_cumulative() {
        let info = b"d5:filesld6:lengthi10e4:pathl5:a.txteed6:lengthi20e4:pathl5:b.txteee4:name1:x12:piece lengthi16384e6:pieces0:e";
        let meta = build_metadata(
            InfoHash::from_bytes([0u8; 20]),
            &bt_bencode::decode(info).unwrap(),
            info.to_vec(),
        );
        // pieces is empty here (0 hashes) but total_length=30 needs 1 piece,
        // so this is intentionally invalid -- verifies the hash-count check.
        assert!(meta.is_err());
    }
}
