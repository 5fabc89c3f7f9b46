//! Core, I/O-free torrent data model shared by the wire protocol, tracker
//! clients and engine crates.

pub mod bitfield;
pub mod info_hash;
pub mod lengths;
pub mod magnet;
pub mod metainfo;
pub mod peer_id;

pub use bitfield::{BitField, BitFieldError};
pub use info_hash::InfoHash;
pub use lengths::{ChunkInfo, Lengths, LengthsError, ValidPieceIndex, BLOCK_SIZE};
pub use magnet::{MagnetError, MagnetLink};
pub use metainfo::{FileEntry, MetainfoError, TorrentMetadata};
pub use peer_id::PeerId;
