use bt_core::InfoHash;

/// Error taxonomy from spec §7. `thiserror`-derived so each variant is a
/// concrete, matchable type rather than a string, but the taxonomy itself
/// (not per-variant detail) is what the spec fixes.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("malformed bencode: {0}")]
    MalformedBencode(#[from] bt_bencode::Error),

    #[error("invalid torrent: {0}")]
    InvalidTorrent(#[from] bt_core::MetainfoError),

    #[error("metadata hash mismatch for infohash {info_hash}")]
    MetadataHashMismatch { info_hash: InfoHash },

    #[error("peer protocol violation: {0}")]
    PeerProtocolViolation(String),

    #[error("piece {piece_index} failed hash verification")]
    PieceHashMismatch { piece_index: u32 },

    #[error("transient tracker error: {0}")]
    TrackerTransient(String),

    #[error("permanent tracker error: {0}")]
    TrackerPermanent(String),

    #[error("transient storage error: {0}")]
    StorageTransient(String),

    #[error("permanent storage error: {0}")]
    StoragePermanent(String),

    #[error("no storage root assigned to torrent {info_hash}")]
    MissingStorageRoot { info_hash: InfoHash },

    #[error("no such torrent: {0}")]
    UnknownTorrent(InfoHash),

    #[error("magnet link error: {0}")]
    Magnet(#[from] bt_core::MagnetError),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl From<bt_tracker::TrackerError> for EngineError {
    fn from(e: bt_tracker::TrackerError) -> Self {
        match e {
            bt_tracker::TrackerError::Transient(m) => EngineError::TrackerTransient(m),
            bt_tracker::TrackerError::Permanent(m) => EngineError::TrackerPermanent(m),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut => {
                EngineError::StorageTransient(e.to_string())
            }
            ErrorKind::PermissionDenied | ErrorKind::NotFound => {
                EngineError::StoragePermanent(e.to_string())
            }
            _ => EngineError::StorageTransient(e.to_string()),
        }
    }
}
