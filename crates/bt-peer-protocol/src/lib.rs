//! BitTorrent peer wire protocol: handshake, message framing (including
//! BEP 10 extended messages), and the inbound [`ChunkedBuffer`].
//!
//! Can be used outside of the engine crate.

pub mod chunked_buffer;
pub mod extended;
pub mod handshake;
pub mod message;
pub mod pex;

pub use chunked_buffer::ChunkedBuffer;
pub use extended::{ExtendedError, ExtendedHandshake, PeerExtensionIds, UtMetadataMessage};
pub use handshake::{Handshake, HandshakeError, HANDSHAKE_LEN};
pub use message::{
    serialize, try_parse_message, try_parse_piece_into, FrameError, Message, ParseOutcome,
    RequestSpec, MAX_FRAME_LEN,
};
pub use pex::PexMessage;
