use byteorder::{BigEndian, ByteOrder};

use crate::chunked_buffer::ChunkedBuffer;

pub const MSGID_CHOKE: u8 = 0;
pub const MSGID_UNCHOKE: u8 = 1;
pub const MSGID_INTERESTED: u8 = 2;
pub const MSGID_NOT_INTERESTED: u8 = 3;
pub const MSGID_HAVE: u8 = 4;
pub const MSGID_BITFIELD: u8 = 5;
pub const MSGID_REQUEST: u8 = 6;
pub const MSGID_PIECE: u8 = 7;
pub const MSGID_CANCEL: u8 = 8;
pub const MSGID_EXTENDED: u8 = 20;

/// Defense-in-depth cap on a single frame's declared length (spec §4.4).
pub const MAX_FRAME_LEN: u32 = 1 << 20;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestSpec {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

/// One parsed peer-wire message. `Piece`'s block is returned as an owned
/// `Vec<u8>` here for simplicity of the public API; the zero-copy path
/// (spec §4.3) lives in [`try_parse_piece_into`], which copies a PIECE
/// block directly into a caller-supplied buffer without going through this
/// enum at all.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    Bitfield(Vec<u8>),
    Request(RequestSpec),
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel(RequestSpec),
    Extended { extended_id: u8, payload: Vec<u8> },
    /// A message id outside the known set — forward-compatibility per
    /// spec §4.2 ("other IDs are silently discarded").
    Unknown(u8),
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame length {0} exceeds the {MAX_FRAME_LEN} byte cap")]
    FrameTooLarge(u32),
}

/// Result of trying to parse the next frame out of a [`ChunkedBuffer`].
pub enum ParseOutcome {
    /// Not enough bytes have arrived yet; caller should wait for more.
    NeedMoreData,
    /// A full frame was parsed and consumed.
    Message(Message),
}

/// Attempts to parse and consume one message frame from the front of
/// `buf`. Returns `Ok(NeedMoreData)` (without consuming anything) when the
/// buffer doesn't yet hold a complete frame.
pub fn try_parse_message(buf: &mut ChunkedBuffer) -> Result<ParseOutcome, FrameError> {
    let Some(len) = buf.peek_u32(0) else {
        return Ok(ParseOutcome::NeedMoreData);
    };
    if len > MAX_FRAME_LEN {
        return Err(FrameError::FrameTooLarge(len));
    }
    if len == 0 {
        buf.discard(4);
        return Ok(ParseOutcome::Message(Message::KeepAlive));
    }
    if buf.length() < 4 + len as usize {
        return Ok(ParseOutcome::NeedMoreData);
    }
    let msg_id = buf.peek_byte(4).expect("length checked above");
    let payload_len = len as usize - 1;
    let message = match msg_id {
        MSGID_CHOKE => Message::Choke,
        MSGID_UNCHOKE => Message::Unchoke,
        MSGID_INTERESTED => Message::Interested,
        MSGID_NOT_INTERESTED => Message::NotInterested,
        MSGID_HAVE => {
            let idx = BigEndian::read_u32(buf.peek_bytes(5, 4).expect("length checked"));
            Message::Have(idx)
        }
        MSGID_BITFIELD => {
            let bits = buf.peek_bytes(5, payload_len).expect("length checked").to_vec();
            Message::Bitfield(bits)
        }
        MSGID_REQUEST => Message::Request(parse_request_spec(buf)),
        MSGID_CANCEL => Message::Cancel(parse_request_spec(buf)),
        MSGID_PIECE => {
            let index = BigEndian::read_u32(buf.peek_bytes(5, 4).expect("length checked"));
            let begin = BigEndian::read_u32(buf.peek_bytes(9, 4).expect("length checked"));
            let block = buf
                .peek_bytes(13, payload_len - 8)
                .expect("length checked")
                .to_vec();
            Message::Piece { index, begin, block }
        }
        MSGID_EXTENDED => {
            let extended_id = buf.peek_byte(5).expect("length checked");
            let payload = buf
                .peek_bytes(6, payload_len - 1)
                .expect("length checked")
                .to_vec();
            Message::Extended { extended_id, payload }
        }
        other => Message::Unknown(other),
    };
    buf.discard(4 + len as usize);
    Ok(ParseOutcome::Message(message))
}

fn parse_request_spec(buf: &ChunkedBuffer) -> RequestSpec {
    RequestSpec {
        index: BigEndian::read_u32(buf.peek_bytes(5, 4).expect("length checked")),
        begin: BigEndian::read_u32(buf.peek_bytes(9, 4).expect("length checked")),
        length: BigEndian::read_u32(buf.peek_bytes(13, 4).expect("length checked")),
    }
}

/// Zero-copy PIECE fast path (spec §4.3): if the next framed message is a
/// PIECE, its block bytes are copied directly into `dest` and the frame is
/// discarded in the same call, skipping the extra `Message::Piece`
/// allocation. Returns `None` if the next frame isn't a complete PIECE
/// message yet (caller should fall back to [`try_parse_message`], which
/// handles every other message type and also returns PIECE messages when
/// this fast path isn't used).
pub fn try_parse_piece_into(buf: &mut ChunkedBuffer, dest: &mut Vec<u8>) -> Option<(u32, u32)> {
    let len = buf.peek_u32(0)?;
    if len == 0 || buf.length() < 4 + len as usize {
        return None;
    }
    if buf.peek_byte(4) != Some(MSGID_PIECE) {
        return None;
    }
    let index = BigEndian::read_u32(buf.peek_bytes(5, 4)?);
    let begin = BigEndian::read_u32(buf.peek_bytes(9, 4)?);
    let block_len = len as usize - 9;
    dest.extend_from_slice(buf.peek_bytes(13, block_len)?);
    buf.discard(4 + len as usize);
    Some((index, begin))
}

pub fn serialize(message: &Message) -> Vec<u8> {
    let mut out = Vec::new();
    match message {
        Message::KeepAlive => out.extend_from_slice(&0u32.to_be_bytes()),
        Message::Choke => write_simple(&mut out, MSGID_CHOKE),
        Message::Unchoke => write_simple(&mut out, MSGID_UNCHOKE),
        Message::Interested => write_simple(&mut out, MSGID_INTERESTED),
        Message::NotInterested => write_simple(&mut out, MSGID_NOT_INTERESTED),
        Message::Have(idx) => {
            out.extend_from_slice(&5u32.to_be_bytes());
            out.push(MSGID_HAVE);
            out.extend_from_slice(&idx.to_be_bytes());
        }
        Message::Bitfield(bits) => {
            out.extend_from_slice(&(1 + bits.len() as u32).to_be_bytes());
            out.push(MSGID_BITFIELD);
            out.extend_from_slice(bits);
        }
        Message::Request(r) => write_request_like(&mut out, MSGID_REQUEST, r),
        Message::Cancel(r) => write_request_like(&mut out, MSGID_CANCEL, r),
        Message::Piece { index, begin, block } => {
            out.extend_from_slice(&(9 + block.len() as u32).to_be_bytes());
            out.push(MSGID_PIECE);
            out.extend_from_slice(&index.to_be_bytes());
            out.extend_from_slice(&begin.to_be_bytes());
            out.extend_from_slice(block);
        }
        Message::Extended { extended_id, payload } => {
            out.extend_from_slice(&(2 + payload.len() as u32).to_be_bytes());
            out.push(MSGID_EXTENDED);
            out.push(*extended_id);
            out.extend_from_slice(payload);
        }
        Message::Unknown(_) => {
            // We never construct these ourselves to send; nothing to do.
        }
    }
    out
}

fn write_simple(out: &mut Vec<u8>, id: u8) {
    out.extend_from_slice(&1u32.to_be_bytes());
    out.push(id);
}

fn write_request_like(out: &mut Vec<u8>, id: u8, r: &RequestSpec) {
    out.extend_from_slice(&13u32.to_be_bytes());
    out.push(id);
    out.extend_from_slice(&r.index.to_be_bytes());
    out.extend_from_slice(&r.begin.to_be_bytes());
    out.extend_from_slice(&r.length.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(msg: Message) {
        let mut buf = ChunkedBuffer::new();
        buf.append(&serialize(&msg));
        match try_parse_message(&mut buf).unwrap() {
            ParseOutcome::Message(parsed) => assert_eq!(parsed, msg),
            ParseOutcome::NeedMoreData => panic!("expected a complete message"),
        }
        assert_eq!(buf.length(), 0);
    }

    #[test]
    fn roundtrip_all_simple_messages() {
        roundtrip(Message::KeepAlive);
        roundtrip(Message::Choke);
        roundtrip(Message::Unchoke);
        roundtrip(Message::Interested);
        roundtrip(Message::NotInterested);
        roundtrip(Message::Have(7));
        roundtrip(Message::Bitfield(vec![0xFF, 0x00]));
        roundtrip(Message::Request(RequestSpec {
            index: 1,
            begin: 2,
            length: 16384,
        }));
        roundtrip(Message::Cancel(RequestSpec {
            index: 1,
            begin: 2,
            length: 16384,
        }));
        roundtrip(Message::Piece {
            index: 3,
            begin: 0,
            block: vec![1, 2, 3, 4],
        });
        roundtrip(Message::Extended {
            extended_id: 0,
            payload: vec![5, 6, 7],
        });
    }

    #[test]
    fn incomplete_frame_reports_need_more_data() {
        let mut buf = ChunkedBuffer::new();
        buf.append(&[0, 0, 0, 5]); // declares 5 bytes, none present
        assert!(matches!(
            try_parse_message(&mut buf).unwrap(),
            ParseOutcome::NeedMoreData
        ));
        assert_eq!(buf.length(), 4); // nothing consumed
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = ChunkedBuffer::new();
        buf.append(&(MAX_FRAME_LEN + 1).to_be_bytes());
        assert_eq!(
            try_parse_message(&mut buf),
            Err(FrameError::FrameTooLarge(MAX_FRAME_LEN + 1))
        );
    }

    #[test]
    fn unknown_message_id_is_preserved_not_an_error() {
        let mut buf = ChunkedBuffer::new();
        buf.append(&5u32.to_be_bytes());
        buf.append(&[99, 1, 2, 3, 4]);
        match try_parse_message(&mut buf).unwrap() {
            ParseOutcome::Message(Message::Unknown(99)) => {}
            other => panic!("expected Unknown(99), got {other:?}"),
        }
    }

    #[test]
    fn piece_fast_path_matches_generic_parse() {
        let msg = Message::Piece {
            index: 9,
            begin: 16384,
            block: vec![7u8; 1024],
        };
        let mut buf = ChunkedBuffer::new();
        buf.append(&serialize(&msg));
        let mut dest = Vec::new();
        let (idx, begin) = try_parse_piece_into(&mut buf, &mut dest).unwrap();
        assert_eq!(idx, 9);
        assert_eq!(begin, 16384);
        assert_eq!(dest, vec![7u8; 1024]);
        assert_eq!(buf.length(), 0);
    }
}
