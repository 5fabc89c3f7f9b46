use bt_bencode::Value;

pub const UT_METADATA_KEY: &[u8] = b"ut_metadata";
pub const UT_PEX_KEY: &[u8] = b"ut_pex";

/// Locally-assigned extension ids this engine advertises in its own
/// extended handshake; these are the ids the *peer* must use when sending
/// us an extended message of that kind.
pub const LOCAL_UT_METADATA_ID: u8 = 1;
pub const LOCAL_UT_PEX_ID: u8 = 2;

#[derive(thiserror::Error, Debug)]
pub enum ExtendedError {
    #[error(transparent)]
    Bencode(#[from] bt_bencode::Error),
    #[error("extended handshake is missing the \"m\" dict")]
    MissingM,
    #[error("ut_metadata message missing msg_type")]
    MissingMsgType,
    #[error("unknown ut_metadata msg_type {0}")]
    UnknownMsgType(i64),
    #[error("ut_metadata data message missing total_size")]
    MissingTotalSize,
}

/// Per-peer map of extension name -> negotiated id, from the peer's `m`
/// dict in its extended handshake (subtype 0).
#[derive(Clone, Debug, Default)]
pub struct PeerExtensionIds {
    pub ut_metadata: Option<u8>,
    pub ut_pex: Option<u8>,
}

/// The extended handshake (BEP 10 subtype 0).
#[derive(Clone, Debug, Default)]
pub struct ExtendedHandshake {
    pub m: PeerExtensionIds,
    pub metadata_size: Option<u32>,
    pub client_version: Option<String>,
}

impl ExtendedHandshake {
    /// Builds the handshake this engine sends: advertises both extensions
    /// it implements under their locally-assigned ids.
    pub fn ours(metadata_size: Option<u32>) -> Self {
        Self {
            m: PeerExtensionIds {
                ut_metadata: Some(LOCAL_UT_METADATA_ID),
                ut_pex: Some(LOCAL_UT_PEX_ID),
            },
            metadata_size,
            client_version: Some("bt-engine".to_string()),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut m_entries = vec![];
        if let Some(id) = self.m.ut_metadata {
            m_entries.push((UT_METADATA_KEY.to_vec(), Value::Integer(id as i64)));
        }
        if let Some(id) = self.m.ut_pex {
            m_entries.push((UT_PEX_KEY.to_vec(), Value::Integer(id as i64)));
        }
        let mut entries = vec![(b"m".to_vec(), Value::Dict(m_entries))];
        if let Some(size) = self.metadata_size {
            entries.push((b"metadata_size".to_vec(), Value::Integer(size as i64)));
        }
        if let Some(v) = &self.client_version {
            entries.push((b"v".to_vec(), Value::Bytes(v.clone().into_bytes())));
        }
        bt_bencode::encode(&Value::Dict(entries))
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ExtendedError> {
        let value = bt_bencode::decode(buf)?;
        let m = value.get(b"m").ok_or(ExtendedError::MissingM)?;
        let ut_metadata = m
            .get(UT_METADATA_KEY)
            .and_then(Value::as_integer)
            .map(|i| i as u8);
        let ut_pex = m.get(UT_PEX_KEY).and_then(Value::as_integer).map(|i| i as u8);
        let metadata_size = value
            .get(b"metadata_size")
            .and_then(Value::as_integer)
            .map(|i| i as u32);
        let client_version = value
            .get(b"v")
            .and_then(Value::as_bytes)
            .map(|b| String::from_utf8_lossy(b).into_owned());
        Ok(Self {
            m: PeerExtensionIds { ut_metadata, ut_pex },
            metadata_size,
            client_version,
        })
    }
}

/// BEP 9 ut_metadata message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UtMetadataMessage {
    Request { piece: u32 },
    Data { piece: u32, total_size: u32, data: Vec<u8> },
    Reject { piece: u32 },
}

impl UtMetadataMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            UtMetadataMessage::Request { piece } => bt_bencode::encode(&Value::Dict(vec![
                (b"msg_type".to_vec(), Value::Integer(0)),
                (b"piece".to_vec(), Value::Integer(*piece as i64)),
            ])),
            UtMetadataMessage::Data { piece, total_size, data } => {
                let mut out = bt_bencode::encode(&Value::Dict(vec![
                    (b"msg_type".to_vec(), Value::Integer(1)),
                    (b"piece".to_vec(), Value::Integer(*piece as i64)),
                    (b"total_size".to_vec(), Value::Integer(*total_size as i64)),
                ]));
                out.extend_from_slice(data);
                out
            }
            UtMetadataMessage::Reject { piece } => bt_bencode::encode(&Value::Dict(vec![
                (b"msg_type".to_vec(), Value::Integer(2)),
                (b"piece".to_vec(), Value::Integer(*piece as i64)),
            ])),
        }
    }

    /// Decodes a ut_metadata message. Since a `Data` payload appends raw
    /// bytes after the bencoded dict (not itself bencoded), this decodes
    /// the dict prefix first and treats anything left over as the data.
    pub fn decode(buf: &[u8]) -> Result<Self, ExtendedError> {
        let dict_end = find_dict_end(buf)?;
        let value = bt_bencode::decode(&buf[..dict_end])?;
        let msg_type = value
            .get(b"msg_type")
            .and_then(Value::as_integer)
            .ok_or(ExtendedError::MissingMsgType)?;
        let piece = value.get(b"piece").and_then(Value::as_integer).unwrap_or(0) as u32;
        match msg_type {
            0 => Ok(UtMetadataMessage::Request { piece }),
            1 => {
                let total_size = value
                    .get(b"total_size")
                    .and_then(Value::as_integer)
                    .ok_or(ExtendedError::MissingTotalSize)? as u32;
                Ok(UtMetadataMessage::Data {
                    piece,
                    total_size,
                    data: buf[dict_end..].to_vec(),
                })
            }
            2 => Ok(UtMetadataMessage::Reject { piece }),
            other => Err(ExtendedError::UnknownMsgType(other)),
        }
    }
}

/// Finds the end of a bencoded dict prefix by depth-tracking `d`/`l`/`e`
/// tokens and skipping integer/bytestring payloads, so trailing raw bytes
/// (the metadata piece payload) can be split off without re-parsing them.
fn find_dict_end(buf: &[u8]) -> Result<usize, ExtendedError> {
    // Reuse the full decoder: decoding the dict will stop consuming once the
    // dict is closed, and bt_bencode's decode() enforces no-trailing-data,
    // so decode a progressively shorter prefix isn't viable; instead walk
    // manually using the same grammar.
    let mut depth = 0i32;
    let mut i = 0usize;
    loop {
        if i >= buf.len() {
            return Err(bt_bencode::Error::UnexpectedEof.into());
        }
        match buf[i] {
            b'd' | b'l' => {
                depth += 1;
                i += 1;
            }
            b'i' => {
                i += 1;
                while buf.get(i) != Some(&b'e') {
                    i += 1;
                    if i >= buf.len() {
                        return Err(bt_bencode::Error::UnexpectedEof.into());
                    }
                }
                i += 1;
            }
            b'e' => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            b'0'..=b'9' => {
                let colon = buf[i..]
                    .iter()
                    .position(|&b| b == b':')
                    .ok_or(bt_bencode::Error::UnexpectedEof)?;
                let len: usize = std::str::from_utf8(&buf[i..i + colon])
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .ok_or(bt_bencode::Error::InvalidStringLength(i))?;
                i += colon + 1 + len;
            }
            other => return Err(bt_bencode::Error::UnexpectedByte(other, i).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_roundtrip() {
        let h = ExtendedHandshake::ours(Some(1234));
        let bytes = h.encode();
        let back = ExtendedHandshake::decode(&bytes).unwrap();
        assert_eq!(back.m.ut_metadata, Some(LOCAL_UT_METADATA_ID));
        assert_eq!(back.m.ut_pex, Some(LOCAL_UT_PEX_ID));
        assert_eq!(back.metadata_size, Some(1234));
    }

    #[test]
    fn ut_metadata_request_roundtrip() {
        let m = UtMetadataMessage::Request { piece: 3 };
        let back = UtMetadataMessage::decode(&m.encode()).unwrap();
        assert_eq!(m, back);
    }

    #[test]
    fn ut_metadata_data_roundtrip_with_trailing_bytes() {
        let m = UtMetadataMessage::Data {
            piece: 0,
            total_size: 16384,
            data: vec![0xAB; 16384],
        };
        let encoded = m.encode();
        let back = UtMetadataMessage::decode(&encoded).unwrap();
        assert_eq!(m, back);
    }
}
