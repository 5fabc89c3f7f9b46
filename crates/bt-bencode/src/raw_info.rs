use crate::decode::Decoder;
use crate::{Error, Result};

/// Returns the exact byte span of the `info` dict inside a `.torrent` file,
/// without re-encoding anything.
///
/// `InfoHash = SHA-1(raw info bytes)`, and bencode dicts are not guaranteed
/// to round-trip byte-for-byte through a re-encode if a torrent in the wild
/// was produced with non-canonical key order or an encoder with different
/// formatting choices — so the hash must be computed over the original
/// bytes, never over `encode(decode(bytes))`.
pub fn extract_raw_info(torrent_bytes: &[u8]) -> Result<&[u8]> {
    let mut dec = Decoder::new(torrent_bytes);
    if dec.peek_pub()? != b'd' {
        return Err(Error::MissingInfoDict);
    }
    dec.advance_one();

    loop {
        if dec.peek_pub()? == b'e' {
            return Err(Error::MissingInfoDict);
        }
        let key = dec.parse_bytestring_pub()?.to_vec();
        let value_start = dec.pos;
        dec.parse_value()?;
        let value_end = dec.pos;
        if key == b"info" {
            return Ok(&torrent_bytes[value_start..value_end]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sha1::{Digest, Sha1};

    #[test]
    fn extracts_info_span_and_hashes_correctly() {
        // d8:announce3:foo4:infod6:lengthi10e4:nameee
        let raw = b"d8:announce3:foo4:infod6:lengthi10e4:nameee";
        let info = extract_raw_info(raw).unwrap();
        assert_eq!(info, b"d6:lengthi10e4:nameee");

        let mut hasher = Sha1::new();
        hasher.update(info);
        let digest = hasher.finalize();
        assert_eq!(digest.len(), 20);
    }

    #[test]
    fn missing_info_key_is_an_error() {
        let raw = b"d8:announce3:fooe";
        assert_eq!(extract_raw_info(raw), Err(Error::MissingInfoDict));
    }
}
