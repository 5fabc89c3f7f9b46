use crate::info_hash::InfoHash;

/// A parsed `magnet:?xt=urn:btih:<hash>&dn=<name>&tr=<tracker>...` link.
///
/// Not named as an operation in the original distillation, but required by
/// it implicitly (scenario: "add magnet for `<hash>`") — see `SPEC_FULL.md`
/// §3 for the grounding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MagnetLink {
    pub info_hash: InfoHash,
    pub display_name: Option<String>,
    pub trackers: Vec<String>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MagnetError {
    #[error("not a magnet link (missing magnet: scheme)")]
    NotAMagnetLink,
    #[error("missing or unsupported xt parameter (expected urn:btih:<hash>)")]
    MissingInfoHash,
    #[error("invalid infohash in xt parameter")]
    InvalidInfoHash,
}

impl MagnetLink {
    pub fn parse(uri: &str) -> Result<Self, MagnetError> {
        let rest = uri
            .strip_prefix("magnet:?")
            .ok_or(MagnetError::NotAMagnetLink)?;

        let mut info_hash = None;
        let mut display_name = None;
        let mut trackers = Vec::new();

        for pair in rest.split('&') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = percent_decode(value);
            match key {
                "xt" => {
                    if let Some(hash_str) = value.strip_prefix("urn:btih:") {
                        info_hash = Some(parse_xt_hash(hash_str)?);
                    }
                }
                "dn" => display_name = Some(value),
                "tr" => trackers.push(value),
                _ => {}
            }
        }

        Ok(MagnetLink {
            info_hash: info_hash.ok_or(MagnetError::MissingInfoHash)?,
            display_name,
            trackers,
        })
    }
}

fn parse_xt_hash(hash_str: &str) -> Result<InfoHash, MagnetError> {
    if hash_str.len() == 40 {
        InfoHash::from_hex(hash_str).ok_or(MagnetError::InvalidInfoHash)
    } else if hash_str.len() == 32 {
        // base32-encoded infohash, permitted by BEP 9 alongside hex.
        let bytes = base32_decode(hash_str).ok_or(MagnetError::InvalidInfoHash)?;
        let arr: [u8; 20] = bytes.try_into().map_err(|_| MagnetError::InvalidInfoHash)?;
        Ok(InfoHash::from_bytes(arr))
    } else {
        Err(MagnetError::InvalidInfoHash)
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// RFC 4648 base32 decode (no padding), used only for legacy base32 `xt`
/// infohashes.
fn base32_decode(s: &str) -> Option<Vec<u8>> {
    const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
    let mut bits: u64 = 0;
    let mut bit_count = 0u32;
    let mut out = Vec::new();
    for c in s.chars() {
        let c = c.to_ascii_uppercase() as u8;
        let val = ALPHABET.iter().position(|&a| a == c)? as u64;
        bits = (bits << 5) | val;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            out.push((bits >> bit_count) as u8);
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_magnet() {
        let m = MagnetLink::parse(
            "magnet:?xt=urn:btih:a1dfefec1a9dd7fa8a041ebeeea271db55126d2f&dn=My+File&tr=http%3A%2F%2Ftracker.example%2Fannounce",
        )
        .unwrap();
        assert_eq!(
            m.info_hash.to_hex(),
            "a1dfefec1a9dd7fa8a041ebeeea271db55126d2f"
        );
        assert_eq!(m.display_name.as_deref(), Some("My File"));
        assert_eq!(m.trackers, vec!["http://tracker.example/announce"]);
    }

    #[test]
    fn rejects_non_magnet_uris() {
        assert_eq!(
            MagnetLink::parse("http://example.com"),
            Err(MagnetError::NotAMagnetLink)
        );
    }

    #[test]
    fn rejects_missing_xt() {
        assert_eq!(
            MagnetLink::parse("magnet:?dn=foo"),
            Err(MagnetError::MissingInfoHash)
        );
    }
}
