//! Bencode codec: a dynamic [`Value`] tree plus raw byte-span extraction.
//!
//! Dict key order is preserved on decode and is sorted lexicographically on
//! encode, so `encode(decode(x)) == x` for any canonically-encoded `x`
//! (bencode requires sorted keys, so any valid torrent file is already
//! canonical).

mod decode;
mod encode;
mod raw_info;
mod value;

pub use decode::decode;
pub use encode::encode;
pub use raw_info::extract_raw_info;
pub use value::Value;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("unexpected end of input")]
    UnexpectedEof,
    #[error("invalid integer at offset {0}")]
    InvalidInteger(usize),
    #[error("leading zero in integer at offset {0}")]
    LeadingZero(usize),
    #[error("invalid byte-string length at offset {0}")]
    InvalidStringLength(usize),
    #[error("byte-string length {len} at offset {offset} exceeds remaining input")]
    StringTooLong { offset: usize, len: usize },
    #[error("dict keys must be byte-strings (offset {0})")]
    NonStringDictKey(usize),
    #[error("unexpected trailing byte {0:#04x} at offset {1}")]
    UnexpectedByte(u8, usize),
    #[error("{0} bytes remaining after a complete value")]
    TrailingData(usize),
    #[error("the top-level value is not a dict, or has no \"info\" key")]
    MissingInfoDict,
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_scalar_values() {
        for (raw, expected) in [
            ("i0e", Value::Integer(0)),
            ("i-42e", Value::Integer(-42)),
            ("4:spam", Value::Bytes(b"spam".to_vec())),
            ("0:", Value::Bytes(vec![])),
        ] {
            let v = decode(raw.as_bytes()).unwrap();
            assert_eq!(v, expected);
            assert_eq!(encode(&v), raw.as_bytes());
        }
    }

    #[test]
    fn decode_rejects_leading_zero() {
        assert_eq!(decode(b"i03e"), Err(Error::LeadingZero(1)));
        assert_eq!(decode(b"i0e"), Ok(Value::Integer(0)));
    }

    #[test]
    fn decode_rejects_truncation() {
        assert_eq!(decode(b"4:sp"), Err(Error::StringTooLong { offset: 2, len: 4 }));
        assert_eq!(decode(b"i42"), Err(Error::UnexpectedEof));
        assert_eq!(decode(b"l4:spam"), Err(Error::UnexpectedEof));
    }

    #[test]
    fn dict_key_order_preserved_on_decode_sorted_on_encode() {
        let raw = b"d3:zzzi1e1:ai2ee";
        let v = decode(raw).unwrap();
        match &v {
            Value::Dict(entries) => {
                assert_eq!(entries[0].0, b"zzz");
                assert_eq!(entries[1].0, b"a");
            }
            _ => panic!("expected dict"),
        }
        // encode re-sorts lexicographically, as bencode requires.
        assert_eq!(encode(&v), b"d1:ai2e3:zzzi1ee");
    }

    #[test]
    fn list_of_mixed_values() {
        let raw = b"l4:spami42eli1ei2eee";
        let v = decode(raw).unwrap();
        assert_eq!(
            v,
            Value::List(vec![
                Value::Bytes(b"spam".to_vec()),
                Value::Integer(42),
                Value::List(vec![Value::Integer(1), Value::Integer(2)]),
            ])
        );
        assert_eq!(encode(&v), raw);
    }

    #[test]
    fn trailing_data_is_an_error() {
        assert_eq!(decode(b"i1ei2e"), Err(Error::TrailingData(4)));
    }
}
