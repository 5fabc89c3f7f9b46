use memchr::memchr;

use crate::{Error, Result, Value};

/// Decodes a single bencoded value, rejecting any trailing bytes.
pub fn decode(buf: &[u8]) -> Result<Value> {
    let mut dec = Decoder::new(buf);
    let v = dec.parse_value()?;
    if dec.pos != buf.len() {
        return Err(Error::TrailingData(buf.len() - dec.pos));
    }
    Ok(v)
}

pub(crate) struct Decoder<'a> {
    buf: &'a [u8],
    pub(crate) pos: usize,
}

impl<'a> Decoder<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn rest(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    fn peek(&self) -> Result<u8> {
        self.rest().first().copied().ok_or(Error::UnexpectedEof)
    }

    pub(crate) fn peek_pub(&self) -> Result<u8> {
        self.peek()
    }

    pub(crate) fn advance_one(&mut self) {
        self.pos += 1;
    }

    pub(crate) fn parse_bytestring_pub(&mut self) -> Result<&'a [u8]> {
        self.parse_bytestring()
    }

    pub(crate) fn parse_value(&mut self) -> Result<Value> {
        match self.peek()? {
            b'i' => Ok(Value::Integer(self.parse_integer()?)),
            b'l' => self.parse_list(),
            b'd' => self.parse_dict(),
            b'0'..=b'9' => Ok(Value::Bytes(self.parse_bytestring()?.to_vec())),
            other => Err(Error::UnexpectedByte(other, self.pos)),
        }
    }

    /// Parses `i<digits>e`. Leading zeros are rejected except for the
    /// literal value `i0e`; `-0` is rejected as well since it has no
    /// canonical encoding.
    fn parse_integer(&mut self) -> Result<i64> {
        debug_assert_eq!(self.peek()?, b'i');
        let start = self.pos + 1;
        let end = start + memchr(b'e', &self.buf[start..]).ok_or(Error::UnexpectedEof)?;
        let digits = &self.buf[start..end];
        validate_integer_digits(digits, start)?;
        let value: i64 = atoi::atoi(digits).ok_or(Error::InvalidInteger(start))?;
        self.pos = end + 1;
        Ok(value)
    }

    /// Parses `<len>:<bytes>`, returning a borrowed slice of the payload.
    fn parse_bytestring(&mut self) -> Result<&'a [u8]> {
        let start = self.pos;
        let colon = memchr(b':', self.rest()).ok_or(Error::UnexpectedEof)?;
        let lenbytes = &self.rest()[..colon];
        if lenbytes.is_empty() || (lenbytes.len() > 1 && lenbytes[0] == b'0') {
            return Err(Error::InvalidStringLength(start));
        }
        let len: usize = atoi::atoi(lenbytes).ok_or(Error::InvalidStringLength(start))?;
        let data_start = self.pos + colon + 1;
        let data_end = data_start
            .checked_add(len)
            .ok_or(Error::InvalidStringLength(start))?;
        let data = self
            .buf
            .get(data_start..data_end)
            .ok_or(Error::StringTooLong { offset: start, len })?;
        self.pos = data_end;
        Ok(data)
    }

    fn parse_list(&mut self) -> Result<Value> {
        debug_assert_eq!(self.peek()?, b'l');
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            if self.peek()? == b'e' {
                self.pos += 1;
                return Ok(Value::List(items));
            }
            items.push(self.parse_value()?);
        }
    }

    fn parse_dict(&mut self) -> Result<Value> {
        debug_assert_eq!(self.peek()?, b'd');
        self.pos += 1;
        let mut entries = Vec::new();
        loop {
            if self.peek()? == b'e' {
                self.pos += 1;
                return Ok(Value::Dict(entries));
            }
            let key_start = self.pos;
            if !matches!(self.peek()?, b'0'..=b'9') {
                return Err(Error::NonStringDictKey(key_start));
            }
            let key = self.parse_bytestring()?.to_vec();
            let value = self.parse_value()?;
            entries.push((key, value));
        }
    }
}

fn validate_integer_digits(digits: &[u8], offset: usize) -> Result<()> {
    if digits.is_empty() {
        return Err(Error::InvalidInteger(offset));
    }
    let (sign, rest) = match digits.first() {
        Some(b'-') => (true, &digits[1..]),
        _ => (false, digits),
    };
    if rest.is_empty() || !rest.iter().all(u8::is_ascii_digit) {
        return Err(Error::InvalidInteger(offset));
    }
    if sign && rest == b"0" {
        // "-0" has no canonical encoding.
        return Err(Error::InvalidInteger(offset));
    }
    if rest.len() > 1 && rest[0] == b'0' {
        return Err(Error::LeadingZero(offset));
    }
    Ok(())
}
