use bytes::{BufMut, Bytes, BytesMut};

/// Lower-case hex, no separators. Raw EFA addresses are 32 bytes so the
/// output stays on one log line.
pub fn fmt_hex(f: &mut std::fmt::Formatter<'_>, bytes: &[u8]) -> std::fmt::Result {
    bytes.iter().try_for_each(|x| write!(f, "{x:02x}"))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HexError {
    #[error("empty hex string")]
    Empty,
    #[error("odd number of hex digits: {0}")]
    OddLength(usize),
    #[error("invalid hex digit at offset {0}")]
    InvalidDigit(usize),
}

/// Parse a hex string, with or without a leading `0x`.
pub fn from_hex(s: &str) -> Result<Bytes, HexError> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    if s.is_empty() {
        return Err(HexError::Empty);
    }
    if !s.len().is_multiple_of(2) {
        return Err(HexError::OddLength(s.len()));
    }
    let mut bytes = BytesMut::with_capacity(s.len() / 2);
    for (i, pair) in s.as_bytes().chunks_exact(2).enumerate() {
        let hi = hex_digit(pair[0]).ok_or(HexError::InvalidDigit(i * 2))?;
        let lo = hex_digit(pair[1]).ok_or(HexError::InvalidDigit(i * 2 + 1))?;
        bytes.put_u8((hi << 4) | lo);
    }
    Ok(bytes.freeze())
}

fn hex_digit(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
