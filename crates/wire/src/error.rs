/// Decode-side failures. Every variant means the frame is malformed and the
/// connection cannot be resynchronized.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown type tag {0:#04x}")]
    UnknownTag(u8),
    #[error("unexpected end-of-value marker")]
    UnexpectedEnd,
    #[error("invalid bcd nibble {0:#03x}")]
    BadBcdDigit(u8),
    #[error("name dictionary index {0} out of range")]
    BadDictIndex(u16),
    #[error("invalid utf-8 in {0}")]
    BadUtf8(&'static str),
    #[error("missing value terminator")]
    MissingTerminator,
}
