/// Errors raised by tree accessors and conversions.
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("member \"{0}\" not found")]
    MemberNotFound(String),
    #[error("member index {index} out of range ({len} members)")]
    MemberIndexOutOfRange { index: usize, len: usize },
    #[error("cannot convert {kind} value {value:?} to {target}")]
    Conversion {
        kind: &'static str,
        value: String,
        target: &'static str,
    },
    #[error("null value cannot convert to {0}")]
    NullConversion(&'static str),
    #[error("invalid path \"{path}\": {reason}")]
    InvalidPath { path: String, reason: &'static str },
}

impl SerializationError {
    pub(crate) fn conversion(
        kind: &'static str,
        value: impl ToString,
        target: &'static str,
    ) -> Self {
        SerializationError::Conversion {
            kind,
            value: value.to_string(),
            target,
        }
    }
}
