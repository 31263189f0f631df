use thiserror::Error;

/// Errors returned by packet codec operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// A response did not have the length its header announced.
    #[error("incorrect response length: expected {expected}, got {actual}")]
    IncorrectResponseLength { expected: usize, actual: usize },
    /// A field read ran past the end of the buffer.
    #[error("invalid data length: needed {needed} more bytes, {remaining} left")]
    InvalidDataLength { needed: usize, remaining: usize },
    /// A service-data frame was neither 17 nor 18 bytes long.
    #[error("invalid service data frame length: {0}")]
    InvalidFrameLength(usize),
    /// The command has no encoding in the selected protocol version.
    #[error("unsupported in this protocol version: {0}")]
    Unsupported(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(
            CodecError::IncorrectResponseLength {
                expected: 6,
                actual: 4
            }
            .to_string(),
            "incorrect response length: expected 6, got 4"
        );
        assert_eq!(
            CodecError::InvalidDataLength {
                needed: 4,
                remaining: 1
            }
            .to_string(),
            "invalid data length: needed 4 more bytes, 1 left"
        );
        assert_eq!(
            CodecError::InvalidFrameLength(3).to_string(),
            "invalid service data frame length: 3"
        );
        assert_eq!(
            CodecError::Unsupported("get state").to_string(),
            "unsupported in this protocol version: get state"
        );
    }
}
