use thiserror::Error;

/// Errors raised by the shared primitives.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Not a GATT UUID in either the 16-bit or the 128-bit form.
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
    /// The advertisement decryptor refused the block.
    #[error("decryption failed: {0}")]
    Decrypt(&'static str),
}

#[cfg(test)]
mod tests {
    use super::CoreError;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(
            CoreError::InvalidUuid("C0O1".into()).to_string(),
            "invalid uuid: C0O1"
        );
        assert_eq!(
            CoreError::Decrypt("invalid key").to_string(),
            "decryption failed: invalid key"
        );
    }
}
