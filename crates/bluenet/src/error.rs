use std::path::PathBuf;

use bluenet_codec::packets::{ResultValue, StateType};
use bluenet_codec::CodecError;
use bluenet_crypto::CipherError;
use bluenet_transport_ble::BleError;
use thiserror::Error;

/// Errors returned by the library facade and its protocol handlers.
#[derive(Debug, Error)]
pub enum BluenetError {
    /// A value outside the range the firmware accepts.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    #[error("invalid tx power value: {0}")]
    InvalidTxPower(i32),
    /// Read-back never matched the written value.
    #[error("cannot write and verify config type {}", type_code(.0))]
    CannotWriteAndVerify(StateType),
    /// A v2 result packet carried a non-success code.
    #[error("command rejected by peripheral: {0:?}")]
    CommandRejected(ResultValue),
    #[error(transparent)]
    Ble(#[from] BleError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("logging already initialised: {0}")]
    Logging(String),
}

fn type_code(ty: &StateType) -> u16 {
    ty.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use bluenet_transport_ble::OperationType;

    #[test]
    fn error_messages_are_stable() {
        assert_eq!(
            BluenetError::InvalidInput("mesh channel").to_string(),
            "invalid input: mesh channel"
        );
        assert_eq!(
            BluenetError::InvalidTxPower(3).to_string(),
            "invalid tx power value: 3"
        );
        assert_eq!(
            BluenetError::CannotWriteAndVerify(StateType::KEY_ADMIN).to_string(),
            "cannot write and verify config type 35"
        );
        assert_eq!(
            BluenetError::CommandRejected(ResultValue::Busy).to_string(),
            "command rejected by peripheral: Busy"
        );
        assert_eq!(
            BluenetError::from(BleError::Timeout(OperationType::ReadCharacteristic)).to_string(),
            "readCharacteristic timed out"
        );
        assert_eq!(
            BluenetError::from(CodecError::IncorrectResponseLength {
                expected: 4,
                actual: 2
            })
            .to_string(),
            "incorrect response length: expected 4, got 2"
        );
    }
}
