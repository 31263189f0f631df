use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of operation a Task Slot stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationType {
    Connect,
    Disconnect,
    CancelPendingConnection,
    AwaitDisconnect,
    ErrorDisconnect,
    GetServices,
    GetCharacteristics,
    ReadCharacteristic,
    WriteCharacteristic,
    EnableNotifications,
    DisableNotifications,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::CancelPendingConnection => "cancelPendingConnection",
            Self::AwaitDisconnect => "awaitDisconnect",
            Self::ErrorDisconnect => "errorDisconnect",
            Self::GetServices => "getServices",
            Self::GetCharacteristics => "getCharacteristics",
            Self::ReadCharacteristic => "readCharacteristic",
            Self::WriteCharacteristic => "writeCharacteristic",
            Self::EnableNotifications => "enableNotifications",
            Self::DisableNotifications => "disableNotifications",
        }
    }

    /// Slots of these kinds complete on any disconnect event, errored or not.
    pub fn completes_on_disconnect(&self) -> bool {
        matches!(
            self,
            Self::CancelPendingConnection | Self::AwaitDisconnect | Self::ErrorDisconnect
        )
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by scheduler operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BleError {
    #[error("not connected")]
    NotConnected,
    #[error("peripheral disconnected")]
    Disconnected,
    #[error("{0} timed out")]
    Timeout(OperationType),
    #[error("notification stream timed out")]
    NotificationStreamTimeout,
    #[error("service not found")]
    ServiceNotFound,
    #[error("characteristic not found")]
    CharacteristicNotFound,
    #[error("connection cancelled")]
    ConnectionCancelled,
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("invalid uuid: {0}")]
    InvalidUuid(String),
    #[error("{0} replaced by another operation")]
    ReplacedByOtherOperation(OperationType),
    #[error("bluetooth adapter not powered on")]
    NotInitialized,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("peripheral reported no services")]
    NoServices,
    #[error("service has no characteristics")]
    NoCharacteristics,
    #[error("scheduler closed")]
    SchedulerClosed,
}

impl From<bluenet_core::CoreError> for BleError {
    fn from(value: bluenet_core::CoreError) -> Self {
        match value {
            bluenet_core::CoreError::InvalidUuid(id) => Self::InvalidUuid(id),
            other => Self::Transport(other.to_string()),
        }
    }
}
