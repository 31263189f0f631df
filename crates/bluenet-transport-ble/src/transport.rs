//! Transport adapter seam.
//!
//! A [`Transport`] only issues requests. Completions, failures and
//! unsolicited traffic come back as [`TransportEvent`]s on the channel the
//! transport was created with, and the scheduler's event loop consumes them.

use std::collections::HashMap;

use bluenet_core::PeripheralHandle;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::BleError;

/// Receiving end handed to the scheduler.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;
/// Sending end kept by transport implementations.
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Power state of the local Bluetooth adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AdapterState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Resetting => "resetting",
            Self::Unsupported => "unsupported",
            Self::Unauthorized => "unauthorized",
            Self::PoweredOff => "poweredOff",
            Self::PoweredOn => "poweredOn",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub write_without_response: bool,
    pub notify: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Characteristic {
    pub service: Uuid,
    pub uuid: Uuid,
    pub properties: CharacteristicProperties,
}

/// Fields of one received advertisement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discovery {
    pub handle: PeripheralHandle,
    pub name: Option<String>,
    pub rssi: i16,
    pub service_uuids: Vec<Uuid>,
    pub service_data: HashMap<Uuid, Vec<u8>>,
}

/// Everything a transport reports back.
///
/// `Err(String)` carries the native stack error unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    AdapterStateChanged(AdapterState),
    Discovered(Discovery),
    Connected(PeripheralHandle),
    ConnectFailed {
        handle: PeripheralHandle,
        error: String,
    },
    Disconnected {
        handle: PeripheralHandle,
        error: Option<String>,
    },
    ServicesDiscovered {
        handle: PeripheralHandle,
        result: Result<Vec<Uuid>, String>,
    },
    CharacteristicsDiscovered {
        handle: PeripheralHandle,
        service: Uuid,
        result: Result<Vec<Characteristic>, String>,
    },
    /// Read completion or unsolicited notification.
    ValueUpdated {
        handle: PeripheralHandle,
        service: Uuid,
        characteristic: Uuid,
        result: Result<Vec<u8>, String>,
    },
    WriteCompleted {
        handle: PeripheralHandle,
        service: Uuid,
        characteristic: Uuid,
        result: Result<(), String>,
    },
    NotifyStateChanged {
        handle: PeripheralHandle,
        service: Uuid,
        characteristic: Uuid,
        result: Result<bool, String>,
    },
}

impl TransportEvent {
    pub fn handle(&self) -> Option<&PeripheralHandle> {
        match self {
            Self::AdapterStateChanged(_) => None,
            Self::Discovered(discovery) => Some(&discovery.handle),
            Self::Connected(handle) => Some(handle),
            Self::ConnectFailed { handle, .. }
            | Self::Disconnected { handle, .. }
            | Self::ServicesDiscovered { handle, .. }
            | Self::CharacteristicsDiscovered { handle, .. }
            | Self::ValueUpdated { handle, .. }
            | Self::WriteCompleted { handle, .. }
            | Self::NotifyStateChanged { handle, .. } => Some(handle),
        }
    }
}

/// Request side of a BLE stack.
///
/// Every method returns as soon as the request is queued. An `Err` means
/// the request could not even be issued; otherwise exactly one completion
/// event follows (except for scanning and `WithoutResponse` writes).
pub trait Transport: Send + Sync {
    fn start_scan(&self, services: &[Uuid]) -> Result<(), BleError>;
    fn stop_scan(&self) -> Result<(), BleError>;
    fn connect(&self, handle: &PeripheralHandle) -> Result<(), BleError>;
    fn disconnect(&self, handle: &PeripheralHandle) -> Result<(), BleError>;
    fn discover_services(&self, handle: &PeripheralHandle) -> Result<(), BleError>;
    fn discover_characteristics(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
    ) -> Result<(), BleError>;
    fn read(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
        characteristic: &Uuid,
    ) -> Result<(), BleError>;
    fn write(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
        characteristic: &Uuid,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), BleError>;
    fn set_notify(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
        characteristic: &Uuid,
        enabled: bool,
    ) -> Result<(), BleError>;
}
