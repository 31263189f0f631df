//! Named library events for application code.

use bluenet_codec::Advertisement;
use bluenet_core::PeripheralHandle;
use bluenet_transport_ble::AdapterState;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

pub const BLE_STATUS: &str = "bleStatus";
pub const CONNECTED_TO_PERIPHERAL: &str = "connectedToPeripheral";
pub const CONNECTED_TO_PERIPHERAL_FAILED: &str = "connectedToPeripheralFailed";
pub const DISCONNECTED_FROM_PERIPHERAL: &str = "disconnectedFromPeripheral";
pub const RAW_ADVERTISEMENT_DATA: &str = "rawAdvertisementData";

/// Serializes as `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum BluenetEvent {
    BleStatus(AdapterState),
    ConnectedToPeripheral(PeripheralHandle),
    ConnectedToPeripheralFailed(PeripheralHandle),
    DisconnectedFromPeripheral(PeripheralHandle),
    RawAdvertisementData(Box<Advertisement>),
}

impl BluenetEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::BleStatus(_) => BLE_STATUS,
            Self::ConnectedToPeripheral(_) => CONNECTED_TO_PERIPHERAL,
            Self::ConnectedToPeripheralFailed(_) => CONNECTED_TO_PERIPHERAL_FAILED,
            Self::DisconnectedFromPeripheral(_) => DISCONNECTED_FROM_PERIPHERAL,
            Self::RawAdvertisementData(_) => RAW_ADVERTISEMENT_DATA,
        }
    }
}

/// Fan-out of [`BluenetEvent`]s to any number of listeners.
///
/// Slow listeners lose the oldest events instead of blocking the emitter.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BluenetEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns how many listeners received the event.
    pub fn emit(&self, event: BluenetEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            name: None,
        }
    }

    /// Listens for one event name only.
    pub fn on(&self, name: &str) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            name: Some(name.to_string()),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct EventStream {
    rx: broadcast::Receiver<BluenetEvent>,
    name: Option<String>,
}

impl EventStream {
    fn accepts(&self, event: &BluenetEvent) -> bool {
        self.name.as_deref().map_or(true, |name| name == event.name())
    }

    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<BluenetEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event that is already queued.
    pub fn try_recv(&mut self) -> Option<BluenetEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.accepts(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event listener lagged");
                }
                Err(_) => return None,
            }
        }
    }
}
