//! Republishes scheduler events on the [`EventBus`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use bluenet_codec::{Advertisement, ServiceDataDecoder};
use bluenet_crypto::SphereKeys;
use bluenet_transport_ble::{Discovery, SchedulerEvent};
use tokio::sync::broadcast;
use tracing::{debug, warn, Span};

use crate::events::{BluenetEvent, EventBus};

/// Keys used to decrypt advertisements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncryptionSettings {
    pub encryption_enabled: bool,
    pub keys: SphereKeys,
    /// Tagged onto every relayed advertisement.
    pub reference_id: Option<String>,
}

/// State shared between the facade and its relay task.
#[derive(Debug, Default)]
pub(crate) struct RelayState {
    pub(crate) battery_saving: AtomicBool,
    pub(crate) settings: RwLock<EncryptionSettings>,
}

impl RelayState {
    pub(crate) fn new(battery_saving: bool) -> Self {
        Self {
            battery_saving: AtomicBool::new(battery_saving),
            settings: RwLock::default(),
        }
    }

    fn settings(&self) -> EncryptionSettings {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_settings(&self, settings: EncryptionSettings) {
        *self
            .settings
            .write()
            .unwrap_or_else(PoisonError::into_inner) = settings;
    }
}

/// Builds and decodes the advertisement for one discovery, or `None` in
/// battery-saving mode.
pub(crate) fn advertisement_for(
    discovery: Discovery,
    state: &RelayState,
    decoder: &ServiceDataDecoder,
) -> Option<Advertisement> {
    if state.battery_saving.load(Ordering::Relaxed) {
        return None;
    }
    let settings = state.settings();
    let mut ad = Advertisement::new(
        discovery.handle,
        discovery.name,
        discovery.rssi,
        discovery.service_uuids,
        discovery.service_data,
        decoder,
    );
    if settings.encryption_enabled {
        if let Some(key) = settings.keys.advertisement_key() {
            ad.decrypt(key, decoder);
        }
    }
    if let Some(reference_id) = settings.reference_id {
        ad = ad.with_reference_id(reference_id);
    }
    Some(ad)
}

fn translate(
    event: SchedulerEvent,
    state: &RelayState,
    decoder: &ServiceDataDecoder,
) -> Option<BluenetEvent> {
    match event {
        SchedulerEvent::AdapterState(adapter) => Some(BluenetEvent::BleStatus(adapter)),
        SchedulerEvent::Discovered(discovery) => advertisement_for(discovery, state, decoder)
            .map(|ad| BluenetEvent::RawAdvertisementData(Box::new(ad))),
        SchedulerEvent::Connected(handle) => Some(BluenetEvent::ConnectedToPeripheral(handle)),
        SchedulerEvent::ConnectFailed { handle, .. } => {
            Some(BluenetEvent::ConnectedToPeripheralFailed(handle))
        }
        SchedulerEvent::Disconnected { handle, .. } => {
            Some(BluenetEvent::DisconnectedFromPeripheral(handle))
        }
    }
}

/// Runs until the scheduler's event channel closes.
pub(crate) async fn run_relay(
    mut events: broadcast::Receiver<SchedulerEvent>,
    bus: EventBus,
    state: Arc<RelayState>,
    decoder: ServiceDataDecoder,
    span: Span,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(parent: &span, skipped, "relay lagged behind scheduler events");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        if let Some(event) = translate(event, &state, &decoder) {
            bus.emit(event);
        }
    }
    debug!(parent: &span, "event relay stopped");
}
