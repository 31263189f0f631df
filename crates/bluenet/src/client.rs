use std::sync::atomic::Ordering;
use std::sync::Arc;

use bluenet_codec::ServiceDataDecoder;
use bluenet_core::PeripheralHandle;
use bluenet_crypto::Aes128EcbCipher;
use bluenet_transport_ble::{
    AdapterState, BleScheduler, ConnectionProfile, Transport, TransportEvents,
};
use tokio::task::JoinHandle;
use tracing::{info, info_span, Span};

use crate::config::BluenetConfig;
use crate::error::BluenetError;
use crate::events::{EventBus, EventStream};
use crate::handlers::{ConfigHandler, DfuHandler, SetupHandler, StateHandler};
use crate::relay::{run_relay, EncryptionSettings, RelayState};

/// Entry point of the library.
///
/// Owns the scheduler, the advertisement decoder and the event bus. Must be
/// created inside a tokio runtime.
pub struct Bluenet {
    config: BluenetConfig,
    scheduler: BleScheduler,
    decoder: ServiceDataDecoder,
    bus: EventBus,
    relay_state: Arc<RelayState>,
    relay: JoinHandle<()>,
    span: Span,
}

impl Bluenet {
    pub fn new(
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        config: BluenetConfig,
    ) -> Self {
        let span = info_span!("bluenet", app = %config.app_name);
        let scheduler = BleScheduler::with_span(
            transport,
            events,
            config.scheduler.clone(),
            info_span!(parent: &span, "ble_scheduler"),
        );
        let decoder = ServiceDataDecoder::new(config.decoder.clone(), Arc::new(Aes128EcbCipher))
            .with_span(info_span!(parent: &span, "service_data"));
        let bus = EventBus::new(config.event_bus_capacity);
        let relay_state = Arc::new(RelayState::new(config.battery_saving));
        let relay = tokio::spawn(run_relay(
            scheduler.subscribe(),
            bus.clone(),
            relay_state.clone(),
            decoder.clone(),
            span.clone(),
        ));
        info!(parent: &span, battery_saving = config.battery_saving, "bluenet started");
        Self {
            config,
            scheduler,
            decoder,
            bus,
            relay_state,
            relay,
            span,
        }
    }

    pub fn config(&self) -> &BluenetConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &BleScheduler {
        &self.scheduler
    }

    pub fn decoder(&self) -> &ServiceDataDecoder {
        &self.decoder
    }

    pub fn events(&self) -> &EventBus {
        &self.bus
    }

    /// Shorthand for `events().on(name)`.
    pub fn on(&self, name: &str) -> EventStream {
        self.bus.on(name)
    }

    pub fn set_settings(&self, settings: EncryptionSettings) {
        info!(
            parent: &self.span,
            encryption = settings.encryption_enabled,
            reference_id = settings.reference_id.as_deref().unwrap_or(""),
            "settings updated"
        );
        self.relay_state.set_settings(settings);
    }

    /// While enabled, advertisements are neither decoded nor emitted.
    pub fn set_battery_saving(&self, enabled: bool) {
        self.relay_state
            .battery_saving
            .store(enabled, Ordering::Relaxed);
        info!(parent: &self.span, enabled, "battery saving");
    }

    pub fn battery_saving(&self) -> bool {
        self.relay_state.battery_saving.load(Ordering::Relaxed)
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.scheduler.adapter_state()
    }

    pub async fn is_ready(&self) {
        self.scheduler.is_ready().await
    }

    pub fn start_scanning(&self) -> Result<(), BluenetError> {
        Ok(self.scheduler.start_scanning()?)
    }

    pub fn start_scanning_for_service(&self, service: &str) -> Result<(), BluenetError> {
        Ok(self.scheduler.start_scanning_for_service(service)?)
    }

    pub fn stop_scanning(&self) -> Result<(), BluenetError> {
        Ok(self.scheduler.stop_scanning()?)
    }

    /// Connects and detects which characteristic set the peripheral uses.
    pub async fn connect(&self, handle: &PeripheralHandle) -> Result<ConnectionProfile, BluenetError> {
        self.scheduler.connect(handle).await?;
        Ok(self.scheduler.detect_connection_profile(handle).await?)
    }

    pub async fn disconnect(&self, handle: &PeripheralHandle) -> Result<(), BluenetError> {
        Ok(self.scheduler.disconnect(handle).await?)
    }

    pub fn state(&self) -> StateHandler {
        StateHandler::new(self.scheduler.clone())
    }

    pub fn config_handler(&self) -> ConfigHandler {
        ConfigHandler::new(self.scheduler.clone())
    }

    pub fn setup(&self) -> SetupHandler {
        SetupHandler::new(self.scheduler.clone(), self.config.write_verify_max_retries)
    }

    pub fn dfu(&self) -> DfuHandler {
        DfuHandler::new(self.scheduler.clone())
    }
}

impl Drop for Bluenet {
    fn drop(&mut self) {
        self.relay.abort();
    }
}
