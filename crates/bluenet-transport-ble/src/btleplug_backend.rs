use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bluenet_core::PeripheralHandle;
use btleplug::api::{
    CharPropFlags, Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::BleError;
use crate::transport::{
    AdapterState, Characteristic, CharacteristicProperties, Discovery, Transport, TransportEvent,
    TransportEventSender, TransportEvents, WriteMode,
};

#[derive(Debug, Clone)]
pub struct BtleplugConfig {
    /// Scans are restarted at this interval while scanning is on.
    pub rescan_interval: Duration,
    pub command_queue_capacity: usize,
}

impl Default for BtleplugConfig {
    fn default() -> Self {
        Self {
            rescan_interval: Duration::from_secs(10),
            command_queue_capacity: 256,
        }
    }
}

#[derive(Debug)]
enum Command {
    StartScan(Vec<Uuid>),
    StopScan,
    Connect(PeripheralHandle),
    Disconnect(PeripheralHandle),
    DiscoverServices(PeripheralHandle),
    DiscoverCharacteristics(PeripheralHandle, Uuid),
    Read(PeripheralHandle, Uuid, Uuid),
    Write(PeripheralHandle, Uuid, Uuid, Vec<u8>, WriteMode),
    SetNotify(PeripheralHandle, Uuid, Uuid, bool),
}

type PeripheralMap = Arc<Mutex<HashMap<String, Peripheral>>>;
type PumpMap = Arc<Mutex<HashMap<String, tokio::task::JoinHandle<()>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// [`Transport`] backed by the host Bluetooth stack via btleplug.
///
/// The stack lives on its own thread with a current-thread runtime; requests
/// are queued to it and completions come back as [`TransportEvent`]s.
#[derive(Debug)]
pub struct BtleplugTransport {
    commands: mpsc::Sender<Command>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl BtleplugTransport {
    pub fn spawn(config: BtleplugConfig) -> (Self, TransportEvents) {
        let (commands, command_rx) = mpsc::channel(config.command_queue_capacity);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let worker = thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(err) => {
                    warn!(%err, "ble worker runtime failed to start");
                    let _ = events_tx.send(TransportEvent::AdapterStateChanged(
                        AdapterState::Unsupported,
                    ));
                    return;
                }
            };
            runtime.block_on(run_worker(config, command_rx, events_tx, shutdown_rx));
        });

        (
            Self {
                commands,
                shutdown_tx: Some(shutdown_tx),
                worker: Some(worker),
            },
            events_rx,
        )
    }

    fn submit(&self, command: Command) -> Result<(), BleError> {
        self.commands
            .try_send(command)
            .map_err(|err| BleError::Transport(format!("ble worker unavailable: {err}")))
    }
}

impl Transport for BtleplugTransport {
    fn start_scan(&self, services: &[Uuid]) -> Result<(), BleError> {
        self.submit(Command::StartScan(services.to_vec()))
    }

    fn stop_scan(&self) -> Result<(), BleError> {
        self.submit(Command::StopScan)
    }

    fn connect(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        self.submit(Command::Connect(handle.clone()))
    }

    fn disconnect(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        self.submit(Command::Disconnect(handle.clone()))
    }

    fn discover_services(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        self.submit(Command::DiscoverServices(handle.clone()))
    }

    fn discover_characteristics(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
    ) -> Result<(), BleError> {
        self.submit(Command::DiscoverCharacteristics(handle.clone(), *service))
    }

    fn read(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
        characteristic: &Uuid,
    ) -> Result<(), BleError> {
        self.submit(Command::Read(handle.clone(), *service, *characteristic))
    }

    fn write(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
        characteristic: &Uuid,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), BleError> {
        self.submit(Command::Write(
            handle.clone(),
            *service,
            *characteristic,
            data.to_vec(),
            mode,
        ))
    }

    fn set_notify(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
        characteristic: &Uuid,
        enabled: bool,
    ) -> Result<(), BleError> {
        self.submit(Command::SetNotify(
            handle.clone(),
            *service,
            *characteristic,
            enabled,
        ))
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

async fn run_worker(
    config: BtleplugConfig,
    mut commands: mpsc::Receiver<Command>,
    events: TransportEventSender,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let adapter = match first_adapter().await {
        Some(adapter) => adapter,
        None => {
            let _ = events.send(TransportEvent::AdapterStateChanged(AdapterState::Unsupported));
            return;
        }
    };
    let mut central_events = match adapter.events().await {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%err, "adapter event stream unavailable");
            let _ = events.send(TransportEvent::AdapterStateChanged(AdapterState::PoweredOff));
            return;
        }
    };
    let _ = events.send(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));

    let peripherals: PeripheralMap = Arc::new(Mutex::new(HashMap::new()));
    let pumps: PumpMap = Arc::new(Mutex::new(HashMap::new()));
    let mut scan_filter: Option<ScanFilter> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                break;
            }
            maybe_event = central_events.next() => {
                match maybe_event {
                    Some(event) => handle_event(&adapter, event, &peripherals, &pumps, &events).await,
                    None => break,
                }
            }
            Some(command) = commands.recv() => {
                match command {
                    Command::StartScan(services) => {
                        let filter = ScanFilter { services };
                        if let Err(err) = adapter.start_scan(filter.clone()).await {
                            warn!(%err, "start scan failed");
                        }
                        scan_filter = Some(filter);
                    }
                    Command::StopScan => {
                        scan_filter = None;
                        if let Err(err) = adapter.stop_scan().await {
                            warn!(%err, "stop scan failed");
                        }
                    }
                    other => {
                        tokio::spawn(run_command(other, peripherals.clone(), pumps.clone(), events.clone()));
                    }
                }
            }
            _ = tokio::time::sleep(config.rescan_interval), if scan_filter.is_some() => {
                if let Some(filter) = scan_filter.clone() {
                    let _ = adapter.start_scan(filter).await;
                }
            }
        }
    }

    for (_, pump) in lock(&pumps).drain() {
        pump.abort();
    }
}

async fn first_adapter() -> Option<Adapter> {
    let manager = Manager::new().await.ok()?;
    manager.adapters().await.ok()?.into_iter().next()
}

async fn handle_event(
    adapter: &Adapter,
    event: CentralEvent,
    peripherals: &PeripheralMap,
    pumps: &PumpMap,
    events: &TransportEventSender,
) {
    let id = match event {
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ServiceDataAdvertisement { id, .. }
        | CentralEvent::ServicesAdvertisement { id, .. } => id,
        CentralEvent::DeviceDisconnected(id) => {
            let handle = id.to_string();
            if let Some(pump) = lock(pumps).remove(&handle) {
                pump.abort();
            }
            let _ = events.send(TransportEvent::Disconnected {
                handle: PeripheralHandle::new(handle),
                error: None,
            });
            return;
        }
        _ => return,
    };

    let peripheral = match adapter.peripheral(&id).await {
        Ok(p) => p,
        Err(_) => return,
    };
    let handle = id.to_string();
    lock(peripherals).insert(handle.clone(), peripheral.clone());

    let properties = match peripheral.properties().await {
        Ok(Some(properties)) => properties,
        _ => return,
    };
    let _ = events.send(TransportEvent::Discovered(Discovery {
        handle: PeripheralHandle::new(handle),
        name: properties.local_name,
        rssi: properties.rssi.unwrap_or_default(),
        service_uuids: properties.services,
        service_data: properties.service_data,
    }));
}

fn find_peripheral(peripherals: &PeripheralMap, handle: &PeripheralHandle) -> Option<Peripheral> {
    lock(peripherals).get(handle.as_str()).cloned()
}

fn find_characteristic(
    peripheral: &Peripheral,
    service: &Uuid,
    characteristic: &Uuid,
) -> Option<btleplug::api::Characteristic> {
    peripheral
        .characteristics()
        .into_iter()
        .find(|c| c.service_uuid == *service && c.uuid == *characteristic)
}

fn to_characteristic(characteristic: &btleplug::api::Characteristic) -> Characteristic {
    let flags = characteristic.properties;
    Characteristic {
        service: characteristic.service_uuid,
        uuid: characteristic.uuid,
        properties: CharacteristicProperties {
            read: flags.contains(CharPropFlags::READ),
            write: flags.contains(CharPropFlags::WRITE),
            write_without_response: flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE),
            notify: flags.contains(CharPropFlags::NOTIFY)
                || flags.contains(CharPropFlags::INDICATE),
        },
    }
}

async fn run_command(
    command: Command,
    peripherals: PeripheralMap,
    pumps: PumpMap,
    events: TransportEventSender,
) {
    let event = match command {
        Command::StartScan(_) | Command::StopScan => return,
        Command::Connect(handle) => {
            let Some(peripheral) = find_peripheral(&peripherals, &handle) else {
                let _ = events.send(TransportEvent::ConnectFailed {
                    handle,
                    error: "peripheral not found".into(),
                });
                return;
            };
            match peripheral.connect().await {
                Ok(()) => {
                    start_notification_pump(&peripheral, &handle, &pumps, &events);
                    TransportEvent::Connected(handle)
                }
                Err(err) => TransportEvent::ConnectFailed {
                    handle,
                    error: err.to_string(),
                },
            }
        }
        Command::Disconnect(handle) => {
            let Some(peripheral) = find_peripheral(&peripherals, &handle) else {
                let _ = events.send(TransportEvent::Disconnected { handle, error: None });
                return;
            };
            // Success is reported through `DeviceDisconnected`.
            match peripheral.disconnect().await {
                Ok(()) => return,
                Err(err) => TransportEvent::Disconnected {
                    handle,
                    error: Some(err.to_string()),
                },
            }
        }
        Command::DiscoverServices(handle) => {
            let result = match find_peripheral(&peripherals, &handle) {
                Some(peripheral) => match peripheral.discover_services().await {
                    Ok(()) => Ok(peripheral.services().iter().map(|s| s.uuid).collect()),
                    Err(err) => Err(err.to_string()),
                },
                None => Err("peripheral not found".into()),
            };
            TransportEvent::ServicesDiscovered { handle, result }
        }
        Command::DiscoverCharacteristics(handle, service) => {
            let result = match find_peripheral(&peripherals, &handle) {
                Some(peripheral) => Ok(peripheral
                    .characteristics()
                    .iter()
                    .filter(|c| c.service_uuid == service)
                    .map(to_characteristic)
                    .collect()),
                None => Err("peripheral not found".into()),
            };
            TransportEvent::CharacteristicsDiscovered {
                handle,
                service,
                result,
            }
        }
        Command::Read(handle, service, characteristic) => {
            let result = match gatt_target(&peripherals, &handle, &service, &characteristic) {
                Ok((peripheral, target)) => {
                    peripheral.read(&target).await.map_err(|err| err.to_string())
                }
                Err(err) => Err(err),
            };
            TransportEvent::ValueUpdated {
                handle,
                service,
                characteristic,
                result,
            }
        }
        Command::Write(handle, service, characteristic, data, mode) => {
            let write_type = match mode {
                WriteMode::WithResponse => WriteType::WithResponse,
                WriteMode::WithoutResponse => WriteType::WithoutResponse,
            };
            let result = match gatt_target(&peripherals, &handle, &service, &characteristic) {
                Ok((peripheral, target)) => peripheral
                    .write(&target, &data, write_type)
                    .await
                    .map_err(|err| err.to_string()),
                Err(err) => Err(err),
            };
            if mode == WriteMode::WithoutResponse {
                if let Err(err) = result {
                    debug!(%handle, %characteristic, %err, "write without response failed");
                }
                return;
            }
            TransportEvent::WriteCompleted {
                handle,
                service,
                characteristic,
                result,
            }
        }
        Command::SetNotify(handle, service, characteristic, enabled) => {
            let result = match gatt_target(&peripherals, &handle, &service, &characteristic) {
                Ok((peripheral, target)) => {
                    let outcome = if enabled {
                        peripheral.subscribe(&target).await
                    } else {
                        peripheral.unsubscribe(&target).await
                    };
                    outcome.map(|()| enabled).map_err(|err| err.to_string())
                }
                Err(err) => Err(err),
            };
            TransportEvent::NotifyStateChanged {
                handle,
                service,
                characteristic,
                result,
            }
        }
    };
    let _ = events.send(event);
}

fn gatt_target(
    peripherals: &PeripheralMap,
    handle: &PeripheralHandle,
    service: &Uuid,
    characteristic: &Uuid,
) -> Result<(Peripheral, btleplug::api::Characteristic), String> {
    let peripheral =
        find_peripheral(peripherals, handle).ok_or_else(|| "peripheral not found".to_string())?;
    let target = find_characteristic(&peripheral, service, characteristic)
        .ok_or_else(|| "characteristic not found".to_string())?;
    Ok((peripheral, target))
}

fn start_notification_pump(
    peripheral: &Peripheral,
    handle: &PeripheralHandle,
    pumps: &PumpMap,
    events: &TransportEventSender,
) {
    if lock(pumps).contains_key(handle.as_str()) {
        return;
    }
    let peripheral = peripheral.clone();
    let pump_handle = handle.clone();
    let events = events.clone();
    let task = tokio::spawn(async move {
        let Ok(mut notifications) = peripheral.notifications().await else {
            return;
        };
        while let Some(notification) = notifications.next().await {
            let service = peripheral
                .characteristics()
                .iter()
                .find(|c| c.uuid == notification.uuid)
                .map(|c| c.service_uuid)
                .unwrap_or_default();
            let _ = events.send(TransportEvent::ValueUpdated {
                handle: pump_handle.clone(),
                service,
                characteristic: notification.uuid,
                result: Ok(notification.value),
            });
        }
    });
    lock(pumps).insert(handle.to_string(), task);
}
