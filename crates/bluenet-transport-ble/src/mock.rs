//! In-memory transport for tests and simulations.
//!
//! Every request is recorded. Unless muted, the mock answers each request
//! with the completion event a real stack would send, using a scripted
//! GATT table per peripheral.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bluenet_core::PeripheralHandle;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::BleError;
use crate::transport::{
    AdapterState, Characteristic, CharacteristicProperties, Discovery, Transport, TransportEvent,
    TransportEventSender, TransportEvents, WriteMode,
};

/// A request as the mock received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    StartScan(Vec<Uuid>),
    StopScan,
    Connect(PeripheralHandle),
    Disconnect(PeripheralHandle),
    DiscoverServices(PeripheralHandle),
    DiscoverCharacteristics(PeripheralHandle, Uuid),
    Read(PeripheralHandle, Uuid, Uuid),
    Write {
        handle: PeripheralHandle,
        service: Uuid,
        characteristic: Uuid,
        data: Vec<u8>,
        mode: WriteMode,
    },
    SetNotify {
        handle: PeripheralHandle,
        service: Uuid,
        characteristic: Uuid,
        enabled: bool,
    },
}

/// Request kinds that can be left unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    Connect,
    Disconnect,
    Discovery,
    Read,
    Write,
    Notify,
}

/// Scripted GATT table of one peripheral.
#[derive(Debug, Clone, Default)]
pub struct MockPeripheral {
    services: BTreeMap<Uuid, Vec<Characteristic>>,
    values: HashMap<(Uuid, Uuid), Vec<u8>>,
}

impl MockPeripheral {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a service with fully capable characteristics.
    pub fn with_service(mut self, service: Uuid, characteristics: &[Uuid]) -> Self {
        let entries = characteristics
            .iter()
            .map(|uuid| Characteristic {
                service,
                uuid: *uuid,
                properties: CharacteristicProperties {
                    read: true,
                    write: true,
                    write_without_response: true,
                    notify: true,
                },
            })
            .collect();
        self.services.insert(service, entries);
        self
    }

    pub fn with_value(mut self, service: Uuid, characteristic: Uuid, value: Vec<u8>) -> Self {
        self.values.insert((service, characteristic), value);
        self
    }
}

type WriteResponder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// What a scripted responder does with its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Notify,
    Store,
}

struct Notifier {
    written: Uuid,
    service: Uuid,
    characteristic: Uuid,
    delivery: Delivery,
    respond: WriteResponder,
}

#[derive(Default)]
struct MockState {
    calls: Vec<TransportCall>,
    peripherals: HashMap<PeripheralHandle, MockPeripheral>,
    connected: HashSet<PeripheralHandle>,
    muted: HashSet<CallKind>,
    notifiers: Vec<Notifier>,
}

pub struct MockTransport {
    state: Mutex<MockState>,
    events: TransportEventSender,
}

impl MockTransport {
    /// Creates a powered-on mock and the event stream for the scheduler.
    pub fn new() -> (Arc<Self>, TransportEvents) {
        let (mock, events) = Self::unpowered();
        mock.emit(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
        (mock, events)
    }

    /// Creates a mock whose adapter has not reported any state yet.
    pub fn unpowered() -> (Arc<Self>, TransportEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mock = Arc::new(Self {
            state: Mutex::new(MockState::default()),
            events: tx,
        });
        (mock, rx)
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_peripheral(&self, handle: impl Into<PeripheralHandle>, peripheral: MockPeripheral) {
        self.lock().peripherals.insert(handle.into(), peripheral);
    }

    /// Stops answering one kind of request; the scheduler then hits its deadline.
    pub fn mute(&self, kind: CallKind) {
        self.lock().muted.insert(kind);
    }

    pub fn unmute(&self, kind: CallKind) {
        self.lock().muted.remove(&kind);
    }

    /// After every write to `written`, notifies `characteristic` with the
    /// responder's output (when it returns one).
    pub fn respond_to_write_with<F>(
        &self,
        written: Uuid,
        service: Uuid,
        characteristic: Uuid,
        respond: F,
    ) where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.lock().notifiers.push(Notifier {
            written,
            service,
            characteristic,
            delivery: Delivery::Notify,
            respond: Box::new(respond),
        });
    }

    /// After every write to `written`, stores the responder's output as the
    /// readable value of `characteristic`.
    pub fn reflect_write_with<F>(
        &self,
        written: Uuid,
        service: Uuid,
        characteristic: Uuid,
        respond: F,
    ) where
        F: Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static,
    {
        self.lock().notifiers.push(Notifier {
            written,
            service,
            characteristic,
            delivery: Delivery::Store,
            respond: Box::new(respond),
        });
    }

    /// Injects an arbitrary event, e.g. an advertisement or a link loss.
    pub fn emit(&self, event: TransportEvent) {
        // The scheduler may already be gone in teardown paths.
        let _ = self.events.send(event);
    }

    pub fn advertise(&self, discovery: Discovery) {
        self.emit(TransportEvent::Discovered(discovery));
    }

    /// Simulates a peripheral-initiated disconnect.
    pub fn drop_link(&self, handle: &PeripheralHandle, error: Option<&str>) {
        self.lock().connected.remove(handle);
        self.emit(TransportEvent::Disconnected {
            handle: handle.clone(),
            error: error.map(str::to_string),
        });
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, predicate: impl Fn(&TransportCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|call| predicate(call)).count()
    }

    /// Payloads of every write to `characteristic`, in order.
    pub fn writes_to(&self, characteristic: &Uuid) -> Vec<Vec<u8>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                TransportCall::Write {
                    characteristic: written,
                    data,
                    ..
                } if written == characteristic => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn value(&self, handle: &PeripheralHandle, service: &Uuid, characteristic: &Uuid) -> Option<Vec<u8>> {
        self.lock()
            .peripherals
            .get(handle)
            .and_then(|peripheral| peripheral.values.get(&(*service, *characteristic)).cloned())
    }

    fn record(&self, call: TransportCall) -> bool {
        let kind = match &call {
            TransportCall::StartScan(_) | TransportCall::StopScan => None,
            TransportCall::Connect(_) => Some(CallKind::Connect),
            TransportCall::Disconnect(_) => Some(CallKind::Disconnect),
            TransportCall::DiscoverServices(_) | TransportCall::DiscoverCharacteristics(..) => {
                Some(CallKind::Discovery)
            }
            TransportCall::Read(..) => Some(CallKind::Read),
            TransportCall::Write { .. } => Some(CallKind::Write),
            TransportCall::SetNotify { .. } => Some(CallKind::Notify),
        };
        let mut state = self.lock();
        state.calls.push(call);
        kind.map_or(true, |kind| !state.muted.contains(&kind))
    }
}

impl Transport for MockTransport {
    fn start_scan(&self, services: &[Uuid]) -> Result<(), BleError> {
        self.record(TransportCall::StartScan(services.to_vec()));
        Ok(())
    }

    fn stop_scan(&self) -> Result<(), BleError> {
        self.record(TransportCall::StopScan);
        Ok(())
    }

    fn connect(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        if !self.record(TransportCall::Connect(handle.clone())) {
            return Ok(());
        }
        let known = {
            let mut state = self.lock();
            let known = state.peripherals.contains_key(handle);
            if known {
                state.connected.insert(handle.clone());
            }
            known
        };
        if known {
            self.emit(TransportEvent::Connected(handle.clone()));
        } else {
            self.emit(TransportEvent::ConnectFailed {
                handle: handle.clone(),
                error: "peripheral not found".into(),
            });
        }
        Ok(())
    }

    fn disconnect(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        if !self.record(TransportCall::Disconnect(handle.clone())) {
            return Ok(());
        }
        self.lock().connected.remove(handle);
        self.emit(TransportEvent::Disconnected {
            handle: handle.clone(),
            error: None,
        });
        Ok(())
    }

    fn discover_services(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        if !self.record(TransportCall::DiscoverServices(handle.clone())) {
            return Ok(());
        }
        let result = self
            .lock()
            .peripherals
            .get(handle)
            .map(|peripheral| peripheral.services.keys().copied().collect())
            .ok_or_else(|| "unknown peripheral".to_string());
        self.emit(TransportEvent::ServicesDiscovered {
            handle: handle.clone(),
            result,
        });
        Ok(())
    }

    fn discover_characteristics(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
    ) -> Result<(), BleError> {
        if !self.record(TransportCall::DiscoverCharacteristics(handle.clone(), *service)) {
            return Ok(());
        }
        let result = self
            .lock()
            .peripherals
            .get(handle)
            .map(|peripheral| peripheral.services.get(service).cloned().unwrap_or_default())
            .ok_or_else(|| "unknown peripheral".to_string());
        self.emit(TransportEvent::CharacteristicsDiscovered {
            handle: handle.clone(),
            service: *service,
            result,
        });
        Ok(())
    }

    fn read(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
        characteristic: &Uuid,
    ) -> Result<(), BleError> {
        if !self.record(TransportCall::Read(handle.clone(), *service, *characteristic)) {
            return Ok(());
        }
        let result = self
            .value(handle, service, characteristic)
            .ok_or_else(|| "read not permitted".to_string());
        self.emit(TransportEvent::ValueUpdated {
            handle: handle.clone(),
            service: *service,
            characteristic: *characteristic,
            result,
        });
        Ok(())
    }

    fn write(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
        characteristic: &Uuid,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), BleError> {
        let answer = self.record(TransportCall::Write {
            handle: handle.clone(),
            service: *service,
            characteristic: *characteristic,
            data: data.to_vec(),
            mode,
        });

        let notifications: Vec<(Uuid, Uuid, Vec<u8>)> = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let mut updates = vec![((*service, *characteristic), data.to_vec())];
            let mut notifications = Vec::new();
            for notifier in state
                .notifiers
                .iter()
                .filter(|notifier| notifier.written == *characteristic)
            {
                let Some(payload) = (notifier.respond)(data) else {
                    continue;
                };
                match notifier.delivery {
                    Delivery::Notify => {
                        notifications.push((notifier.service, notifier.characteristic, payload))
                    }
                    Delivery::Store => {
                        updates.push(((notifier.service, notifier.characteristic), payload))
                    }
                }
            }
            if let Some(peripheral) = state.peripherals.get_mut(handle) {
                peripheral.values.extend(updates);
            }
            notifications
        };

        if answer && mode == WriteMode::WithResponse {
            self.emit(TransportEvent::WriteCompleted {
                handle: handle.clone(),
                service: *service,
                characteristic: *characteristic,
                result: Ok(()),
            });
        }
        for (service, characteristic, payload) in notifications {
            self.emit(TransportEvent::ValueUpdated {
                handle: handle.clone(),
                service,
                characteristic,
                result: Ok(payload),
            });
        }
        Ok(())
    }

    fn set_notify(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
        characteristic: &Uuid,
        enabled: bool,
    ) -> Result<(), BleError> {
        if !self.record(TransportCall::SetNotify {
            handle: handle.clone(),
            service: *service,
            characteristic: *characteristic,
            enabled,
        }) {
            return Ok(());
        }
        self.emit(TransportEvent::NotifyStateChanged {
            handle: handle.clone(),
            service: *service,
            characteristic: *characteristic,
            result: Ok(enabled),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_mock_reports_powered_on() {
        let (_mock, mut events) = MockTransport::new();
        assert_eq!(
            events.try_recv().ok(),
            Some(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn))
        );
    }

    #[test]
    fn muted_requests_are_recorded_but_unanswered() {
        let (mock, mut events) = MockTransport::unpowered();
        mock.add_peripheral("p1", MockPeripheral::new());
        mock.mute(CallKind::Connect);
        mock.connect(&PeripheralHandle::from("p1")).unwrap();
        assert!(events.try_recv().is_err());
        assert_eq!(mock.calls(), vec![TransportCall::Connect("p1".into())]);
    }

    #[test]
    fn unknown_peripheral_fails_to_connect() {
        let (mock, mut events) = MockTransport::unpowered();
        mock.connect(&PeripheralHandle::from("ghost")).unwrap();
        assert!(matches!(
            events.try_recv(),
            Ok(TransportEvent::ConnectFailed { .. })
        ));
    }

    #[test]
    fn write_triggers_scripted_notification() {
        let (mock, mut events) = MockTransport::unpowered();
        let service = Uuid::from_u128(1);
        let control = Uuid::from_u128(2);
        let result = Uuid::from_u128(3);
        mock.add_peripheral(
            "p1",
            MockPeripheral::new().with_service(service, &[control, result]),
        );
        mock.respond_to_write_with(control, service, result, |data| Some(data.iter().rev().copied().collect()));

        mock.write(
            &PeripheralHandle::from("p1"),
            &service,
            &control,
            &[1, 2],
            WriteMode::WithResponse,
        )
        .unwrap();

        assert!(matches!(
            events.try_recv(),
            Ok(TransportEvent::WriteCompleted { .. })
        ));
        assert_eq!(
            events.try_recv().ok(),
            Some(TransportEvent::ValueUpdated {
                handle: "p1".into(),
                service,
                characteristic: result,
                result: Ok(vec![2, 1]),
            })
        );
        assert_eq!(mock.writes_to(&control), vec![vec![1, 2]]);
    }

    #[test]
    fn reflected_write_becomes_readable() {
        let (mock, _events) = MockTransport::unpowered();
        let service = Uuid::from_u128(1);
        let control = Uuid::from_u128(2);
        let readback = Uuid::from_u128(3);
        let handle = PeripheralHandle::from("p1");
        mock.add_peripheral(
            "p1",
            MockPeripheral::new().with_service(service, &[control, readback]),
        );
        mock.reflect_write_with(control, service, readback, |data| Some(data.to_vec()));

        mock.write(&handle, &service, &control, &[7, 7], WriteMode::WithResponse)
            .unwrap();

        assert_eq!(mock.value(&handle, &service, &readback), Some(vec![7, 7]));
        assert_eq!(mock.value(&handle, &service, &control), Some(vec![7, 7]));
    }
}
