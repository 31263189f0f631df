//! BLE operation scheduler.
//!
//! Every GATT operation on a handle goes through one [`TaskSlot`](crate::slots)
//! and is serialized behind a per-handle operation lock. Transport events are
//! consumed by a single event loop task that resolves slots, tracks connection
//! phases and fans out notifications.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use bluenet_core::ids::parse_uuid;
use bluenet_core::PeripheralHandle;
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tracing::{debug, info, info_span, warn, Span};
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{BleError, OperationType};
use crate::notifications::{NotificationHub, NotificationKey, NotificationSubscription};
use crate::slots::{SlotTarget, TaskHandle, TaskSlots, TaskValue};
use crate::state::{ConnectionPhase, ConnectionProfile, ConnectionState};
use crate::transport::{
    AdapterState, Characteristic, Discovery, Transport, TransportEvent, TransportEvents, WriteMode,
};

const EVENT_CAPACITY: usize = 256;

/// Events the scheduler republishes for upper layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerEvent {
    AdapterState(AdapterState),
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
}

#[derive(Default)]
struct DiscoveryCache {
    services: Option<Vec<Uuid>>,
    characteristics: HashMap<Uuid, Vec<Characteristic>>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    config: SchedulerConfig,
    slots: TaskSlots,
    connections: Mutex<HashMap<PeripheralHandle, ConnectionState>>,
    op_locks: Mutex<HashMap<PeripheralHandle, Arc<AsyncMutex<()>>>>,
    /// Disconnect events still owed for links given up on after a timeout.
    abandoned: Mutex<HashMap<PeripheralHandle, usize>>,
    discovery: Mutex<HashMap<PeripheralHandle, DiscoveryCache>>,
    notifications: NotificationHub,
    adapter: watch::Sender<AdapterState>,
    events: broadcast::Sender<SchedulerEvent>,
    span: Span,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone)]
pub struct BleScheduler {
    inner: Arc<Inner>,
}

impl BleScheduler {
    /// Spawns the event loop on the current tokio runtime.
    pub fn new(
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        config: SchedulerConfig,
    ) -> Self {
        Self::with_span(transport, events, config, info_span!("ble_scheduler"))
    }

    pub fn with_span(
        transport: Arc<dyn Transport>,
        events: TransportEvents,
        config: SchedulerConfig,
        span: Span,
    ) -> Self {
        let (adapter, _) = watch::channel(AdapterState::Unknown);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(Inner {
            transport,
            config,
            slots: TaskSlots::new(span.clone()),
            connections: Mutex::new(HashMap::new()),
            op_locks: Mutex::new(HashMap::new()),
            abandoned: Mutex::new(HashMap::new()),
            discovery: Mutex::new(HashMap::new()),
            notifications: NotificationHub::default(),
            adapter,
            events: event_tx,
            span,
        });
        tokio::spawn(run_event_loop(Arc::downgrade(&inner), events));
        Self { inner }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn span(&self) -> &Span {
        &self.inner.span
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.inner.events.subscribe()
    }

    pub fn adapter_state(&self) -> AdapterState {
        *self.inner.adapter.borrow()
    }

    /// Resolves once the adapter reports powered on.
    pub async fn is_ready(&self) {
        let mut rx = self.inner.adapter.subscribe();
        let _ = rx.wait_for(|state| *state == AdapterState::PoweredOn).await;
    }

    pub fn phase(&self, handle: &PeripheralHandle) -> ConnectionPhase {
        self.connection_state(handle).phase
    }

    pub fn connection_state(&self, handle: &PeripheralHandle) -> ConnectionState {
        lock(&self.inner.connections)
            .get(handle)
            .copied()
            .unwrap_or_default()
    }

    pub fn profile(&self, handle: &PeripheralHandle) -> ConnectionProfile {
        self.connection_state(handle).profile
    }

    pub fn start_scanning(&self) -> Result<(), BleError> {
        info!(parent: &self.inner.span, "start scanning");
        self.inner.transport.start_scan(&[])
    }

    pub fn start_scanning_for_service(&self, service: &str) -> Result<(), BleError> {
        let uuid = parse_uuid(service)?;
        info!(parent: &self.inner.span, %uuid, "start scanning for service");
        self.inner.transport.start_scan(&[uuid])
    }

    pub fn stop_scanning(&self) -> Result<(), BleError> {
        info!(parent: &self.inner.span, "stop scanning");
        self.inner.transport.stop_scan()
    }

    pub async fn connect(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        self.wait_until_powered().await?;

        match self.phase(handle) {
            ConnectionPhase::Connected | ConnectionPhase::Disconnecting => {
                self.disconnect(handle).await?;
            }
            ConnectionPhase::Connecting => {
                if let Err(err) = self.cancel_pending_connection(handle).await {
                    debug!(parent: &self.inner.span, %handle, %err, "ignoring cancel failure before connect");
                }
            }
            ConnectionPhase::Disconnected => {}
        }

        let op_lock = self.op_lock(handle);
        let _guard = op_lock.lock().await;

        let task = self.arm(handle, OperationType::Connect, None);
        self.set_state(handle, ConnectionState::connecting());
        info!(parent: &self.inner.span, %handle, "connecting");

        if let Err(err) = self.inner.transport.connect(handle) {
            self.inner.slots.resolve_if(handle, task.id(), Err(err.clone()));
            self.set_phase(handle, ConnectionPhase::Disconnected);
            return Err(err);
        }

        match task.wait().await {
            Ok(_) => {
                info!(parent: &self.inner.span, %handle, "connected");
                Ok(())
            }
            Err(BleError::ConnectionCancelled) => Err(BleError::ConnectionCancelled),
            Err(BleError::Timeout(operation)) => {
                warn!(parent: &self.inner.span, %handle, "connect timed out, abandoning attempt");
                if let Err(err) = self.drop_pending_link(handle).await {
                    debug!(parent: &self.inner.span, %handle, %err, "abandon disconnect failed");
                }
                Err(BleError::Timeout(operation))
            }
            Err(err) => {
                self.set_phase_if(handle, ConnectionPhase::Connecting, ConnectionPhase::Disconnected);
                Err(err)
            }
        }
    }

    /// Aborts an in-flight connect. The pending connect resolves with
    /// `ConnectionCancelled` and exactly one transport disconnect is issued.
    pub async fn cancel_pending_connection(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        let cancelled = self.inner.slots.resolve_with(handle, |operation, _| {
            (operation == OperationType::Connect).then_some(Err(BleError::ConnectionCancelled))
        });
        if cancelled.is_some() {
            info!(parent: &self.inner.span, %handle, "pending connection cancelled");
        }

        let op_lock = self.op_lock(handle);
        let _guard = op_lock.lock().await;
        match self.phase(handle) {
            ConnectionPhase::Connecting => {}
            // The link came up before the cancel landed.
            ConnectionPhase::Connected => {
                return self.teardown(handle, OperationType::Disconnect).await;
            }
            ConnectionPhase::Disconnected | ConnectionPhase::Disconnecting => return Ok(()),
        }
        self.drop_pending_link(handle).await
    }

    /// Disconnects a link that never came up and waits for the transport to
    /// confirm, so the disconnect event cannot land on a later attempt.
    async fn drop_pending_link(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        let task = self.arm(handle, OperationType::CancelPendingConnection, None);
        let outcome = match self.inner.transport.disconnect(handle) {
            Ok(()) => task.wait().await.map(|_| ()),
            Err(err) => {
                self.inner.slots.resolve_if(handle, task.id(), Err(err.clone()));
                Err(err)
            }
        };
        if matches!(outcome, Err(BleError::Timeout(_))) {
            self.inner.owe_disconnect(handle);
        }
        self.forget(handle);
        outcome
    }

    pub async fn disconnect(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        match self.phase(handle) {
            ConnectionPhase::Connecting => {
                if let Err(err) = self.cancel_pending_connection(handle).await {
                    debug!(parent: &self.inner.span, %handle, %err, "cancel during disconnect failed");
                }
                return Ok(());
            }
            ConnectionPhase::Disconnected => return Ok(()),
            ConnectionPhase::Connected | ConnectionPhase::Disconnecting => {}
        }

        let op_lock = self.op_lock(handle);
        let _guard = op_lock.lock().await;
        if self.phase(handle) != ConnectionPhase::Connected {
            return Ok(());
        }
        self.teardown(handle, OperationType::Disconnect).await
    }

    /// Waits for the peripheral to drop the link on its own (after a reset
    /// or setup-finalize command).
    pub async fn await_disconnect(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        let op_lock = self.op_lock(handle);
        let _guard = op_lock.lock().await;
        if self.phase(handle) == ConnectionPhase::Disconnected {
            return Ok(());
        }
        let task = self.arm(handle, OperationType::AwaitDisconnect, None);
        task.wait().await.map(|_| ())
    }

    /// Drops the link after a protocol failure; completes on any disconnect event.
    pub async fn error_disconnect(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        let op_lock = self.op_lock(handle);
        let _guard = op_lock.lock().await;
        if self.phase(handle) == ConnectionPhase::Disconnected {
            return Ok(());
        }
        self.teardown(handle, OperationType::ErrorDisconnect).await
    }

    pub async fn get_services(&self, handle: &PeripheralHandle) -> Result<Vec<Uuid>, BleError> {
        self.ensure_connected(handle)?;
        if let Some(services) = self.cached_services(handle) {
            return Ok(services);
        }

        let op_lock = self.op_lock(handle);
        let _guard = op_lock.lock().await;
        self.ensure_connected(handle)?;
        if let Some(services) = self.cached_services(handle) {
            return Ok(services);
        }

        let task = self.arm(handle, OperationType::GetServices, None);
        self.issue(handle, &task, self.inner.transport.discover_services(handle))?;
        let services = match task.wait().await? {
            TaskValue::Services(services) => services,
            _ => Vec::new(),
        };
        if services.is_empty() {
            return Err(BleError::NoServices);
        }
        debug!(parent: &self.inner.span, %handle, count = services.len(), "services discovered");
        if self.phase(handle) == ConnectionPhase::Connected {
            lock(&self.inner.discovery)
                .entry(handle.clone())
                .or_default()
                .services = Some(services.clone());
        }
        Ok(services)
    }

    pub async fn get_characteristics(
        &self,
        handle: &PeripheralHandle,
        service: &str,
    ) -> Result<Vec<Characteristic>, BleError> {
        let service = parse_uuid(service)?;
        self.characteristics_of(handle, service).await
    }

    async fn characteristics_of(
        &self,
        handle: &PeripheralHandle,
        service: Uuid,
    ) -> Result<Vec<Characteristic>, BleError> {
        let services = self.get_services(handle).await?;
        if !services.contains(&service) {
            return Err(BleError::ServiceNotFound);
        }
        if let Some(characteristics) = self.cached_characteristics(handle, &service) {
            return Ok(characteristics);
        }

        let op_lock = self.op_lock(handle);
        let _guard = op_lock.lock().await;
        self.ensure_connected(handle)?;
        if let Some(characteristics) = self.cached_characteristics(handle, &service) {
            return Ok(characteristics);
        }

        let task = self.arm(
            handle,
            OperationType::GetCharacteristics,
            Some(SlotTarget::service(service)),
        );
        self.issue(
            handle,
            &task,
            self.inner.transport.discover_characteristics(handle, &service),
        )?;
        let characteristics = match task.wait().await? {
            TaskValue::Characteristics(characteristics) => characteristics,
            _ => Vec::new(),
        };
        if characteristics.is_empty() {
            return Err(BleError::NoCharacteristics);
        }
        if self.phase(handle) == ConnectionPhase::Connected {
            lock(&self.inner.discovery)
                .entry(handle.clone())
                .or_default()
                .characteristics
                .insert(service, characteristics.clone());
        }
        Ok(characteristics)
    }

    /// Looks a characteristic up in the discovered GATT table.
    pub async fn resolve_characteristic(
        &self,
        handle: &PeripheralHandle,
        service: &str,
        characteristic: &str,
    ) -> Result<Characteristic, BleError> {
        let service = parse_uuid(service)?;
        let characteristic = parse_uuid(characteristic)?;
        self.characteristics_of(handle, service)
            .await?
            .into_iter()
            .find(|candidate| candidate.uuid == characteristic)
            .ok_or(BleError::CharacteristicNotFound)
    }

    pub async fn read(
        &self,
        handle: &PeripheralHandle,
        service: &str,
        characteristic: &str,
    ) -> Result<Vec<u8>, BleError> {
        let target = self.resolve_characteristic(handle, service, characteristic).await?;

        let op_lock = self.op_lock(handle);
        let _guard = op_lock.lock().await;
        self.ensure_connected(handle)?;
        let task = self.arm(
            handle,
            OperationType::ReadCharacteristic,
            Some(SlotTarget::characteristic(target.service, target.uuid)),
        );
        self.issue(
            handle,
            &task,
            self.inner.transport.read(handle, &target.service, &target.uuid),
        )?;
        match task.wait().await? {
            TaskValue::Bytes(bytes) => Ok(bytes),
            _ => Ok(Vec::new()),
        }
    }

    /// `WithoutResponse` writes complete as soon as the transport accepts them.
    pub async fn write(
        &self,
        handle: &PeripheralHandle,
        service: &str,
        characteristic: &str,
        data: &[u8],
        mode: WriteMode,
    ) -> Result<(), BleError> {
        let target = self.resolve_characteristic(handle, service, characteristic).await?;

        let op_lock = self.op_lock(handle);
        let _guard = op_lock.lock().await;
        self.ensure_connected(handle)?;
        debug!(
            parent: &self.inner.span,
            %handle,
            characteristic = %target.uuid,
            len = data.len(),
            ?mode,
            "write"
        );
        if mode == WriteMode::WithoutResponse {
            return self
                .inner
                .transport
                .write(handle, &target.service, &target.uuid, data, mode);
        }

        let task = self.arm(
            handle,
            OperationType::WriteCharacteristic,
            Some(SlotTarget::characteristic(target.service, target.uuid)),
        );
        self.issue(
            handle,
            &task,
            self.inner
                .transport
                .write(handle, &target.service, &target.uuid, data, mode),
        )?;
        task.wait().await.map(|_| ())
    }

    /// Adds a subscriber. Only the first subscriber of a characteristic
    /// triggers a transport `setNotify(true)`.
    pub async fn enable_notifications(
        &self,
        handle: &PeripheralHandle,
        service: &str,
        characteristic: &str,
    ) -> Result<NotificationSubscription, BleError> {
        let target = self.resolve_characteristic(handle, service, characteristic).await?;
        let key = NotificationKey {
            handle: handle.clone(),
            service: target.service,
            characteristic: target.uuid,
        };

        let gate = self.inner.notifications.gate(&key);
        let _gate = gate.lock().await;
        if self.inner.notifications.subscriber_count(&key) > 0 {
            debug!(parent: &self.inner.span, %handle, characteristic = %key.characteristic, "joining active notification");
            return Ok(self.inner.notifications.subscribe(key));
        }

        self.set_notify(&key, true).await?;
        info!(parent: &self.inner.span, %handle, characteristic = %key.characteristic, "notifications enabled");
        Ok(self.inner.notifications.subscribe(key))
    }

    /// Removes a subscriber. The last one out turns notifications off, unless
    /// the peripheral is already gone.
    pub async fn disable_notifications(
        &self,
        subscription: NotificationSubscription,
    ) -> Result<(), BleError> {
        let key = subscription.key().clone();
        let id = subscription.id();
        drop(subscription);

        let gate = self.inner.notifications.gate(&key);
        let _gate = gate.lock().await;
        if self.inner.notifications.unsubscribe(&key, id) > 0 {
            return Ok(());
        }
        if self.phase(&key.handle) != ConnectionPhase::Connected {
            return Ok(());
        }
        self.set_notify(&key, false).await?;
        info!(parent: &self.inner.span, handle = %key.handle, characteristic = %key.characteristic, "notifications disabled");
        Ok(())
    }

    /// Subscribes, runs `write_command`, returns the first notification and
    /// unsubscribes again.
    pub async fn setup_single_notification<F, Fut>(
        &self,
        handle: &PeripheralHandle,
        service: &str,
        characteristic: &str,
        write_command: F,
    ) -> Result<Vec<u8>, BleError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), BleError>>,
    {
        let mut subscription = self
            .enable_notifications(handle, service, characteristic)
            .await?;
        let stream_timeout = self.inner.config.notification_stream;

        let outcome = async {
            write_command().await?;
            match tokio::time::timeout(stream_timeout, subscription.next()).await {
                Ok(Some(payload)) => Ok(payload),
                Ok(None) => Err(BleError::Disconnected),
                Err(_) => Err(BleError::NotificationStreamTimeout),
            }
        }
        .await;

        let cleanup = self.disable_notifications(subscription).await;
        let payload = outcome?;
        if let Err(err) = cleanup {
            warn!(parent: &self.inner.span, %handle, %err, "failed to disable notifications after read");
        }
        Ok(payload)
    }

    /// Derives operation mode and control version from the discovered GATT
    /// table and records them on the connection.
    pub async fn detect_connection_profile(
        &self,
        handle: &PeripheralHandle,
    ) -> Result<ConnectionProfile, BleError> {
        let services = self.get_services(handle).await?;
        let mut discovered: HashMap<Uuid, Vec<Characteristic>> = HashMap::new();
        for service in &services {
            match self.characteristics_of(handle, *service).await {
                Ok(characteristics) => {
                    discovered.insert(*service, characteristics);
                }
                Err(BleError::NoCharacteristics) => {}
                Err(err) => return Err(err),
            }
        }
        let profile = ConnectionProfile::detect(&services, |service| {
            discovered.get(service).cloned().unwrap_or_default()
        });

        if let Some(state) = lock(&self.inner.connections).get_mut(handle) {
            state.profile = profile;
        }
        info!(
            parent: &self.inner.span,
            %handle,
            mode = ?profile.operation_mode,
            version = ?profile.control_version,
            "connection profile detected"
        );
        Ok(profile)
    }

    async fn wait_until_powered(&self) -> Result<(), BleError> {
        let mut rx = self.inner.adapter.subscribe();
        let ready = rx.wait_for(|state| *state == AdapterState::PoweredOn);
        let powered = matches!(
            tokio::time::timeout(self.inner.config.connect, ready).await,
            Ok(Ok(_))
        );
        if powered {
            Ok(())
        } else {
            Err(BleError::NotInitialized)
        }
    }

    async fn teardown(
        &self,
        handle: &PeripheralHandle,
        operation: OperationType,
    ) -> Result<(), BleError> {
        let previous = self.phase(handle);
        let task = self.arm(handle, operation, None);
        self.set_phase(handle, ConnectionPhase::Disconnecting);
        info!(parent: &self.inner.span, %handle, %operation, "disconnecting");
        if let Err(err) = self.inner.transport.disconnect(handle) {
            self.inner.slots.resolve_if(handle, task.id(), Err(err.clone()));
            self.set_phase(handle, previous);
            return Err(err);
        }
        match task.wait().await {
            Ok(_) => Ok(()),
            Err(err) => {
                if matches!(err, BleError::Timeout(_)) {
                    self.inner.owe_disconnect(handle);
                }
                self.forget(handle);
                Err(err)
            }
        }
    }

    async fn set_notify(&self, key: &NotificationKey, enabled: bool) -> Result<(), BleError> {
        let operation = if enabled {
            OperationType::EnableNotifications
        } else {
            OperationType::DisableNotifications
        };
        let op_lock = self.op_lock(&key.handle);
        let _guard = op_lock.lock().await;
        self.ensure_connected(&key.handle)?;
        let task = self.arm(
            &key.handle,
            operation,
            Some(SlotTarget::characteristic(key.service, key.characteristic)),
        );
        self.issue(
            &key.handle,
            &task,
            self.inner
                .transport
                .set_notify(&key.handle, &key.service, &key.characteristic, enabled),
        )?;
        task.wait().await.map(|_| ())
    }

    fn arm(
        &self,
        handle: &PeripheralHandle,
        operation: OperationType,
        target: Option<SlotTarget>,
    ) -> TaskHandle {
        let timeout = self.inner.config.timeout_for(operation);
        self.inner.slots.create(handle, operation, timeout, target)
    }

    /// Settles the slot right away when the transport refused the request.
    fn issue(
        &self,
        handle: &PeripheralHandle,
        task: &TaskHandle,
        requested: Result<(), BleError>,
    ) -> Result<(), BleError> {
        if let Err(err) = &requested {
            self.inner.slots.resolve_if(handle, task.id(), Err(err.clone()));
        }
        requested
    }

    fn ensure_connected(&self, handle: &PeripheralHandle) -> Result<(), BleError> {
        if self.phase(handle) == ConnectionPhase::Connected {
            Ok(())
        } else {
            Err(BleError::NotConnected)
        }
    }

    fn op_lock(&self, handle: &PeripheralHandle) -> Arc<AsyncMutex<()>> {
        lock(&self.inner.op_locks)
            .entry(handle.clone())
            .or_default()
            .clone()
    }

    fn cached_services(&self, handle: &PeripheralHandle) -> Option<Vec<Uuid>> {
        lock(&self.inner.discovery)
            .get(handle)
            .and_then(|cache| cache.services.clone())
    }

    fn cached_characteristics(
        &self,
        handle: &PeripheralHandle,
        service: &Uuid,
    ) -> Option<Vec<Characteristic>> {
        lock(&self.inner.discovery)
            .get(handle)
            .and_then(|cache| cache.characteristics.get(service).cloned())
    }

    fn set_state(&self, handle: &PeripheralHandle, state: ConnectionState) {
        lock(&self.inner.connections).insert(handle.clone(), state);
    }

    fn set_phase(&self, handle: &PeripheralHandle, phase: ConnectionPhase) {
        self.inner.set_phase(handle, phase);
    }

    fn set_phase_if(&self, handle: &PeripheralHandle, expected: ConnectionPhase, phase: ConnectionPhase) {
        let mut connections = lock(&self.inner.connections);
        if let Some(state) = connections.get_mut(handle) {
            if state.phase == expected {
                state.phase = phase;
            }
        }
    }

    fn forget(&self, handle: &PeripheralHandle) {
        self.inner.forget(handle);
    }
}

impl Inner {
    fn phase(&self, handle: &PeripheralHandle) -> ConnectionPhase {
        lock(&self.connections)
            .get(handle)
            .map(|state| state.phase)
            .unwrap_or_default()
    }

    fn set_phase(&self, handle: &PeripheralHandle, phase: ConnectionPhase) {
        lock(&self.connections).entry(handle.clone()).or_default().phase = phase;
    }

    /// Back to `disconnected` with no cached discovery and no subscribers.
    fn forget(&self, handle: &PeripheralHandle) {
        self.set_phase(handle, ConnectionPhase::Disconnected);
        lock(&self.discovery).remove(handle);
        self.notifications.clear_handle(handle);
        lock(&self.op_locks).retain(|_, op_lock| Arc::strong_count(op_lock) > 1);
    }

    fn owe_disconnect(&self, handle: &PeripheralHandle) {
        *lock(&self.abandoned).entry(handle.clone()).or_default() += 1;
    }

    /// Consumes one owed disconnect event, if any.
    fn settle_owed_disconnect(&self, handle: &PeripheralHandle) -> bool {
        let mut abandoned = lock(&self.abandoned);
        let Some(owed) = abandoned.get_mut(handle) else {
            return false;
        };
        *owed -= 1;
        if *owed == 0 {
            abandoned.remove(handle);
        }
        true
    }

    fn publish(&self, event: SchedulerEvent) {
        // No receivers is fine; events are best-effort fan-out.
        let _ = self.events.send(event);
    }

    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::AdapterStateChanged(state) => {
                info!(parent: &self.span, state = state.as_str(), "adapter state changed");
                self.adapter.send_replace(state);
                self.publish(SchedulerEvent::AdapterState(state));
            }
            TransportEvent::Discovered(discovery) => {
                self.publish(SchedulerEvent::Discovered(discovery));
            }
            TransportEvent::Connected(handle) => {
                let resolved = self.slots.resolve_with(&handle, |operation, _| {
                    (operation == OperationType::Connect).then_some(Ok(TaskValue::None))
                });
                if resolved.is_some() {
                    lock(&self.abandoned).remove(&handle);
                    self.set_phase(&handle, ConnectionPhase::Connected);
                    self.publish(SchedulerEvent::Connected(handle));
                } else {
                    warn!(parent: &self.span, %handle, "connected without a pending connect");
                }
            }
            TransportEvent::ConnectFailed { handle, error } => {
                warn!(parent: &self.span, %handle, %error, "connect failed");
                let failure = BleError::ConnectionFailed(error.clone());
                self.slots.resolve_with(&handle, |operation, _| {
                    (operation == OperationType::Connect).then_some(Err(failure))
                });
                self.forget(&handle);
                self.publish(SchedulerEvent::ConnectFailed { handle, error });
            }
            TransportEvent::Disconnected { handle, error } => {
                if self.settle_owed_disconnect(&handle)
                    && self.phase(&handle) == ConnectionPhase::Connecting
                {
                    debug!(parent: &self.span, %handle, "late disconnect of an abandoned link");
                    return;
                }
                let resolved = self.slots.resolve_with(&handle, |operation, _| {
                    Some(if operation.completes_on_disconnect() {
                        Ok(TaskValue::None)
                    } else if let Some(error) = &error {
                        Err(BleError::Transport(error.clone()))
                    } else if operation == OperationType::Disconnect {
                        Ok(TaskValue::None)
                    } else {
                        Err(BleError::Disconnected)
                    })
                });
                info!(
                    parent: &self.span,
                    %handle,
                    error = error.as_deref().unwrap_or(""),
                    pending = ?resolved,
                    "disconnected"
                );
                self.forget(&handle);
                self.publish(SchedulerEvent::Disconnected { handle, error });
            }
            TransportEvent::ServicesDiscovered { handle, result } => {
                let result = result.map(TaskValue::Services).map_err(BleError::Transport);
                if !self
                    .slots
                    .resolve_matching(&handle, OperationType::GetServices, None, result)
                {
                    debug!(parent: &self.span, %handle, "unsolicited service discovery");
                }
            }
            TransportEvent::CharacteristicsDiscovered {
                handle,
                service,
                result,
            } => {
                let result = result
                    .map(TaskValue::Characteristics)
                    .map_err(BleError::Transport);
                if !self.slots.resolve_matching(
                    &handle,
                    OperationType::GetCharacteristics,
                    Some(SlotTarget::service(service)),
                    result,
                ) {
                    debug!(parent: &self.span, %handle, %service, "unsolicited characteristic discovery");
                }
            }
            TransportEvent::ValueUpdated {
                handle,
                service,
                characteristic,
                result,
            } => self.value_updated(handle, service, characteristic, result),
            TransportEvent::WriteCompleted {
                handle,
                service,
                characteristic,
                result,
            } => {
                let result = result.map(|()| TaskValue::None).map_err(BleError::Transport);
                if !self.slots.resolve_matching(
                    &handle,
                    OperationType::WriteCharacteristic,
                    Some(SlotTarget::characteristic(service, characteristic)),
                    result,
                ) {
                    debug!(parent: &self.span, %handle, %characteristic, "unsolicited write completion");
                }
            }
            TransportEvent::NotifyStateChanged {
                handle,
                service,
                characteristic,
                result,
            } => {
                let target = SlotTarget::characteristic(service, characteristic);
                self.slots.resolve_with(&handle, |operation, pending| {
                    let notify_op = matches!(
                        operation,
                        OperationType::EnableNotifications | OperationType::DisableNotifications
                    );
                    (notify_op && pending == Some(&target)).then(|| {
                        result
                            .map(|_| TaskValue::None)
                            .map_err(BleError::Transport)
                    })
                });
            }
        }
    }

    fn value_updated(
        &self,
        handle: PeripheralHandle,
        service: Uuid,
        characteristic: Uuid,
        result: Result<Vec<u8>, String>,
    ) {
        let target = SlotTarget::characteristic(service, characteristic);
        let read_result = result.clone();
        let was_read = self.slots.resolve_matching(
            &handle,
            OperationType::ReadCharacteristic,
            Some(target),
            read_result.map(TaskValue::Bytes).map_err(BleError::Transport),
        );
        if was_read {
            return;
        }

        match result {
            Ok(payload) => {
                let key = NotificationKey {
                    handle,
                    service,
                    characteristic,
                };
                let delivered = self.notifications.dispatch(&key, &payload);
                if delivered == 0 {
                    debug!(parent: &self.span, handle = %key.handle, %characteristic, "notification without subscribers");
                }
            }
            Err(error) => {
                warn!(parent: &self.span, %handle, %characteristic, %error, "value update failed");
            }
        }
    }
}

async fn run_event_loop(inner: Weak<Inner>, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_event(event);
    }
}
