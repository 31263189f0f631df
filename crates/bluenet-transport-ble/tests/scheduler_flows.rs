use std::sync::Arc;
use std::time::Duration;

use bluenet_core::ids::{crownstone, parse_uuid, services, setup};
use bluenet_core::{ControlVersion, OperationMode, PeripheralHandle};
use bluenet_transport_ble::{
    AdapterState, BleError, BleScheduler, CallKind, ConnectionPhase, MockPeripheral,
    MockTransport, OperationType, SchedulerConfig, SchedulerEvent, TransportCall, TransportEvent,
    WriteMode,
};
use tokio::time::Instant;

fn uuid(id: &str) -> uuid::Uuid {
    parse_uuid(id).unwrap()
}

fn crownstone_peripheral() -> MockPeripheral {
    MockPeripheral::new()
        .with_service(
            uuid(services::CROWNSTONE),
            &[
                uuid(crownstone::CONTROL_V2),
                uuid(crownstone::RESULT_V2),
                uuid(crownstone::STATE_READ),
            ],
        )
        .with_value(
            uuid(services::CROWNSTONE),
            uuid(crownstone::STATE_READ),
            vec![0x10, 0x20],
        )
}

fn setup_peripheral() -> MockPeripheral {
    MockPeripheral::new().with_service(
        uuid(services::SETUP),
        &[uuid(setup::SETUP_CONTROL_V3), uuid(setup::RESULT_V2)],
    )
}

async fn harness(peripheral: MockPeripheral) -> (BleScheduler, Arc<MockTransport>, PeripheralHandle) {
    let (mock, events) = MockTransport::new();
    let handle = PeripheralHandle::from("C0:FF:EE:00:00:01");
    mock.add_peripheral(handle.clone(), peripheral);
    let scheduler = BleScheduler::new(mock.clone(), events, SchedulerConfig::default());
    scheduler.is_ready().await;
    (scheduler, mock, handle)
}

async fn connected(peripheral: MockPeripheral) -> (BleScheduler, Arc<MockTransport>, PeripheralHandle) {
    let (scheduler, mock, handle) = harness(peripheral).await;
    scheduler.connect(&handle).await.unwrap();
    (scheduler, mock, handle)
}

async fn wait_for_phase(scheduler: &BleScheduler, handle: &PeripheralHandle, phase: ConnectionPhase) {
    for _ in 0..100 {
        if scheduler.phase(handle) == phase {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("handle never reached {phase:?}");
}

fn disconnect_calls(mock: &MockTransport) -> usize {
    mock.count_calls(|call| matches!(call, TransportCall::Disconnect(_)))
}

fn notify_calls(mock: &MockTransport, enabled: bool) -> usize {
    mock.count_calls(|call| matches!(call, TransportCall::SetNotify { enabled: e, .. } if *e == enabled))
}

#[tokio::test(start_paused = true)]
async fn connect_then_discovery_is_cached() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;
    assert_eq!(scheduler.phase(&handle), ConnectionPhase::Connected);

    let first = scheduler.get_services(&handle).await.unwrap();
    let second = scheduler.get_services(&handle).await.unwrap();
    assert_eq!(first, vec![uuid(services::CROWNSTONE)]);
    assert_eq!(first, second);
    assert_eq!(
        mock.count_calls(|call| matches!(call, TransportCall::DiscoverServices(_))),
        1
    );

    let characteristics = scheduler
        .get_characteristics(&handle, "24F00000-7D10-4805-BFC1-7663A01C3BFF")
        .await
        .unwrap();
    assert_eq!(characteristics.len(), 3);
    scheduler
        .get_characteristics(&handle, services::CROWNSTONE)
        .await
        .unwrap();
    assert_eq!(
        mock.count_calls(|call| matches!(call, TransportCall::DiscoverCharacteristics(..))),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn unanswered_connect_times_out_after_configured_duration() {
    let (scheduler, mock, handle) = harness(crownstone_peripheral()).await;
    mock.mute(CallKind::Connect);

    let started = Instant::now();
    let result = scheduler.connect(&handle).await;
    assert_eq!(result, Err(BleError::Timeout(OperationType::Connect)));
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_eq!(scheduler.phase(&handle), ConnectionPhase::Disconnected);
    assert_eq!(disconnect_calls(&mock), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_while_connecting_cancels_once() {
    let (scheduler, mock, handle) = harness(crownstone_peripheral()).await;
    mock.mute(CallKind::Connect);

    let pending = {
        let scheduler = scheduler.clone();
        let handle = handle.clone();
        tokio::spawn(async move { scheduler.connect(&handle).await })
    };
    wait_for_phase(&scheduler, &handle, ConnectionPhase::Connecting).await;

    scheduler.disconnect(&handle).await.unwrap();
    assert_eq!(pending.await.unwrap(), Err(BleError::ConnectionCancelled));
    assert_eq!(disconnect_calls(&mock), 1);
    assert_eq!(
        mock.calls().last(),
        Some(&TransportCall::Disconnect(handle.clone()))
    );
    assert_eq!(scheduler.phase(&handle), ConnectionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn reconnect_while_connecting_supersedes_the_attempt() {
    let (scheduler, mock, handle) = harness(crownstone_peripheral()).await;
    mock.mute(CallKind::Connect);

    let pending = {
        let scheduler = scheduler.clone();
        let handle = handle.clone();
        tokio::spawn(async move { scheduler.connect(&handle).await })
    };
    wait_for_phase(&scheduler, &handle, ConnectionPhase::Connecting).await;

    mock.unmute(CallKind::Connect);
    scheduler.connect(&handle).await.unwrap();
    assert_eq!(pending.await.unwrap(), Err(BleError::ConnectionCancelled));
    assert_eq!(scheduler.phase(&handle), ConnectionPhase::Connected);
    assert_eq!(disconnect_calls(&mock), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;
    scheduler.disconnect(&handle).await.unwrap();
    scheduler.disconnect(&handle).await.unwrap();
    assert_eq!(disconnect_calls(&mock), 1);
    assert_eq!(scheduler.phase(&handle), ConnectionPhase::Disconnected);
}

/// Starts a connect the mock leaves unanswered, delivers a stale disconnect
/// while it is pending, then lets the link come up.
async fn connect_past_stale_disconnect(
    scheduler: &BleScheduler,
    mock: &Arc<MockTransport>,
    handle: &PeripheralHandle,
) {
    mock.mute(CallKind::Connect);
    let pending = {
        let scheduler = scheduler.clone();
        let handle = handle.clone();
        tokio::spawn(async move { scheduler.connect(&handle).await })
    };
    wait_for_phase(scheduler, handle, ConnectionPhase::Connecting).await;

    mock.emit(TransportEvent::Disconnected {
        handle: handle.clone(),
        error: None,
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(scheduler.phase(handle), ConnectionPhase::Connecting);

    mock.emit(TransportEvent::Connected(handle.clone()));
    assert_eq!(pending.await.unwrap(), Ok(()));
    assert_eq!(scheduler.phase(handle), ConnectionPhase::Connected);
}

#[tokio::test(start_paused = true)]
async fn connect_after_timed_out_connect_succeeds() {
    let (scheduler, mock, handle) = harness(crownstone_peripheral()).await;
    mock.mute(CallKind::Connect);
    mock.mute(CallKind::Disconnect);

    let started = Instant::now();
    assert_eq!(
        scheduler.connect(&handle).await,
        Err(BleError::Timeout(OperationType::Connect))
    );
    assert_eq!(scheduler.phase(&handle), ConnectionPhase::Disconnected);
    assert_eq!(disconnect_calls(&mock), 1);
    assert!(started.elapsed() > Duration::from_secs(2));

    mock.unmute(CallKind::Disconnect);
    connect_past_stale_disconnect(&scheduler, &mock, &handle).await;
}

#[tokio::test(start_paused = true)]
async fn connect_after_timed_out_disconnect_succeeds() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;
    mock.mute(CallKind::Disconnect);

    assert_eq!(
        scheduler.disconnect(&handle).await,
        Err(BleError::Timeout(OperationType::Disconnect))
    );
    assert_eq!(scheduler.phase(&handle), ConnectionPhase::Disconnected);

    mock.unmute(CallKind::Disconnect);
    connect_past_stale_disconnect(&scheduler, &mock, &handle).await;
}

#[tokio::test(start_paused = true)]
async fn late_disconnect_before_reconnect_is_harmless() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;
    mock.mute(CallKind::Disconnect);
    assert!(scheduler.disconnect(&handle).await.is_err());

    mock.emit(TransportEvent::Disconnected {
        handle: handle.clone(),
        error: None,
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    mock.unmute(CallKind::Disconnect);
    scheduler.connect(&handle).await.unwrap();
    assert_eq!(scheduler.phase(&handle), ConnectionPhase::Connected);
    scheduler.disconnect(&handle).await.unwrap();
    assert_eq!(scheduler.phase(&handle), ConnectionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn unanswered_read_times_out_and_late_value_is_ignored() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;
    scheduler.get_services(&handle).await.unwrap();
    scheduler
        .get_characteristics(&handle, services::CROWNSTONE)
        .await
        .unwrap();
    mock.mute(CallKind::Read);

    let started = Instant::now();
    let result = scheduler
        .read(&handle, services::CROWNSTONE, crownstone::STATE_READ)
        .await;
    assert_eq!(result, Err(BleError::Timeout(OperationType::ReadCharacteristic)));
    assert_eq!(started.elapsed(), Duration::from_secs(2));

    mock.emit(TransportEvent::ValueUpdated {
        handle: handle.clone(),
        service: uuid(services::CROWNSTONE),
        characteristic: uuid(crownstone::STATE_READ),
        result: Ok(vec![0xEE]),
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    mock.unmute(CallKind::Read);
    let value = scheduler
        .read(&handle, services::CROWNSTONE, crownstone::STATE_READ)
        .await
        .unwrap();
    assert_eq!(value, vec![0x10, 0x20]);
}

#[tokio::test(start_paused = true)]
async fn lookups_fail_with_typed_errors() {
    let (scheduler, _mock, handle) = connected(crownstone_peripheral()).await;
    assert_eq!(
        scheduler.get_characteristics(&handle, services::SETUP).await,
        Err(BleError::ServiceNotFound)
    );
    assert_eq!(
        scheduler
            .read(&handle, services::CROWNSTONE, setup::MAC_ADDRESS)
            .await,
        Err(BleError::CharacteristicNotFound)
    );
    assert_eq!(
        scheduler.read(&handle, "garbage", crownstone::CONTROL_V2).await,
        Err(BleError::InvalidUuid("garbage".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn operations_before_connect_fail() {
    let (scheduler, mock, handle) = harness(crownstone_peripheral()).await;
    assert_eq!(
        scheduler.get_services(&handle).await,
        Err(BleError::NotConnected)
    );
    assert_eq!(
        scheduler
            .write(&handle, services::CROWNSTONE, crownstone::CONTROL_V2, &[1], WriteMode::WithResponse)
            .await,
        Err(BleError::NotConnected)
    );
    assert!(mock.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn connect_needs_powered_adapter() {
    let (mock, events) = MockTransport::unpowered();
    let handle = PeripheralHandle::from("p1");
    mock.add_peripheral(handle.clone(), crownstone_peripheral());
    let scheduler = BleScheduler::new(mock.clone(), events, SchedulerConfig::default());

    assert_eq!(scheduler.connect(&handle).await, Err(BleError::NotInitialized));

    mock.emit(TransportEvent::AdapterStateChanged(AdapterState::PoweredOn));
    scheduler.is_ready().await;
    assert_eq!(scheduler.adapter_state(), AdapterState::PoweredOn);
    scheduler.connect(&handle).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unknown_peripheral_reports_connection_failure() {
    let (scheduler, _mock, _handle) = harness(crownstone_peripheral()).await;
    let ghost = PeripheralHandle::from("ghost");
    assert_eq!(
        scheduler.connect(&ghost).await,
        Err(BleError::ConnectionFailed("peripheral not found".into()))
    );
    assert_eq!(scheduler.phase(&ghost), ConnectionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn concurrent_subscribers_share_one_set_notify() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;

    let (first, second) = tokio::join!(
        scheduler.enable_notifications(&handle, services::CROWNSTONE, crownstone::RESULT_V2),
        scheduler.enable_notifications(&handle, services::CROWNSTONE, crownstone::RESULT_V2),
    );
    let mut first = first.unwrap();
    let mut second = second.unwrap();
    assert_eq!(notify_calls(&mock, true), 1);

    mock.emit(TransportEvent::ValueUpdated {
        handle: handle.clone(),
        service: uuid(services::CROWNSTONE),
        characteristic: uuid(crownstone::RESULT_V2),
        result: Ok(vec![1, 2, 3]),
    });
    assert_eq!(first.next().await, Some(vec![1, 2, 3]));
    assert_eq!(second.next().await, Some(vec![1, 2, 3]));

    scheduler.disable_notifications(first).await.unwrap();
    assert_eq!(notify_calls(&mock, false), 0);
    scheduler.disable_notifications(second).await.unwrap();
    assert_eq!(notify_calls(&mock, false), 1);
}

#[tokio::test(start_paused = true)]
async fn single_notification_read_round_trip() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;
    mock.respond_to_write_with(
        uuid(crownstone::CONTROL_V2),
        uuid(services::CROWNSTONE),
        uuid(crownstone::RESULT_V2),
        |written| Some([written, &[0xAA][..]].concat()),
    );

    let writer = scheduler.clone();
    let target = handle.clone();
    let payload = scheduler
        .setup_single_notification(&handle, services::CROWNSTONE, crownstone::RESULT_V2, move || async move {
            writer
                .write(&target, services::CROWNSTONE, crownstone::CONTROL_V2, &[7, 8], WriteMode::WithResponse)
                .await
        })
        .await
        .unwrap();

    assert_eq!(payload, vec![7, 8, 0xAA]);
    assert_eq!(notify_calls(&mock, true), 1);
    assert_eq!(notify_calls(&mock, false), 1);
}

#[tokio::test(start_paused = true)]
async fn single_notification_without_answer_times_out() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;

    let writer = scheduler.clone();
    let target = handle.clone();
    let started = Instant::now();
    let result = scheduler
        .setup_single_notification(&handle, services::CROWNSTONE, crownstone::RESULT_V2, move || async move {
            writer
                .write(&target, services::CROWNSTONE, crownstone::CONTROL_V2, &[1], WriteMode::WithResponse)
                .await
        })
        .await;

    assert_eq!(result, Err(BleError::NotificationStreamTimeout));
    assert_eq!(started.elapsed(), Duration::from_secs(2));
    assert_eq!(notify_calls(&mock, false), 1);
}

#[tokio::test(start_paused = true)]
async fn write_without_response_needs_no_completion() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;
    mock.mute(CallKind::Write);
    scheduler
        .write(&handle, services::CROWNSTONE, crownstone::CONTROL_V2, &[9], WriteMode::WithoutResponse)
        .await
        .unwrap();
    assert_eq!(mock.writes_to(&uuid(crownstone::CONTROL_V2)), vec![vec![9]]);
}

#[tokio::test(start_paused = true)]
async fn link_loss_rejects_pending_operation_and_closes_streams() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;
    let mut subscription = scheduler
        .enable_notifications(&handle, services::CROWNSTONE, crownstone::RESULT_V2)
        .await
        .unwrap();
    mock.mute(CallKind::Read);

    let pending = {
        let scheduler = scheduler.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            scheduler
                .read(&handle, services::CROWNSTONE, crownstone::STATE_READ)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    mock.drop_link(&handle, Some("gatt 8"));

    assert_eq!(
        pending.await.unwrap(),
        Err(BleError::Transport("gatt 8".into()))
    );
    assert_eq!(subscription.next().await, None);
    assert_eq!(scheduler.phase(&handle), ConnectionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn clean_link_loss_rejects_with_disconnected() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;
    scheduler.get_services(&handle).await.unwrap();
    mock.mute(CallKind::Discovery);

    let pending = {
        let scheduler = scheduler.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            scheduler
                .get_characteristics(&handle, services::CROWNSTONE)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    mock.drop_link(&handle, None);
    assert_eq!(pending.await.unwrap(), Err(BleError::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn await_disconnect_accepts_errored_disconnect() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;
    let waiting = {
        let scheduler = scheduler.clone();
        let handle = handle.clone();
        tokio::spawn(async move { scheduler.await_disconnect(&handle).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    mock.drop_link(&handle, Some("remote reset"));
    assert_eq!(waiting.await.unwrap(), Ok(()));
}

#[tokio::test(start_paused = true)]
async fn await_disconnect_times_out() {
    let (scheduler, _mock, handle) = connected(crownstone_peripheral()).await;
    let started = Instant::now();
    assert_eq!(
        scheduler.await_disconnect(&handle).await,
        Err(BleError::Timeout(OperationType::AwaitDisconnect))
    );
    assert_eq!(started.elapsed(), Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn error_disconnect_drops_the_link() {
    let (scheduler, mock, handle) = connected(crownstone_peripheral()).await;
    scheduler.error_disconnect(&handle).await.unwrap();
    assert_eq!(disconnect_calls(&mock), 1);
    assert_eq!(scheduler.phase(&handle), ConnectionPhase::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn connection_events_are_published() {
    let (scheduler, _mock, handle) = harness(crownstone_peripheral()).await;
    let mut events = scheduler.subscribe();
    scheduler.connect(&handle).await.unwrap();
    scheduler.disconnect(&handle).await.unwrap();

    assert_eq!(events.recv().await.unwrap(), SchedulerEvent::Connected(handle.clone()));
    assert_eq!(
        events.recv().await.unwrap(),
        SchedulerEvent::Disconnected {
            handle,
            error: None
        }
    );
}

#[tokio::test(start_paused = true)]
async fn profile_detection_follows_gatt_table() {
    let (scheduler, _mock, handle) = connected(setup_peripheral()).await;
    let profile = scheduler.detect_connection_profile(&handle).await.unwrap();
    assert_eq!(profile.operation_mode, OperationMode::Setup);
    assert_eq!(profile.control_version, ControlVersion::V2);
    assert_eq!(scheduler.profile(&handle), profile);

    let (scheduler, _mock, handle) = connected(crownstone_peripheral()).await;
    let profile = scheduler.detect_connection_profile(&handle).await.unwrap();
    assert_eq!(profile.operation_mode, OperationMode::Normal);
    assert_eq!(profile.control_version, ControlVersion::V2);
}

#[tokio::test(start_paused = true)]
async fn scanning_passes_through() {
    let (scheduler, mock, _handle) = harness(crownstone_peripheral()).await;
    scheduler.start_scanning().unwrap();
    scheduler
        .start_scanning_for_service(bluenet_core::ids::advertisement::CROWNSTONE_PLUG)
        .unwrap();
    scheduler.stop_scanning().unwrap();
    assert_eq!(
        mock.calls(),
        vec![
            TransportCall::StartScan(Vec::new()),
            TransportCall::StartScan(vec![uuid("C001")]),
            TransportCall::StopScan,
        ]
    );
}
