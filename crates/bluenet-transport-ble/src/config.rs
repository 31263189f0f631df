use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::OperationType;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-operation deadlines for the scheduler.
///
/// Durations are written in humantime form (`"2s"`, `"500ms"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    #[serde(with = "humantime_serde")]
    pub connect: Duration,
    #[serde(with = "humantime_serde")]
    pub disconnect: Duration,
    #[serde(with = "humantime_serde")]
    pub cancel_pending_connection: Duration,
    /// Wait for a peripheral-initiated disconnect.
    #[serde(with = "humantime_serde")]
    pub await_disconnect: Duration,
    #[serde(with = "humantime_serde")]
    pub get_services: Duration,
    #[serde(with = "humantime_serde")]
    pub get_characteristics: Duration,
    #[serde(with = "humantime_serde")]
    pub read_characteristic: Duration,
    #[serde(with = "humantime_serde")]
    pub write_characteristic: Duration,
    #[serde(with = "humantime_serde")]
    pub enable_notifications: Duration,
    #[serde(with = "humantime_serde")]
    pub disable_notifications: Duration,
    /// How long a single-notification read waits for its payload.
    #[serde(with = "humantime_serde")]
    pub notification_stream: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            connect: DEFAULT_TIMEOUT,
            disconnect: DEFAULT_TIMEOUT,
            cancel_pending_connection: DEFAULT_TIMEOUT,
            await_disconnect: Duration::from_secs(3),
            get_services: DEFAULT_TIMEOUT,
            get_characteristics: DEFAULT_TIMEOUT,
            read_characteristic: DEFAULT_TIMEOUT,
            write_characteristic: DEFAULT_TIMEOUT,
            enable_notifications: DEFAULT_TIMEOUT,
            disable_notifications: DEFAULT_TIMEOUT,
            notification_stream: DEFAULT_TIMEOUT,
        }
    }
}

impl SchedulerConfig {
    pub fn timeout_for(&self, operation: OperationType) -> Duration {
        match operation {
            OperationType::Connect => self.connect,
            OperationType::Disconnect | OperationType::ErrorDisconnect => self.disconnect,
            OperationType::CancelPendingConnection => self.cancel_pending_connection,
            OperationType::AwaitDisconnect => self.await_disconnect,
            OperationType::GetServices => self.get_services,
            OperationType::GetCharacteristics => self.get_characteristics,
            OperationType::ReadCharacteristic => self.read_characteristic,
            OperationType::WriteCharacteristic => self.write_characteristic,
            OperationType::EnableNotifications => self.enable_notifications,
            OperationType::DisableNotifications => self.disable_notifications,
        }
    }
}
