//! BLE transport seam and operation scheduler.
//!
//! A [`Transport`] issues raw GATT requests and reports completions as
//! [`TransportEvent`]s. The [`BleScheduler`] turns that into awaitable
//! operations with one Task Slot per peripheral, per-operation deadlines,
//! connect cancellation and refcounted notifications.

pub mod config;
pub mod error;
pub mod mock;
pub mod notifications;
pub mod scheduler;
pub mod slots;
pub mod state;
pub mod transport;

#[cfg(feature = "btleplug")]
pub mod btleplug_backend;

pub use config::SchedulerConfig;
pub use error::{BleError, OperationType};
pub use mock::{CallKind, MockPeripheral, MockTransport, TransportCall};
pub use notifications::{NotificationKey, NotificationSubscription};
pub use scheduler::{BleScheduler, SchedulerEvent};
pub use slots::{SlotTarget, TaskHandle, TaskSlots, TaskValue};
pub use state::{ConnectionPhase, ConnectionProfile, ConnectionState};
pub use transport::{
    AdapterState, Characteristic, CharacteristicProperties, Discovery, Transport, TransportEvent,
    TransportEventSender, TransportEvents, WriteMode,
};

#[cfg(feature = "btleplug")]
pub use btleplug_backend::{BtleplugConfig, BtleplugTransport};
