//! Per-connection Task Slots.
//!
//! Each handle owns at most one unresolved slot. A slot resolves exactly
//! once: by a transport event, by its deadline timer, or by being replaced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bluenet_core::PeripheralHandle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn, Span};
use uuid::Uuid;

use crate::error::{BleError, OperationType};
use crate::transport::Characteristic;

/// GATT location an operation is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotTarget {
    pub service: Uuid,
    pub characteristic: Option<Uuid>,
}

impl SlotTarget {
    pub fn service(service: Uuid) -> Self {
        Self {
            service,
            characteristic: None,
        }
    }

    pub fn characteristic(service: Uuid, characteristic: Uuid) -> Self {
        Self {
            service,
            characteristic: Some(characteristic),
        }
    }
}

/// Value a slot fulfills with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskValue {
    None,
    Services(Vec<Uuid>),
    Characteristics(Vec<Characteristic>),
    Bytes(Vec<u8>),
}

pub type TaskResult = Result<TaskValue, BleError>;

struct Slot {
    id: u64,
    operation: OperationType,
    target: Option<SlotTarget>,
    tx: oneshot::Sender<TaskResult>,
    timer: Option<AbortHandle>,
}

impl Slot {
    fn finish(self, result: TaskResult) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // The waiter may have gone away; nothing left to notify then.
        let _ = self.tx.send(result);
    }
}

#[derive(Default)]
struct SlotTable {
    next_id: u64,
    slots: HashMap<PeripheralHandle, Slot>,
}

/// Receiving side of a slot.
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    operation: OperationType,
    rx: oneshot::Receiver<TaskResult>,
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn operation(&self) -> OperationType {
        self.operation
    }

    pub async fn wait(self) -> TaskResult {
        self.rx.await.unwrap_or(Err(BleError::SchedulerClosed))
    }
}

#[derive(Clone)]
pub struct TaskSlots {
    table: Arc<Mutex<SlotTable>>,
    span: Span,
}

impl TaskSlots {
    pub fn new(span: Span) -> Self {
        Self {
            table: Arc::new(Mutex::new(SlotTable::default())),
            span,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Arms a new slot. A still-pending slot on the same handle is rejected
    /// with `ReplacedByOtherOperation` first.
    ///
    /// Must be called from within a tokio runtime (the deadline is a task).
    pub fn create(
        &self,
        handle: &PeripheralHandle,
        operation: OperationType,
        timeout: Duration,
        target: Option<SlotTarget>,
    ) -> TaskHandle {
        let (tx, rx) = oneshot::channel();
        let mut table = self.lock();
        let id = table.next_id;
        table.next_id = table.next_id.wrapping_add(1);

        let slots = self.clone();
        let timer_handle = handle.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if slots.resolve_if(&timer_handle, id, Err(BleError::Timeout(operation))) {
                warn!(parent: &slots.span, handle = %timer_handle, %operation, ?timeout, "operation timed out");
            }
        });

        let slot = Slot {
            id,
            operation,
            target,
            tx,
            timer: Some(timer.abort_handle()),
        };
        if let Some(stale) = table.slots.insert(handle.clone(), slot) {
            warn!(
                parent: &self.span,
                %handle,
                stale = %stale.operation,
                next = %operation,
                "replacing unresolved task slot"
            );
            let replaced = BleError::ReplacedByOtherOperation(stale.operation);
            stale.finish(Err(replaced));
        }
        debug!(parent: &self.span, %handle, %operation, id, "task slot armed");

        TaskHandle { id, operation, rx }
    }

    /// Resolves the pending slot if `decide` returns a result for it.
    ///
    /// Returns the operation that was resolved.
    pub fn resolve_with<F>(&self, handle: &PeripheralHandle, decide: F) -> Option<OperationType>
    where
        F: FnOnce(OperationType, Option<&SlotTarget>) -> Option<TaskResult>,
    {
        let slot = {
            let mut table = self.lock();
            let pending = table.slots.get(handle)?;
            let result = decide(pending.operation, pending.target.as_ref())?;
            let slot = table.slots.remove(handle)?;
            (slot, result)
        };
        let (slot, result) = slot;
        let operation = slot.operation;
        slot.finish(result);
        Some(operation)
    }

    /// Resolves whatever is pending on the handle.
    pub fn resolve(&self, handle: &PeripheralHandle, result: TaskResult) -> Option<OperationType> {
        self.resolve_with(handle, |_, _| Some(result))
    }

    /// Resolves only the slot with the given id; false when it is already gone.
    pub fn resolve_if(&self, handle: &PeripheralHandle, id: u64, result: TaskResult) -> bool {
        let slot = {
            let mut table = self.lock();
            match table.slots.get(handle) {
                Some(slot) if slot.id == id => table.slots.remove(handle),
                _ => None,
            }
        };
        match slot {
            Some(slot) => {
                slot.finish(result);
                true
            }
            None => false,
        }
    }

    /// Resolves the slot only if it is of `operation` aimed at `target`.
    pub fn resolve_matching(
        &self,
        handle: &PeripheralHandle,
        operation: OperationType,
        target: Option<SlotTarget>,
        result: TaskResult,
    ) -> bool {
        self.resolve_with(handle, |pending, pending_target| {
            let target_matches = target.is_none() || pending_target == target.as_ref();
            (pending == operation && target_matches).then_some(result)
        })
        .is_some()
    }

    pub fn pending_operation(&self, handle: &PeripheralHandle) -> Option<OperationType> {
        self.lock().slots.get(handle).map(|slot| slot.operation)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().slots.len()
    }
}
