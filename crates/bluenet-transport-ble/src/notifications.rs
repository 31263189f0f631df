use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bluenet_core::PeripheralHandle;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use uuid::Uuid;

/// One notifying characteristic on one peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NotificationKey {
    pub handle: PeripheralHandle,
    pub service: Uuid,
    pub characteristic: Uuid,
}

/// A logical subscriber. Payloads arrive in order on [`next`](Self::next).
#[derive(Debug)]
pub struct NotificationSubscription {
    id: u64,
    key: NotificationKey,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl NotificationSubscription {
    pub fn key(&self) -> &NotificationKey {
        &self.key
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// `None` once the peripheral disconnected or the hub dropped this subscriber.
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<Vec<u8>> {
        self.rx.try_recv().ok()
    }
}

#[derive(Default)]
struct Topic {
    gate: Arc<AsyncMutex<()>>,
    subscribers: Vec<(u64, mpsc::UnboundedSender<Vec<u8>>)>,
}

impl Topic {
    fn live_count(&mut self) -> usize {
        self.subscribers.retain(|(_, tx)| !tx.is_closed());
        self.subscribers.len()
    }
}

#[derive(Default)]
struct HubTable {
    next_id: u64,
    topics: HashMap<NotificationKey, Topic>,
}

/// Subscriber refcounts and fan-out per notifying characteristic.
#[derive(Default)]
pub struct NotificationHub {
    table: Mutex<HubTable>,
}

impl NotificationHub {
    fn lock(&self) -> MutexGuard<'_, HubTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serializes subscribe/unsubscribe with the `setNotify` round-trip for a key.
    pub fn gate(&self, key: &NotificationKey) -> Arc<AsyncMutex<()>> {
        self.lock()
            .topics
            .entry(key.clone())
            .or_default()
            .gate
            .clone()
    }

    /// Live subscribers; subscriptions dropped without unsubscribing are pruned.
    pub fn subscriber_count(&self, key: &NotificationKey) -> usize {
        self.lock()
            .topics
            .get_mut(key)
            .map(Topic::live_count)
            .unwrap_or(0)
    }

    pub fn subscribe(&self, key: NotificationKey) -> NotificationSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut table = self.lock();
        let id = table.next_id;
        table.next_id = table.next_id.wrapping_add(1);
        table
            .topics
            .entry(key.clone())
            .or_default()
            .subscribers
            .push((id, tx));
        NotificationSubscription { id, key, rx }
    }

    /// Removes a subscriber and returns how many remain.
    pub fn unsubscribe(&self, key: &NotificationKey, id: u64) -> usize {
        let mut table = self.lock();
        match table.topics.get_mut(key) {
            Some(topic) => {
                topic.subscribers.retain(|(subscriber, _)| *subscriber != id);
                topic.live_count()
            }
            None => 0,
        }
    }

    /// Fans a payload out to every live subscriber; returns how many got it.
    pub fn dispatch(&self, key: &NotificationKey, payload: &[u8]) -> usize {
        let mut table = self.lock();
        let Some(topic) = table.topics.get_mut(key) else {
            return 0;
        };
        topic
            .subscribers
            .retain(|(_, tx)| tx.send(payload.to_vec()).is_ok());
        topic.subscribers.len()
    }

    /// Drops every subscriber of a peripheral, closing their streams. Topics
    /// whose gate nobody holds are removed.
    pub fn clear_handle(&self, handle: &PeripheralHandle) {
        let mut table = self.lock();
        table.topics.retain(|key, topic| {
            if &key.handle != handle {
                return true;
            }
            topic.subscribers.clear();
            Arc::strong_count(&topic.gate) > 1
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(characteristic: u128) -> NotificationKey {
        NotificationKey {
            handle: PeripheralHandle::from("peripheral-1"),
            service: Uuid::from_u128(1),
            characteristic: Uuid::from_u128(characteristic),
        }
    }

    #[test]
    fn dispatch_reaches_every_subscriber_of_the_key() {
        let hub = NotificationHub::default();
        let mut first = hub.subscribe(key(2));
        let mut second = hub.subscribe(key(2));
        let mut other = hub.subscribe(key(3));

        assert_eq!(hub.dispatch(&key(2), &[1, 2, 3]), 2);
        assert_eq!(first.try_next(), Some(vec![1, 2, 3]));
        assert_eq!(second.try_next(), Some(vec![1, 2, 3]));
        assert_eq!(other.try_next(), None);
    }

    #[test]
    fn unsubscribe_counts_down() {
        let hub = NotificationHub::default();
        let first = hub.subscribe(key(2));
        let second = hub.subscribe(key(2));
        assert_eq!(hub.subscriber_count(&key(2)), 2);
        assert_eq!(hub.unsubscribe(&key(2), first.id()), 1);
        assert_eq!(hub.unsubscribe(&key(2), second.id()), 0);
        assert_eq!(hub.unsubscribe(&key(9), 0), 0);
    }

    #[test]
    fn dropped_subscription_is_pruned() {
        let hub = NotificationHub::default();
        let kept = hub.subscribe(key(2));
        drop(hub.subscribe(key(2)));
        assert_eq!(hub.subscriber_count(&key(2)), 1);
        assert_eq!(hub.dispatch(&key(2), &[7]), 1);
        drop(kept);
        assert_eq!(hub.dispatch(&key(2), &[7]), 0);
    }

    #[test]
    fn clearing_a_handle_closes_its_streams() {
        let hub = NotificationHub::default();
        let mut subscription = hub.subscribe(key(2));
        hub.clear_handle(&PeripheralHandle::from("peripheral-1"));
        assert_eq!(hub.subscriber_count(&key(2)), 0);
        assert_eq!(subscription.try_next(), None);
    }

    #[test]
    fn clearing_a_handle_forgets_idle_topics() {
        let hub = NotificationHub::default();
        let _gate = hub.gate(&key(2));
        drop(hub.gate(&key(3)));
        let other = NotificationKey {
            handle: PeripheralHandle::from("peripheral-2"),
            ..key(2)
        };
        drop(hub.gate(&other));

        hub.clear_handle(&PeripheralHandle::from("peripheral-1"));
        let table = hub.lock();
        assert!(table.topics.contains_key(&key(2)));
        assert!(!table.topics.contains_key(&key(3)));
        assert!(table.topics.contains_key(&other));
    }
}
