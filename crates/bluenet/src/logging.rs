//! Tracing setup plus an in-memory buffer of recent log lines.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::BluenetError;

/// Environment variable read by [`filter_from_env`].
pub const LOG_ENV: &str = "BLUENET_LOG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub timestamp: u64,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Ring buffer of the most recent log entries.
pub struct LogBuffer {
    entries: Mutex<VecDeque<LogEntry>>,
    max_size: usize,
}

impl LogBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(max_size)),
            max_size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, entry: LogEntry) {
        if self.max_size == 0 {
            return;
        }
        let mut entries = self.lock();
        if entries.len() >= self.max_size {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn get_all(&self) -> Vec<LogEntry> {
        self.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Copies every event that passes the filter into a [`LogBuffer`].
pub struct BufferLayer {
    buffer: Arc<LogBuffer>,
}

impl BufferLayer {
    pub fn new(buffer: Arc<LogBuffer>) -> Self {
        Self { buffer }
    }
}

impl<S> Layer<S> for BufferLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let mut message = String::new();
        let mut visitor = MessageVisitor {
            message: &mut message,
        };
        event.record(&mut visitor);

        self.buffer.push(LogEntry {
            timestamp,
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message,
        });
    }
}

struct MessageVisitor<'a> {
    message: &'a mut String,
}

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            use std::fmt::Write;
            let _ = write!(self.message, "{value:?}");
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        }
    }
}

/// Filter directive from `BLUENET_LOG`, `info` when unset.
pub fn filter_from_env() -> String {
    std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string())
}

/// Installs a global `fmt` subscriber filtered by `filter` and returns the
/// buffer that receives a copy of every emitted event.
pub fn init(filter: &str, buffer_size: usize) -> Result<Arc<LogBuffer>, BluenetError> {
    let buffer = Arc::new(LogBuffer::new(buffer_size));
    tracing_subscriber::registry()
        .with(EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .with(BufferLayer::new(buffer.clone()))
        .try_init()
        .map_err(|err| BluenetError::Logging(err.to_string()))?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::{info, warn};
    use tracing_subscriber::registry;

    fn entry(message: &str) -> LogEntry {
        LogEntry {
            timestamp: 0,
            level: "INFO".into(),
            target: "test".into(),
            message: message.into(),
        }
    }

    #[test]
    fn buffer_drops_oldest_entries() {
        let buffer = LogBuffer::new(2);
        buffer.push(entry("a"));
        buffer.push(entry("b"));
        buffer.push(entry("c"));
        let messages: Vec<_> = buffer.get_all().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["b", "c"]);
    }

    #[test]
    fn zero_sized_buffer_stays_empty() {
        let buffer = LogBuffer::new(0);
        buffer.push(entry("a"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn layer_captures_message_level_and_target() {
        let buffer = Arc::new(LogBuffer::new(8));
        let subscriber = registry().with(BufferLayer::new(buffer.clone()));
        tracing::subscriber::with_default(subscriber, || {
            info!(handle = "p1", "connected");
            warn!(target: "bluenet::relay", "lagging");
        });

        let entries = buffer.get_all();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "connected");
        assert_eq!(entries[0].level, "INFO");
        assert_eq!(entries[1].target, "bluenet::relay");
        assert_eq!(entries[1].level, "WARN");
    }
}
