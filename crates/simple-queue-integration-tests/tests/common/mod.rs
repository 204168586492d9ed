//! Common test utilities for integration tests.
//!
//! This module provides:
//! - `OrderEvent`, a message type shared by all integration tests
//! - `Recorder`, an ordered log of handler invocations
//! - `RecordingHandler`, a handler that writes every call to a `Recorder`
//! - Helpers for building in-memory queues with a short poll interval

#![allow(dead_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use simple_queue::{
    BackendSettings, EventKind, InMemoryQueue, InMemorySettings, Message, MessageHandler,
    MessageQueue, QueueFactory,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Test Message
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct OrderEvent {
    #[serde(rename = "EventType", default)]
    pub event_kind: EventKind,
    pub order_id: u32,
    pub note: String,
}

impl OrderEvent {
    pub fn new(order_id: u32, note: &str) -> Self {
        Self {
            event_kind: EventKind::Added,
            order_id,
            note: note.to_string(),
        }
    }
}

impl Message for OrderEvent {
    fn event_kind(&self) -> EventKind {
        self.event_kind
    }

    fn set_event_kind(&mut self, kind: EventKind) {
        self.event_kind = kind;
    }
}

// ============================================================================
// Recording
// ============================================================================

/// Ordered record of handler calls, formatted as `<kind>:<order_id>`
#[derive(Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn record(&self, kind: EventKind, event: &OrderEvent) {
        self.entries
            .lock()
            .unwrap()
            .push(format!("{}:{}", kind, event.order_id));
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    /// Poll until at least `count` entries exist or the timeout elapses
    pub async fn wait_for_len(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.entries().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.entries().len() >= count
    }
}

/// Handler recording every call; orders with id 0 fail
pub struct RecordingHandler {
    pub recorder: Recorder,
}

impl RecordingHandler {
    pub fn new(recorder: Recorder) -> Arc<Self> {
        Arc::new(Self { recorder })
    }

    fn handle(&self, kind: EventKind, event: OrderEvent) -> anyhow::Result<()> {
        self.recorder.record(kind, &event);
        if event.order_id == 0 {
            anyhow::bail!("order 0 is rejected");
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler<OrderEvent> for RecordingHandler {
    async fn handle_added(&self, message: OrderEvent) -> anyhow::Result<()> {
        self.handle(EventKind::Added, message)
    }

    async fn handle_updated(&self, message: OrderEvent) -> anyhow::Result<()> {
        self.handle(EventKind::Updated, message)
    }

    async fn handle_deleted(&self, message: OrderEvent) -> anyhow::Result<()> {
        self.handle(EventKind::Deleted, message)
    }
}

// ============================================================================
// Queue Helpers
// ============================================================================

pub fn fast_in_memory_settings() -> InMemorySettings {
    InMemorySettings {
        poll_interval_millis: 10,
    }
}

/// Concrete in-memory queue, for tests that inspect its length
pub fn in_memory_queue() -> Arc<InMemoryQueue<OrderEvent>> {
    Arc::new(InMemoryQueue::new(fast_in_memory_settings()).unwrap())
}

/// Queue built through the factory, as an application would
pub async fn factory_queue() -> Arc<dyn MessageQueue<OrderEvent>> {
    QueueFactory::create::<OrderEvent>(&BackendSettings::InMemory(fast_in_memory_settings()))
        .await
        .unwrap()
}
