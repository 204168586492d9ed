//! Shared fixtures for the crate's unit tests.

use crate::dispatcher::MessageHandler;
use crate::message::{EventKind, Message};
use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Message type used throughout the unit tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaMessage {
    #[serde(rename = "EventType", default)]
    pub event_kind: EventKind,
    pub id: String,
    pub text: String,
}

impl MediaMessage {
    pub fn new(id: &str, text: &str) -> Self {
        Self {
            event_kind: EventKind::Added,
            id: id.to_string(),
            text: text.to_string(),
        }
    }

    pub fn with_kind(mut self, kind: EventKind) -> Self {
        self.event_kind = kind;
        self
    }

    /// Wire payload for this message
    pub fn payload(&self) -> String {
        serde_json::to_string(self).unwrap()
    }
}

impl Message for MediaMessage {
    fn event_kind(&self) -> EventKind {
        self.event_kind
    }

    fn set_event_kind(&mut self, kind: EventKind) {
        self.event_kind = kind;
    }
}

/// Ordered log of calls made against fakes, shared between a fake transport
/// and the handler so tests can assert happens-before relations.
#[derive(Clone, Default)]
pub struct CallLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl CallLog {
    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    /// Poll until `entry` shows up in the log or the timeout elapses
    pub async fn wait_for(&self, entry: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.position(entry).is_some() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.position(entry).is_some()
    }
}

/// Handler that records `handle:<kind>:<text>` and fails for texts listed in
/// `failing_texts`.
pub struct RecordingHandler {
    pub log: CallLog,
    pub failing_texts: Vec<String>,
}

impl RecordingHandler {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            failing_texts: Vec::new(),
        }
    }

    pub fn failing_on(mut self, text: &str) -> Self {
        self.failing_texts.push(text.to_string());
        self
    }

    async fn handle(&self, kind: EventKind, message: MediaMessage) -> anyhow::Result<()> {
        self.log.record(format!("handle:{}:{}", kind, message.text));
        if self.failing_texts.contains(&message.text) {
            anyhow::bail!("refusing to handle '{}'", message.text);
        }
        Ok(())
    }
}

#[async_trait]
impl MessageHandler<MediaMessage> for RecordingHandler {
    async fn handle_added(&self, message: MediaMessage) -> anyhow::Result<()> {
        self.handle(EventKind::Added, message).await
    }

    async fn handle_updated(&self, message: MediaMessage) -> anyhow::Result<()> {
        self.handle(EventKind::Updated, message).await
    }

    async fn handle_deleted(&self, message: MediaMessage) -> anyhow::Result<()> {
        self.handle(EventKind::Deleted, message).await
    }
}

/// Callback that records `handle:<text>` and fails for the given text
pub fn recording_callback(
    log: CallLog,
    failing_text: Option<&str>,
) -> crate::queue::MessageCallback<MediaMessage> {
    let failing_text = failing_text.map(str::to_string);
    Arc::new(move |message: MediaMessage| {
        let log = log.clone();
        let failing_text = failing_text.clone();
        async move {
            log.record(format!("handle:{}", message.text));
            if failing_text.as_deref() == Some(message.text.as_str()) {
                return Err(crate::error::QueueError::Handler {
                    kind: message.event_kind,
                    message: "handler failed".to_string(),
                });
            }
            Ok(())
        }
        .boxed()
    })
}
