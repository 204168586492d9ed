//! The transport-agnostic queue contract and the receive-loop plumbing shared
//! by the backend adapters.

use crate::blocking;
use crate::error::QueueError;
use crate::message::{decode, EventKind, Message, QueueName};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;

/// Entry point a receive loop calls for every decoded message
///
/// The loop awaits the returned future before it acknowledges the message and
/// before it fetches the next one.
pub type MessageCallback<T> =
    Arc<dyn Fn(T) -> BoxFuture<'static, Result<(), QueueError>> + Send + Sync>;

/// Enumeration of supported queue backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendKind {
    RabbitMq,
    Kafka,
    AwsSqs,
    InMemory,
}

impl BackendKind {
    /// Get the short name used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RabbitMq => "rabbitmq",
            Self::Kafka => "kafka",
            Self::AwsSqs => "sqs",
            Self::InMemory => "in_memory",
        }
    }

    /// Check if the backend redelivers messages whose handler did not complete
    pub fn is_at_least_once(&self) -> bool {
        match self {
            Self::RabbitMq => true,
            Self::Kafka => true,
            Self::AwsSqs => true,
            Self::InMemory => false,
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main interface for queue operations across all backends
#[async_trait]
pub trait MessageQueue<T: Message>: Send + Sync {
    /// Send a message and block until the transport has accepted it
    ///
    /// The kind is stamped onto `message` before it is serialized.
    fn send(&self, message: &mut T, kind: EventKind) -> Result<(), QueueError> {
        blocking::wait(self.send_async(message, kind))?
    }

    /// Send a message, suspending until the transport has accepted it
    async fn send_async(&self, message: &mut T, kind: EventKind) -> Result<(), QueueError>;

    /// Register the callback for all inbound messages and start consuming
    ///
    /// Returns as soon as the background loop is spawned.
    fn receive(&self, handler: MessageCallback<T>) -> Result<(), QueueError>;

    /// Remove the backend's queue or topic, where it has one
    async fn delete_queue(&self) -> Result<(), QueueError>;

    /// Stop the receive loop and release the connection
    async fn close_connection(&self) -> Result<(), QueueError>;

    /// Get the queue or topic this instance is bound to
    fn queue_name(&self) -> &QueueName;

    /// Get the backend type
    fn backend(&self) -> BackendKind;
}

// ============================================================================
// Receive Loop Plumbing
// ============================================================================

/// A spawned consumption task together with its shutdown signal
struct ReceiveLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// Holds at most one receive loop for an adapter instance
pub(crate) struct ReceiveSlot {
    queue_name: QueueName,
    current: Mutex<Option<ReceiveLoop>>,
}

impl ReceiveSlot {
    pub(crate) fn new(queue_name: QueueName) -> Self {
        Self {
            queue_name,
            current: Mutex::new(None),
        }
    }

    /// Spawn the loop produced by `body`, unless one is already running
    pub(crate) fn start<F, Fut>(&self, body: F) -> Result<(), QueueError>
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut current = self
            .current
            .lock()
            .map_err(|_| QueueError::InvalidState {
                message: "receive slot lock poisoned".to_string(),
            })?;

        if current.is_some() {
            return Err(QueueError::ReceiveAlreadyStarted {
                queue_name: self.queue_name.to_string(),
            });
        }

        let runtime = Handle::try_current().map_err(|_| QueueError::InvalidState {
            message: "receive must be called from within a tokio runtime".to_string(),
        })?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let join = runtime.spawn(body(shutdown_rx));
        *current = Some(ReceiveLoop { shutdown_tx, join });

        debug!(queue = %self.queue_name, "Receive loop spawned");
        Ok(())
    }

    /// Check if a receive loop has been started
    pub(crate) fn is_running(&self) -> bool {
        self.current
            .lock()
            .map(|current| current.as_ref().is_some_and(|l| !l.join.is_finished()))
            .unwrap_or(false)
    }

    /// Signal the loop to stop and wait until it has
    ///
    /// An in-flight handler runs to completion first. Called from the loop's
    /// own task, for example by a handler, it only signals.
    pub(crate) async fn stop(&self) {
        let running = match self.current.lock() {
            Ok(mut current) => current.take(),
            Err(_) => None,
        };

        let Some(receive_loop) = running else {
            return;
        };

        // ignore send error: the loop may already have exited on its own
        let _ = receive_loop.shutdown_tx.send(true);

        if tokio::task::try_id() == Some(receive_loop.join.id()) {
            debug!(queue = %self.queue_name, "Receive loop asked to stop from its own task");
            return;
        }

        if let Err(e) = receive_loop.join.await {
            warn!(queue = %self.queue_name, error = %e, "Receive loop ended abnormally");
        }

        info!(queue = %self.queue_name, "Receive loop stopped");
    }
}

/// Run `fut` unless shutdown is signalled first
///
/// Returns `None` when the loop should exit: shutdown was requested or the
/// sender is gone.
pub(crate) async fn until_shutdown<F: Future>(
    shutdown: &mut watch::Receiver<bool>,
    fut: F,
) -> Option<F::Output> {
    if *shutdown.borrow() {
        return None;
    }

    tokio::select! {
        biased;
        _ = shutdown.changed() => None,
        output = fut => Some(output),
    }
}

/// Sleep for `delay`, returning `false` if shutdown interrupted the pause
pub(crate) async fn pause(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    until_shutdown(shutdown, tokio::time::sleep(delay))
        .await
        .is_some()
}

/// Decide how a receive loop reacts to a failed transport call
///
/// Transient failures pause for the suggested delay and keep the loop alive;
/// anything else ends it.
pub(crate) async fn should_continue_after(
    error: &QueueError,
    queue_name: &QueueName,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if error.is_transient() {
        let delay = error.retry_after().unwrap_or(Duration::from_secs(1));
        warn!(
            queue = %queue_name,
            error = %error,
            retry_in_ms = delay.as_millis() as u64,
            "Transient transport error in receive loop"
        );
        return pause(shutdown, delay).await;
    }

    error!(
        queue = %queue_name,
        error = %error,
        "Receive loop stopped by transport error"
    );
    false
}

/// Outcome of handing one inbound payload to the callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    /// The callback completed; the payload may be acknowledged
    Handled,
    /// The callback returned an error or panicked
    HandlerFailed,
    /// The payload was empty or could not be decoded; the callback never ran
    Malformed,
}

/// Decode `payload` and run the callback on it
///
/// Handler failures are logged here and never escape into the receive loop.
pub(crate) async fn deliver<T: Message>(
    payload: &[u8],
    callback: &MessageCallback<T>,
    queue_name: &QueueName,
) -> Delivery {
    let message = match decode::<T>(payload) {
        Ok(Some(message)) => message,
        Ok(None) => {
            debug!(queue = %queue_name, "Skipping payload without a message");
            return Delivery::Malformed;
        }
        Err(e) => {
            debug!(queue = %queue_name, error = %e, "Skipping payload that failed to decode");
            return Delivery::Malformed;
        }
    };

    let kind = message.event_kind();
    match AssertUnwindSafe(callback(message)).catch_unwind().await {
        Ok(Ok(())) => Delivery::Handled,
        Ok(Err(e)) => {
            error!(queue = %queue_name, event_kind = %kind, error = %e, "Message handler failed");
            Delivery::HandlerFailed
        }
        Err(_) => {
            error!(queue = %queue_name, event_kind = %kind, "Message handler panicked");
            Delivery::HandlerFailed
        }
    }
}
