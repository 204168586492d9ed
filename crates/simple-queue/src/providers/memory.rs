//! In-memory queue for tests and local development.
//!
//! Messages travel through the same wire codec as the network backends, so a
//! type that round-trips here round-trips everywhere. Taking a message off the
//! FIFO is its acknowledgement: a message whose handler fails is not
//! redelivered.

use crate::error::QueueError;
use crate::message::{stamp_and_encode, EventKind, Message, QueueName};
use crate::queue::{deliver, pause, BackendKind, MessageCallback, MessageQueue, ReceiveSlot};
use crate::settings::InMemorySettings;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

type Storage = Arc<Mutex<VecDeque<String>>>;

/// Process-local FIFO queue
pub struct InMemoryQueue<T: Message> {
    queue_name: QueueName,
    settings: InMemorySettings,
    storage: Storage,
    receiver: ReceiveSlot,
    _message: PhantomData<fn() -> T>,
}

impl<T: Message> InMemoryQueue<T> {
    /// Create an empty queue named after `T`
    pub fn new(settings: InMemorySettings) -> Result<Self, QueueError> {
        let queue_name = QueueName::for_message::<T>()?;
        Ok(Self::with_name(queue_name, settings))
    }

    /// Create an empty queue with an explicit name
    pub fn with_name(queue_name: QueueName, settings: InMemorySettings) -> Self {
        Self {
            receiver: ReceiveSlot::new(queue_name.clone()),
            queue_name,
            settings,
            storage: Arc::new(Mutex::new(VecDeque::new())),
            _message: PhantomData,
        }
    }

    /// Number of messages waiting to be received
    pub fn len(&self) -> usize {
        self.storage.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_poisoned(&self) -> QueueError {
        QueueError::InvalidState {
            message: format!("in-memory queue '{}' lock poisoned", self.queue_name),
        }
    }
}

#[async_trait]
impl<T: Message> MessageQueue<T> for InMemoryQueue<T> {
    async fn send_async(&self, message: &mut T, kind: EventKind) -> Result<(), QueueError> {
        let payload = stamp_and_encode(message, kind)?;

        let mut queue = self.storage.lock().map_err(|_| self.lock_poisoned())?;
        queue.push_back(payload);

        debug!(
            queue = %self.queue_name,
            event_kind = %kind,
            depth = queue.len(),
            "Message enqueued"
        );
        Ok(())
    }

    fn receive(&self, handler: MessageCallback<T>) -> Result<(), QueueError> {
        let storage = Arc::clone(&self.storage);
        let queue_name = self.queue_name.clone();
        let poll_interval = self.settings.poll_interval();

        self.receiver.start(move |mut shutdown| async move {
            info!(queue = %queue_name, "In-memory receive loop started");
            loop {
                if *shutdown.borrow() {
                    break;
                }

                let next = match storage.lock() {
                    Ok(mut queue) => queue.pop_front(),
                    Err(_) => {
                        error!(
                            queue = %queue_name,
                            "In-memory queue lock poisoned, stopping receive loop"
                        );
                        break;
                    }
                };

                match next {
                    Some(payload) => {
                        deliver(payload.as_bytes(), &handler, &queue_name).await;
                    }
                    None => {
                        if !pause(&mut shutdown, poll_interval).await {
                            break;
                        }
                    }
                }
            }
            debug!(queue = %queue_name, "In-memory receive loop exiting");
        })
    }

    async fn delete_queue(&self) -> Result<(), QueueError> {
        let purged = {
            let mut queue = self.storage.lock().map_err(|_| self.lock_poisoned())?;
            let purged = queue.len();
            queue.clear();
            purged
        };

        info!(queue = %self.queue_name, purged, "In-memory queue deleted");
        Ok(())
    }

    async fn close_connection(&self) -> Result<(), QueueError> {
        self.receiver.stop().await;
        Ok(())
    }

    fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }

    fn backend(&self) -> BackendKind {
        BackendKind::InMemory
    }
}
