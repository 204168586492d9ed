//! Routing of received messages to per-kind handlers, and the matching
//! producer helpers.

use crate::error::QueueError;
use crate::message::{EventKind, Message};
use crate::queue::{MessageCallback, MessageQueue};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::info;

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;

/// Application handler for one message type
///
/// One method per recognized [`EventKind`]. An error return is logged by the
/// receive loop and the message is left unacknowledged.
#[async_trait]
pub trait MessageHandler<T: Message>: Send + Sync + 'static {
    async fn handle_added(&self, message: T) -> anyhow::Result<()>;

    async fn handle_updated(&self, message: T) -> anyhow::Result<()>;

    async fn handle_deleted(&self, message: T) -> anyhow::Result<()>;
}

type HandlerFn<T> = Arc<dyn Fn(T) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Fixed mapping from event kind to handler callback
///
/// There is exactly one slot per recognized kind and no way to register any
/// other kind.
pub struct HandlerTable<T: Message> {
    added: HandlerFn<T>,
    updated: HandlerFn<T>,
    deleted: HandlerFn<T>,
}

impl<T: Message> HandlerTable<T> {
    /// Bind the three handler methods of `handler`
    pub fn from_handler<H: MessageHandler<T>>(handler: Arc<H>) -> Self {
        let on_added = Arc::clone(&handler);
        let on_updated = Arc::clone(&handler);
        let on_deleted = handler;

        Self {
            added: Arc::new(move |message: T| {
                let handler = Arc::clone(&on_added);
                async move { handler.handle_added(message).await }.boxed()
            }),
            updated: Arc::new(move |message: T| {
                let handler = Arc::clone(&on_updated);
                async move { handler.handle_updated(message).await }.boxed()
            }),
            deleted: Arc::new(move |message: T| {
                let handler = Arc::clone(&on_deleted);
                async move { handler.handle_deleted(message).await }.boxed()
            }),
        }
    }

    /// Route `message` to the handler for its kind
    ///
    /// # Errors
    ///
    /// - `UnsupportedEventKind` if the kind is not recognized; no handler runs
    /// - `Handler` if the selected handler fails
    pub async fn dispatch(&self, message: T) -> Result<(), QueueError> {
        let kind = message.event_kind();
        let handler = match kind {
            EventKind::Added => &self.added,
            EventKind::Updated => &self.updated,
            EventKind::Deleted => &self.deleted,
            EventKind::Unrecognized => return Err(QueueError::UnsupportedEventKind { kind }),
        };

        handler(message).await.map_err(|e| QueueError::Handler {
            kind,
            message: format!("{e:#}"),
        })
    }
}

/// Connects a queue's receive loop to a [`HandlerTable`]
pub struct Dispatcher<T: Message> {
    queue: Arc<dyn MessageQueue<T>>,
    table: Arc<HandlerTable<T>>,
}

impl<T: Message> Dispatcher<T> {
    pub fn new<H: MessageHandler<T>>(queue: Arc<dyn MessageQueue<T>>, handler: Arc<H>) -> Self {
        Self {
            queue,
            table: Arc::new(HandlerTable::from_handler(handler)),
        }
    }

    /// Start the queue's receive loop with routing as its callback
    ///
    /// Returns once the loop is running.
    pub fn start_listening(&self) -> Result<(), QueueError> {
        let table = Arc::clone(&self.table);
        let route: MessageCallback<T> = Arc::new(move |message: T| {
            let table = Arc::clone(&table);
            async move { table.dispatch(message).await }.boxed()
        });

        self.queue.receive(route)?;
        info!(
            queue = %self.queue.queue_name(),
            backend = %self.queue.backend(),
            "Dispatcher listening"
        );
        Ok(())
    }

    /// Stop the receive loop and close the queue's connection
    pub async fn stop_listening(&self) -> Result<(), QueueError> {
        self.queue.close_connection().await
    }

    pub fn queue(&self) -> &Arc<dyn MessageQueue<T>> {
        &self.queue
    }

    pub fn table(&self) -> &HandlerTable<T> {
        &self.table
    }
}

/// Producer side: stamps the kind and sends
///
/// # Examples
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use simple_queue::{EventKind, Message, Publisher, QueueFactory};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Invoice {
///     #[serde(rename = "EventType", default)]
///     event_kind: EventKind,
///     total: u32,
/// }
///
/// impl Message for Invoice {
///     fn event_kind(&self) -> EventKind {
///         self.event_kind
///     }
///
///     fn set_event_kind(&mut self, kind: EventKind) {
///         self.event_kind = kind;
///     }
/// }
///
/// # tokio_test::block_on(async {
/// let publisher = Publisher::new(QueueFactory::create_test_queue::<Invoice>()?);
///
/// let mut invoice = Invoice { event_kind: EventKind::Added, total: 12 };
/// publisher.update_async(&mut invoice).await?;
///
/// assert_eq!(invoice.event_kind, EventKind::Updated);
/// # Ok::<(), simple_queue::QueueError>(())
/// # }).unwrap();
/// ```
pub struct Publisher<T: Message> {
    queue: Arc<dyn MessageQueue<T>>,
}

impl<T: Message> Publisher<T> {
    pub fn new(queue: Arc<dyn MessageQueue<T>>) -> Self {
        Self { queue }
    }

    pub fn add(&self, message: &mut T) -> Result<(), QueueError> {
        self.queue.send(message, EventKind::Added)
    }

    pub fn update(&self, message: &mut T) -> Result<(), QueueError> {
        self.queue.send(message, EventKind::Updated)
    }

    pub fn delete(&self, message: &mut T) -> Result<(), QueueError> {
        self.queue.send(message, EventKind::Deleted)
    }

    pub async fn add_async(&self, message: &mut T) -> Result<(), QueueError> {
        self.queue.send_async(message, EventKind::Added).await
    }

    pub async fn update_async(&self, message: &mut T) -> Result<(), QueueError> {
        self.queue.send_async(message, EventKind::Updated).await
    }

    pub async fn delete_async(&self, message: &mut T) -> Result<(), QueueError> {
        self.queue.send_async(message, EventKind::Deleted).await
    }
}
