//! RabbitMQ queue adapter.
//!
//! One durable queue per message type, consumed with manual acknowledgement.
//! A delivery is acked only after its handler succeeds and is rejected with
//! requeue when the handler fails, so the broker redelivers it.
//!
//! The broker is reached through [`BrokerChannel`]; the `rabbitmq` feature
//! provides the AMQP implementation on top of `lapin`.

#[cfg(not(feature = "rabbitmq"))]
use crate::error::ConfigurationError;
use crate::error::QueueError;
use crate::message::{stamp_and_encode, EventKind, Message, QueueName};
use crate::queue::{
    deliver, should_continue_after, until_shutdown, BackendKind, Delivery, MessageCallback,
    MessageQueue, ReceiveSlot,
};
use crate::settings::RabbitMqSettings;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "rabbitmq_tests.rs"]
mod tests;

const BACKEND: &str = "rabbitmq";

// ============================================================================
// Transport Seam
// ============================================================================

/// A message handed out by the broker, not yet acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerDelivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
    pub redelivered: bool,
}

/// AMQP channel operations used by [`RabbitMqQueue`]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declare a durable, non-exclusive, non-auto-delete queue
    async fn declare_queue(&self, queue: &QueueName) -> Result<(), QueueError>;

    /// Publish to the default exchange, routed by queue name
    async fn publish(&self, queue: &QueueName, body: Vec<u8>) -> Result<(), QueueError>;

    /// Start a manual-ack consumer on the queue
    async fn consume(&self, queue: &QueueName) -> Result<Box<dyn BrokerConsumer>, QueueError>;

    async fn ack(&self, delivery_tag: u64) -> Result<(), QueueError>;

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), QueueError>;

    /// Delete the queue, returning the number of messages purged with it
    async fn delete_queue(&self, queue: &QueueName) -> Result<u32, QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// Stream of deliveries from a consumer
#[async_trait]
pub trait BrokerConsumer: Send {
    /// Wait for the next delivery; `None` once the consumer is cancelled
    async fn next_delivery(&mut self) -> Option<Result<BrokerDelivery, QueueError>>;
}

// ============================================================================
// Adapter
// ============================================================================

/// Durable broker queue backed by RabbitMQ
pub struct RabbitMqQueue<T: Message> {
    queue_name: QueueName,
    channel: Arc<dyn BrokerChannel>,
    receiver: ReceiveSlot,
    closed: AtomicBool,
    _message: PhantomData<fn() -> T>,
}

impl<T: Message> RabbitMqQueue<T> {
    /// Connect to the broker and declare the queue
    ///
    /// Settings are validated before any network call is made.
    pub async fn connect(
        settings: &RabbitMqSettings,
        queue_name: QueueName,
    ) -> Result<Self, QueueError> {
        settings.validate()?;
        let channel = open_channel(&settings.uri).await?;
        Self::with_channel(channel, queue_name).await
    }

    /// Build the adapter over an open channel and declare the queue
    pub async fn with_channel(
        channel: Arc<dyn BrokerChannel>,
        queue_name: QueueName,
    ) -> Result<Self, QueueError> {
        channel.declare_queue(&queue_name).await?;
        info!(queue = %queue_name, "RabbitMQ queue declared");

        Ok(Self {
            receiver: ReceiveSlot::new(queue_name.clone()),
            queue_name,
            channel,
            closed: AtomicBool::new(false),
            _message: PhantomData,
        })
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::ConnectionClosed {
                queue_name: self.queue_name.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Message> MessageQueue<T> for RabbitMqQueue<T> {
    async fn send_async(&self, message: &mut T, kind: EventKind) -> Result<(), QueueError> {
        self.ensure_open()?;
        let payload = stamp_and_encode(message, kind)?;

        self.channel
            .publish(&self.queue_name, payload.into_bytes())
            .await?;

        debug!(queue = %self.queue_name, event_kind = %kind, "Message published");
        Ok(())
    }

    fn receive(&self, handler: MessageCallback<T>) -> Result<(), QueueError> {
        self.ensure_open()?;
        let channel = Arc::clone(&self.channel);
        let queue_name = self.queue_name.clone();

        self.receiver.start(move |mut shutdown| async move {
            let mut consumer = loop {
                match until_shutdown(&mut shutdown, channel.consume(&queue_name)).await {
                    None => return,
                    Some(Ok(consumer)) => break consumer,
                    Some(Err(e)) => {
                        if !should_continue_after(&e, &queue_name, &mut shutdown).await {
                            return;
                        }
                    }
                }
            };
            info!(queue = %queue_name, "RabbitMQ consumer started");

            loop {
                let delivery = match until_shutdown(&mut shutdown, consumer.next_delivery()).await
                {
                    None => break,
                    Some(None) => {
                        info!(queue = %queue_name, "RabbitMQ consumer stream ended");
                        break;
                    }
                    Some(Some(Err(e))) => {
                        if should_continue_after(&e, &queue_name, &mut shutdown).await {
                            continue;
                        }
                        break;
                    }
                    Some(Some(Ok(delivery))) => delivery,
                };

                if delivery.redelivered {
                    debug!(
                        queue = %queue_name,
                        delivery_tag = delivery.delivery_tag,
                        "Handling redelivered message"
                    );
                }

                let settled = match deliver(&delivery.body, &handler, &queue_name).await {
                    Delivery::Handled => channel.ack(delivery.delivery_tag).await,
                    Delivery::HandlerFailed => channel.reject(delivery.delivery_tag, true).await,
                    Delivery::Malformed => Ok(()),
                };

                if let Err(e) = settled {
                    warn!(
                        queue = %queue_name,
                        delivery_tag = delivery.delivery_tag,
                        error = %e,
                        "Failed to settle delivery"
                    );
                    if !should_continue_after(&e, &queue_name, &mut shutdown).await {
                        break;
                    }
                }
            }
        })
    }

    async fn delete_queue(&self) -> Result<(), QueueError> {
        self.ensure_open()?;
        let purged = self.channel.delete_queue(&self.queue_name).await?;

        info!(queue = %self.queue_name, purged, "RabbitMQ queue deleted");
        Ok(())
    }

    async fn close_connection(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(QueueError::ConnectionClosed {
                queue_name: self.queue_name.to_string(),
            });
        }

        self.receiver.stop().await;
        self.channel.close().await?;

        info!(queue = %self.queue_name, "RabbitMQ connection closed");
        Ok(())
    }

    fn queue_name(&self) -> &QueueName {
        &self.queue_name
    }

    fn backend(&self) -> BackendKind {
        BackendKind::RabbitMq
    }
}

// ============================================================================
// AMQP Client
// ============================================================================

#[cfg(feature = "rabbitmq")]
async fn open_channel(uri: &str) -> Result<Arc<dyn BrokerChannel>, QueueError> {
    Ok(Arc::new(amqp::LapinChannel::open(uri).await?))
}

#[cfg(not(feature = "rabbitmq"))]
async fn open_channel(_uri: &str) -> Result<Arc<dyn BrokerChannel>, QueueError> {
    Err(ConfigurationError::BackendDisabled {
        backend: BACKEND.to_string(),
        feature: "rabbitmq".to_string(),
    }
    .into())
}

#[cfg(feature = "rabbitmq")]
mod amqp {
    use super::{BrokerChannel, BrokerConsumer, BrokerDelivery, BACKEND};
    use crate::error::QueueError;
    use crate::message::QueueName;
    use async_trait::async_trait;
    use futures::StreamExt;
    use lapin::options::{
        BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
        QueueDeclareOptions, QueueDeleteOptions,
    };
    use lapin::types::FieldTable;
    use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, Consumer};

    const PERSISTENT: u8 = 2;
    const REPLY_SUCCESS: u16 = 200;

    fn amqp_error(e: lapin::Error) -> QueueError {
        match e {
            lapin::Error::IOError(_) => QueueError::transient(BACKEND, e.to_string()),
            other => QueueError::permanent(BACKEND, other.to_string()),
        }
    }

    /// A connection with a single channel
    pub(super) struct LapinChannel {
        connection: Connection,
        channel: Channel,
    }

    impl LapinChannel {
        pub(super) async fn open(uri: &str) -> Result<Self, QueueError> {
            let connection = Connection::connect(uri, ConnectionProperties::default())
                .await
                .map_err(amqp_error)?;
            let channel = connection.create_channel().await.map_err(amqp_error)?;

            Ok(Self {
                connection,
                channel,
            })
        }
    }

    #[async_trait]
    impl BrokerChannel for LapinChannel {
        async fn declare_queue(&self, queue: &QueueName) -> Result<(), QueueError> {
            let options = QueueDeclareOptions {
                durable: true,
                exclusive: false,
                auto_delete: false,
                ..QueueDeclareOptions::default()
            };
            self.channel
                .queue_declare(queue.as_str(), options, FieldTable::default())
                .await
                .map_err(amqp_error)?;
            Ok(())
        }

        async fn publish(&self, queue: &QueueName, body: Vec<u8>) -> Result<(), QueueError> {
            let properties = BasicProperties::default()
                .with_content_type("application/json".into())
                .with_delivery_mode(PERSISTENT);

            let confirm = self
                .channel
                .basic_publish(
                    "",
                    queue.as_str(),
                    BasicPublishOptions::default(),
                    &body,
                    properties,
                )
                .await
                .map_err(amqp_error)?;
            confirm.await.map_err(amqp_error)?;
            Ok(())
        }

        async fn consume(&self, queue: &QueueName) -> Result<Box<dyn BrokerConsumer>, QueueError> {
            let consumer = self
                .channel
                .basic_consume(
                    queue.as_str(),
                    "",
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(amqp_error)?;
            Ok(Box::new(LapinConsumer { inner: consumer }))
        }

        async fn ack(&self, delivery_tag: u64) -> Result<(), QueueError> {
            self.channel
                .basic_ack(delivery_tag, BasicAckOptions::default())
                .await
                .map_err(amqp_error)
        }

        async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), QueueError> {
            self.channel
                .basic_reject(delivery_tag, BasicRejectOptions { requeue })
                .await
                .map_err(amqp_error)
        }

        async fn delete_queue(&self, queue: &QueueName) -> Result<u32, QueueError> {
            self.channel
                .queue_delete(queue.as_str(), QueueDeleteOptions::default())
                .await
                .map_err(amqp_error)
        }

        async fn close(&self) -> Result<(), QueueError> {
            self.channel
                .close(REPLY_SUCCESS, "closing")
                .await
                .map_err(amqp_error)?;
            self.connection
                .close(REPLY_SUCCESS, "closing")
                .await
                .map_err(amqp_error)
        }
    }

    struct LapinConsumer {
        inner: Consumer,
    }

    #[async_trait]
    impl BrokerConsumer for LapinConsumer {
        async fn next_delivery(&mut self) -> Option<Result<BrokerDelivery, QueueError>> {
            let delivery = self.inner.next().await?;
            Some(
                delivery
                    .map(|d| BrokerDelivery {
                        delivery_tag: d.delivery_tag,
                        body: d.data,
                        redelivered: d.redelivered,
                    })
                    .map_err(amqp_error),
            )
        }
    }
}
