//! Kafka topic adapter.
//!
//! Each message type maps to a topic of the same name. The consumer joins the
//! group `consumer-group-<topic>`, starts from the earliest offset when the
//! group has none, and commits manually: a record's offset is committed only
//! after its handler succeeds. When the handler fails the consumer is rewound
//! to that record, so nothing past it is committed before it has been handled.

#[cfg(not(feature = "kafka"))]
use crate::error::ConfigurationError;
use crate::error::QueueError;
use crate::message::{stamp_and_encode, EventKind, Message, QueueName};
use crate::queue::{
    deliver, pause, should_continue_after, until_shutdown, BackendKind, Delivery,
    MessageCallback, MessageQueue, ReceiveSlot,
};
use crate::settings::KafkaSettings;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "kafka_tests.rs"]
mod tests;

const BACKEND: &str = "kafka";

/// Wait before fetching a record again after its handler failed
const REDELIVERY_DELAY: Duration = Duration::from_secs(1);

/// A consumed record with its position in the topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// `None` for tombstones
    pub payload: Option<Vec<u8>>,
}

/// Producer and consumer operations used by [`KafkaQueue`]
#[async_trait]
pub trait StreamClient: Send + Sync {
    async fn produce(&self, topic: &QueueName, payload: Vec<u8>) -> Result<(), QueueError>;

    async fn subscribe(&self, topic: &QueueName) -> Result<(), QueueError>;

    /// Wait for the next record on the subscribed topic
    async fn next_record(&self) -> Result<StreamRecord, QueueError>;

    /// Commit the position just past `record`
    async fn commit(&self, record: &StreamRecord) -> Result<(), QueueError>;

    /// Rewind the consumer so `record` is the next one fetched from its partition
    async fn seek(&self, record: &StreamRecord) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}

/// Streaming queue backed by a Kafka topic
pub struct KafkaQueue<T: Message> {
    topic: QueueName,
    client: Arc<dyn StreamClient>,
    receiver: ReceiveSlot,
    closed: AtomicBool,
    _message: PhantomData<fn() -> T>,
}

impl<T: Message> KafkaQueue<T> {
    /// Create the producer and consumer and subscribe to the topic
    pub async fn connect(settings: &KafkaSettings, topic: QueueName) -> Result<Self, QueueError> {
        settings.validate()?;
        let client = open_client(settings, &topic)?;
        Self::with_client(client, topic).await
    }

    pub async fn with_client(
        client: Arc<dyn StreamClient>,
        topic: QueueName,
    ) -> Result<Self, QueueError> {
        client.subscribe(&topic).await?;
        info!(
            topic = %topic,
            consumer_group = %KafkaSettings::consumer_group_for(&topic),
            "Kafka consumer subscribed"
        );

        Ok(Self {
            receiver: ReceiveSlot::new(topic.clone()),
            topic,
            client,
            closed: AtomicBool::new(false),
            _message: PhantomData,
        })
    }

    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::ConnectionClosed {
                queue_name: self.topic.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Message> MessageQueue<T> for KafkaQueue<T> {
    async fn send_async(&self, message: &mut T, kind: EventKind) -> Result<(), QueueError> {
        self.ensure_open()?;
        let payload = stamp_and_encode(message, kind)?;

        self.client.produce(&self.topic, payload.into_bytes()).await?;

        debug!(topic = %self.topic, event_kind = %kind, "Record produced");
        Ok(())
    }

    fn receive(&self, handler: MessageCallback<T>) -> Result<(), QueueError> {
        self.ensure_open()?;
        let client = Arc::clone(&self.client);
        let topic = self.topic.clone();

        self.receiver.start(move |mut shutdown| async move {
            info!(topic = %topic, "Kafka receive loop started");
            loop {
                let record = match until_shutdown(&mut shutdown, client.next_record()).await {
                    None => break,
                    Some(Ok(record)) => record,
                    Some(Err(e)) => {
                        if should_continue_after(&e, &topic, &mut shutdown).await {
                            continue;
                        }
                        break;
                    }
                };

                let Some(payload) = record.payload.as_deref() else {
                    debug!(
                        topic = %topic,
                        offset = record.offset,
                        "Skipping record without payload"
                    );
                    continue;
                };

                match deliver(payload, &handler, &topic).await {
                    Delivery::Handled => {}
                    Delivery::Malformed => continue,
                    Delivery::HandlerFailed => {
                        if let Err(e) = client.seek(&record).await {
                            warn!(
                                topic = %topic,
                                partition = record.partition,
                                offset = record.offset,
                                error = %e,
                                "Failed to rewind to unhandled record"
                            );
                            if !should_continue_after(&e, &topic, &mut shutdown).await {
                                break;
                            }
                            continue;
                        }

                        debug!(
                            topic = %topic,
                            partition = record.partition,
                            offset = record.offset,
                            "Rewound to unhandled record"
                        );
                        if !pause(&mut shutdown, REDELIVERY_DELAY).await {
                            break;
                        }
                        continue;
                    }
                }

                if let Err(e) = client.commit(&record).await {
                    warn!(
                        topic = %topic,
                        partition = record.partition,
                        offset = record.offset,
                        error = %e,
                        "Failed to commit offset"
                    );
                    if !should_continue_after(&e, &topic, &mut shutdown).await {
                        break;
                    }
                }
            }
        })
    }

    /// Topics are not deleted through this client; the connection is closed
    /// instead.
    async fn delete_queue(&self) -> Result<(), QueueError> {
        warn!(topic = %self.topic, "Topic deletion is not supported via this client");
        self.close_connection().await
    }

    async fn close_connection(&self) -> Result<(), QueueError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(QueueError::ConnectionClosed {
                queue_name: self.topic.to_string(),
            });
        }

        self.receiver.stop().await;
        self.client.close().await?;

        info!(topic = %self.topic, "Kafka connection closed");
        Ok(())
    }

    fn queue_name(&self) -> &QueueName {
        &self.topic
    }

    fn backend(&self) -> BackendKind {
        BackendKind::Kafka
    }
}

#[cfg(feature = "kafka")]
fn open_client(
    settings: &KafkaSettings,
    topic: &QueueName,
) -> Result<Arc<dyn StreamClient>, QueueError> {
    Ok(Arc::new(stream::RdKafkaClient::new(settings, topic)?))
}

#[cfg(not(feature = "kafka"))]
fn open_client(
    _settings: &KafkaSettings,
    _topic: &QueueName,
) -> Result<Arc<dyn StreamClient>, QueueError> {
    Err(ConfigurationError::BackendDisabled {
        backend: BACKEND.to_string(),
        feature: "kafka".to_string(),
    }
    .into())
}

#[cfg(feature = "kafka")]
mod stream {
    use super::{StreamClient, StreamRecord, BACKEND};
    use crate::error::QueueError;
    use crate::message::QueueName;
    use crate::settings::KafkaSettings;
    use async_trait::async_trait;
    use rdkafka::config::ClientConfig;
    use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
    use rdkafka::error::{KafkaError, RDKafkaErrorCode};
    use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
    use rdkafka::{Message as _, Offset, TopicPartitionList};
    use std::time::Duration;

    const SEND_TIMEOUT: Duration = Duration::from_secs(30);
    const SEEK_TIMEOUT: Duration = Duration::from_secs(5);
    const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

    fn kafka_error(e: KafkaError) -> QueueError {
        let transient = matches!(
            e.rdkafka_error_code(),
            Some(
                RDKafkaErrorCode::BrokerTransportFailure
                    | RDKafkaErrorCode::AllBrokersDown
                    | RDKafkaErrorCode::QueueFull
                    | RDKafkaErrorCode::RequestTimedOut
                    | RDKafkaErrorCode::OperationTimedOut
            )
        );

        if transient {
            QueueError::transient(BACKEND, e.to_string())
        } else {
            QueueError::permanent(BACKEND, e.to_string())
        }
    }

    pub(super) struct RdKafkaClient {
        producer: FutureProducer,
        consumer: StreamConsumer,
    }

    impl RdKafkaClient {
        pub(super) fn new(settings: &KafkaSettings, topic: &QueueName) -> Result<Self, QueueError> {
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", &settings.bootstrap_servers)
                .set("message.timeout.ms", "30000")
                .create()
                .map_err(kafka_error)?;

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &settings.bootstrap_servers)
                .set("group.id", KafkaSettings::consumer_group_for(topic))
                .set("auto.offset.reset", "earliest")
                .set("enable.auto.commit", "false")
                .create()
                .map_err(kafka_error)?;

            Ok(Self { producer, consumer })
        }
    }

    #[async_trait]
    impl StreamClient for RdKafkaClient {
        async fn produce(&self, topic: &QueueName, payload: Vec<u8>) -> Result<(), QueueError> {
            let record = FutureRecord::<(), [u8]>::to(topic.as_str()).payload(&payload[..]);
            self.producer
                .send(record, SEND_TIMEOUT)
                .await
                .map(|_| ())
                .map_err(|(e, _)| kafka_error(e))
        }

        async fn subscribe(&self, topic: &QueueName) -> Result<(), QueueError> {
            self.consumer
                .subscribe(&[topic.as_str()])
                .map_err(kafka_error)
        }

        async fn next_record(&self) -> Result<StreamRecord, QueueError> {
            let message = self.consumer.recv().await.map_err(kafka_error)?;
            Ok(StreamRecord {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                payload: message.payload().map(<[u8]>::to_vec),
            })
        }

        async fn commit(&self, record: &StreamRecord) -> Result<(), QueueError> {
            let mut positions = TopicPartitionList::new();
            positions
                .add_partition_offset(
                    &record.topic,
                    record.partition,
                    Offset::Offset(record.offset + 1),
                )
                .map_err(kafka_error)?;
            self.consumer
                .commit(&positions, CommitMode::Async)
                .map_err(kafka_error)
        }

        async fn seek(&self, record: &StreamRecord) -> Result<(), QueueError> {
            self.consumer
                .seek(
                    &record.topic,
                    record.partition,
                    Offset::Offset(record.offset),
                    SEEK_TIMEOUT,
                )
                .map_err(kafka_error)
        }

        async fn close(&self) -> Result<(), QueueError> {
            self.consumer.unsubscribe();
            self.producer.flush(FLUSH_TIMEOUT).map_err(kafka_error)
        }
    }
}
