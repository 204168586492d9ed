//! AWS SQS queue adapter.
//!
//! The receive loop long-polls for a batch, hands each message to the handler
//! in turn and deletes it by receipt handle once the handler succeeds. A
//! message that is not deleted becomes visible again after the queue's
//! visibility timeout.

#[cfg(not(feature = "sqs"))]
use crate::error::ConfigurationError;
use crate::error::QueueError;
use crate::message::{stamp_and_encode, EventKind, Message, QueueName};
use crate::queue::{
    deliver, pause, should_continue_after, until_shutdown, BackendKind, Delivery,
    MessageCallback, MessageQueue, ReceiveSlot,
};
use crate::settings::SqsSettings;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "sqs_tests.rs"]
mod tests;

const BACKEND: &str = "sqs";

/// A received SQS message
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CloudMessage {
    pub message_id: Option<String>,
    pub body: Option<String>,
    pub receipt_handle: Option<String>,
}

/// SQS API calls used by [`SqsQueue`]
#[async_trait]
pub trait CloudQueueClient: Send + Sync {
    async fn send_message(&self, queue_url: &str, body: String) -> Result<(), QueueError>;

    /// Long-poll for up to `max_messages`, waiting at most `wait_time_seconds`
    async fn receive_messages(
        &self,
        queue_url: &str,
        max_messages: i32,
        wait_time_seconds: i32,
    ) -> Result<Vec<CloudMessage>, QueueError>;

    async fn delete_message(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError>;

    async fn delete_queue(&self, queue_url: &str) -> Result<(), QueueError>;
}

/// Managed cloud queue backed by AWS SQS
pub struct SqsQueue<T: Message> {
    queue_name: QueueName,
    queue_url: String,
    settings: SqsSettings,
    client: Arc<dyn CloudQueueClient>,
    receiver: ReceiveSlot,
    _message: PhantomData<fn() -> T>,
}

impl<T: Message> SqsQueue<T> {
    /// Build an SQS client from the ambient AWS configuration
    ///
    /// Nothing is sent to SQS until the first operation.
    pub async fn connect(settings: SqsSettings, queue_name: QueueName) -> Result<Self, QueueError> {
        settings.validate()?;
        let client = open_client(&settings).await?;
        Ok(Self::with_client(client, settings, queue_name))
    }

    pub fn with_client(
        client: Arc<dyn CloudQueueClient>,
        settings: SqsSettings,
        queue_name: QueueName,
    ) -> Self {
        let queue_url = settings.queue_url_for(&queue_name);
        Self {
            receiver: ReceiveSlot::new(queue_name.clone()),
            queue_name,
            queue_url,
            settings,
            client,
            _message: PhantomData,
        }
    }

    /// The resolved queue URL
    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl<T: Message> MessageQueue<T> for SqsQueue<T> {
    async fn send_async(&self, message: &mut T, kind: EventKind) -> Result<(), QueueError> {
        let payload = stamp_and_encode(message, kind)?;

        self.client.send_message(&self.queue_url, payload).await?;

        debug!(queue = %self.queue_name, event_kind = %kind, "Message sent");
        Ok(())
    }

    fn receive(&self, handler: MessageCallback<T>) -> Result<(), QueueError> {
        let client = Arc::clone(&self.client);
        let queue_name = self.queue_name.clone();
        let queue_url = self.queue_url.clone();
        let batch_size = self.settings.batch_size();
        let wait_time = self.settings.wait_time_seconds;
        let idle_delay = self.settings.idle_delay();

        self.receiver.start(move |mut shutdown| async move {
            info!(queue = %queue_name, batch_size, wait_time, "SQS receive loop started");
            'poll: loop {
                let receive = client.receive_messages(&queue_url, batch_size, wait_time);
                let batch = match until_shutdown(&mut shutdown, receive).await {
                    None => break,
                    Some(Ok(batch)) => batch,
                    Some(Err(e)) => {
                        if should_continue_after(&e, &queue_name, &mut shutdown).await {
                            continue;
                        }
                        break;
                    }
                };

                for message in batch {
                    if *shutdown.borrow() {
                        break 'poll;
                    }

                    let Some(body) = message.body.as_deref() else {
                        debug!(
                            queue = %queue_name,
                            message_id = ?message.message_id,
                            "Skipping message without body"
                        );
                        continue;
                    };

                    if deliver(body.as_bytes(), &handler, &queue_name).await != Delivery::Handled {
                        continue;
                    }

                    let Some(receipt_handle) = message.receipt_handle.as_deref() else {
                        warn!(
                            queue = %queue_name,
                            message_id = ?message.message_id,
                            "Handled message has no receipt handle"
                        );
                        continue;
                    };

                    if let Err(e) = client.delete_message(&queue_url, receipt_handle).await {
                        warn!(
                            queue = %queue_name,
                            message_id = ?message.message_id,
                            error = %e,
                            "Failed to delete handled message"
                        );
                    }
                }

                if !pause(&mut shutdown, idle_delay).await {
                    break;
                }
            }
        })
    }

    async fn delete_queue(&self) -> Result<(), QueueError> {
        self.client.delete_queue(&self.queue_url).await?;

        info!(queue = %self.queue_name, queue_url = %self.queue_url, "SQS queue deleted");
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
        BackendKind::AwsSqs
    }
}

#[cfg(feature = "sqs")]
async fn open_client(settings: &SqsSettings) -> Result<Arc<dyn CloudQueueClient>, QueueError> {
    Ok(Arc::new(
        aws::SdkQueueClient::from_env(settings.region.clone()).await,
    ))
}

#[cfg(not(feature = "sqs"))]
async fn open_client(_settings: &SqsSettings) -> Result<Arc<dyn CloudQueueClient>, QueueError> {
    Err(ConfigurationError::BackendDisabled {
        backend: BACKEND.to_string(),
        feature: "sqs".to_string(),
    }
    .into())
}

#[cfg(feature = "sqs")]
mod aws {
    use super::{CloudMessage, CloudQueueClient, BACKEND};
    use crate::error::QueueError;
    use async_trait::async_trait;
    use aws_config::{BehaviorVersion, Region};
    use aws_sdk_sqs::error::{DisplayErrorContext, SdkError};
    use aws_sdk_sqs::Client;

    fn sdk_error<E, R>(e: SdkError<E, R>) -> QueueError
    where
        E: std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug + Send + Sync + 'static,
    {
        let message = DisplayErrorContext(&e).to_string();
        match e {
            SdkError::TimeoutError(_)
            | SdkError::DispatchFailure(_)
            | SdkError::ResponseError(_) => QueueError::transient(BACKEND, message),
            _ => QueueError::permanent(BACKEND, message),
        }
    }

    pub(super) struct SdkQueueClient {
        client: Client,
    }

    impl SdkQueueClient {
        pub(super) async fn from_env(region: Option<String>) -> Self {
            let mut loader = aws_config::defaults(BehaviorVersion::latest());
            if let Some(region) = region {
                loader = loader.region(Region::new(region));
            }
            let config = loader.load().await;

            Self {
                client: Client::new(&config),
            }
        }
    }

    #[async_trait]
    impl CloudQueueClient for SdkQueueClient {
        async fn send_message(&self, queue_url: &str, body: String) -> Result<(), QueueError> {
            self.client
                .send_message()
                .queue_url(queue_url)
                .message_body(body)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok(())
        }

        async fn receive_messages(
            &self,
            queue_url: &str,
            max_messages: i32,
            wait_time_seconds: i32,
        ) -> Result<Vec<CloudMessage>, QueueError> {
            let output = self
                .client
                .receive_message()
                .queue_url(queue_url)
                .max_number_of_messages(max_messages)
                .wait_time_seconds(wait_time_seconds)
                .send()
                .await
                .map_err(sdk_error)?;

            Ok(output
                .messages
                .unwrap_or_default()
                .into_iter()
                .map(|m| CloudMessage {
                    message_id: m.message_id,
                    body: m.body,
                    receipt_handle: m.receipt_handle,
                })
                .collect())
        }

        async fn delete_message(
            &self,
            queue_url: &str,
            receipt_handle: &str,
        ) -> Result<(), QueueError> {
            self.client
                .delete_message()
                .queue_url(queue_url)
                .receipt_handle(receipt_handle)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok(())
        }

        async fn delete_queue(&self, queue_url: &str) -> Result<(), QueueError> {
            self.client
                .delete_queue()
                .queue_url(queue_url)
                .send()
                .await
                .map_err(sdk_error)?;
            Ok(())
        }
    }
}
