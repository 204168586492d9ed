//! Explicit wiring of queues, dispatchers and supervisors.
//!
//! Applications build a [`ConsumerRegistry`] at startup, one registration per
//! message type, and hand it to the host which starts and stops everything in
//! order. [`QueueFactory`] picks the backend adapter from settings.

use crate::dispatcher::MessageHandler;
use crate::error::QueueError;
use crate::message::{Message, QueueName};
use crate::providers::{InMemoryQueue, KafkaQueue, RabbitMqQueue, SqsQueue};
use crate::queue::MessageQueue;
use crate::settings::{BackendSettings, InMemorySettings};
use crate::supervisor::{ConsumerSupervisor, HostedService};
use std::sync::Arc;
use tracing::{error, info, warn};

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;

/// Factory for creating backend adapters from settings
pub struct QueueFactory;

impl QueueFactory {
    /// Create the queue for message type `T` on the configured backend
    ///
    /// The queue or topic is named after `T`.
    ///
    /// # Errors
    ///
    /// - `ConfigurationError` if the settings are invalid or the backend's
    ///   cargo feature is not enabled
    /// - `Transport` if the backend cannot be reached during construction
    pub async fn create<T: Message>(
        settings: &BackendSettings,
    ) -> Result<Arc<dyn MessageQueue<T>>, QueueError> {
        settings.validate()?;
        let queue_name = QueueName::for_message::<T>()?;

        info!(backend = %settings.backend(), queue = %queue_name, "Creating queue");

        let queue: Arc<dyn MessageQueue<T>> = match settings {
            BackendSettings::RabbitMq(rabbitmq) => {
                Arc::new(RabbitMqQueue::connect(rabbitmq, queue_name).await?)
            }
            BackendSettings::Kafka(kafka) => {
                Arc::new(KafkaQueue::connect(kafka, queue_name).await?)
            }
            BackendSettings::AwsSqs(sqs) => {
                Arc::new(SqsQueue::connect(sqs.clone(), queue_name).await?)
            }
            BackendSettings::InMemory(in_memory) => {
                Arc::new(InMemoryQueue::with_name(queue_name, in_memory.clone()))
            }
        };

        Ok(queue)
    }

    /// Create an in-memory queue with default settings
    pub fn create_test_queue<T: Message>() -> Result<Arc<dyn MessageQueue<T>>, QueueError> {
        Ok(Arc::new(InMemoryQueue::<T>::new(InMemorySettings::default())?))
    }
}

/// Ordered set of hosted services
#[derive(Default)]
pub struct ConsumerRegistry {
    services: Vec<Arc<dyn HostedService>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer for message type `T`
    pub fn register<T, H>(&mut self, queue: Arc<dyn MessageQueue<T>>, handler: Arc<H>) -> &mut Self
    where
        T: Message,
        H: MessageHandler<T>,
    {
        let supervisor = ConsumerSupervisor::for_handler(queue, handler);
        self.register_service(Arc::new(supervisor))
    }

    /// Register any hosted service
    pub fn register_service(&mut self, service: Arc<dyn HostedService>) -> &mut Self {
        info!(service = service.name(), "Hosted service registered");
        self.services.push(service);
        self
    }

    /// Start every service in registration order
    ///
    /// If a service fails to start, the ones already started are stopped again
    /// in reverse order and the start error is returned.
    pub async fn start_all(&self) -> Result<(), QueueError> {
        for (index, service) in self.services.iter().enumerate() {
            if let Err(e) = service.start().await {
                error!(service = service.name(), error = %e, "Hosted service failed to start");

                for started in self.services[..index].iter().rev() {
                    if let Err(stop_error) = started.stop().await {
                        warn!(
                            service = started.name(),
                            error = %stop_error,
                            "Failed to stop service while rolling back startup"
                        );
                    }
                }
                return Err(e);
            }
        }

        info!(count = self.services.len(), "All hosted services started");
        Ok(())
    }

    /// Stop every service in reverse registration order
    ///
    /// All services are asked to stop even when some fail; the first failure
    /// is returned.
    pub async fn stop_all(&self) -> Result<(), QueueError> {
        let mut first_error = None;

        for service in self.services.iter().rev() {
            if let Err(e) = service.stop().await {
                error!(service = service.name(), error = %e, "Hosted service failed to stop");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(count = self.services.len(), "All hosted services stopped");
                Ok(())
            }
        }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Names of the registered services, in registration order
    pub fn service_names(&self) -> Vec<&str> {
        self.services.iter().map(|s| s.name()).collect()
    }
}
