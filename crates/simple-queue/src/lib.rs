//! # Simple Queue
//!
//! Transport-agnostic event queue. Producers publish typed domain events tagged
//! with a change kind (Added, Updated, Deleted); consumers register one handler
//! per kind without depending on which transport moves the bytes.
//!
//! Backends:
//! - RabbitMQ, durable queue with manual acknowledgement (`rabbitmq` feature)
//! - Kafka, one topic per message type with manual offset commits (`kafka` feature)
//! - AWS SQS, batched long polling (`sqs` feature, on by default)
//! - In-memory FIFO for tests and local development
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Event kinds, the message contract and the wire codec
//! - [`queue`] - The `MessageQueue` trait implemented by every backend
//! - [`providers`] - Backend adapters
//! - [`dispatcher`] - Routing of received messages to per-kind handlers
//! - [`supervisor`] - Start/stop hooks for the hosting process
//! - [`registry`] - Explicit consumer registration and the queue factory
//! - [`settings`] - Backend selection and construction settings

mod blocking;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod providers;
pub mod queue;
pub mod registry;
pub mod settings;
pub mod supervisor;

#[cfg(test)]
mod test_support;

pub use dispatcher::{Dispatcher, HandlerTable, MessageHandler, Publisher};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use message::{decode, encode, EventKind, Message, QueueName};
pub use providers::{InMemoryQueue, KafkaQueue, RabbitMqQueue, SqsQueue};
pub use queue::{BackendKind, MessageCallback, MessageQueue};
pub use registry::{ConsumerRegistry, QueueFactory};
pub use settings::{
    BackendSettings, InMemorySettings, KafkaSettings, RabbitMqSettings, SqsSettings,
};
pub use supervisor::{ConsumerSupervisor, HostedService, SupervisorState};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
