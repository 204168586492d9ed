//! Backend adapters implementing [`MessageQueue`](crate::MessageQueue).
//!
//! Each network backend talks to its transport through a small trait so the
//! production client can be swapped for a fake. The production clients are
//! compiled in by the `rabbitmq`, `kafka` and `sqs` features.

pub mod kafka;
pub mod memory;
pub mod rabbitmq;
pub mod sqs;

pub use kafka::{KafkaQueue, StreamClient, StreamRecord};
pub use memory::InMemoryQueue;
pub use rabbitmq::{BrokerChannel, BrokerConsumer, BrokerDelivery, RabbitMqQueue};
pub use sqs::{CloudMessage, CloudQueueClient, SqsQueue};
