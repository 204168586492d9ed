//! Lifecycle hooks that start and stop a dispatcher with the hosting process.

use crate::dispatcher::{Dispatcher, MessageHandler};
use crate::error::QueueError;
use crate::message::Message;
use crate::queue::MessageQueue;
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

#[cfg(test)]
#[path = "supervisor_tests.rs"]
mod tests;

/// A component the host starts on startup and stops on shutdown
///
/// To bound how long a hook may take, the host drops or times out the
/// returned future.
#[async_trait]
pub trait HostedService: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), QueueError>;

    async fn stop(&self) -> Result<(), QueueError>;
}

/// Lifecycle state of a [`ConsumerSupervisor`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    Started,
    Stopped,
}

/// Runs one message type's dispatcher as a hosted service
pub struct ConsumerSupervisor<T: Message> {
    name: String,
    dispatcher: Dispatcher<T>,
    state: Mutex<SupervisorState>,
}

impl<T: Message> ConsumerSupervisor<T> {
    pub fn new(dispatcher: Dispatcher<T>) -> Self {
        Self {
            name: format!("consumer:{}", T::message_type()),
            dispatcher,
            state: Mutex::new(SupervisorState::NotStarted),
        }
    }

    /// Build the dispatcher and supervisor for a queue and handler
    pub fn for_handler<H: MessageHandler<T>>(
        queue: Arc<dyn MessageQueue<T>>,
        handler: Arc<H>,
    ) -> Self {
        Self::new(Dispatcher::new(queue, handler))
    }

    pub fn state(&self) -> SupervisorState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(SupervisorState::Stopped)
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, SupervisorState>, QueueError> {
        self.state.lock().map_err(|_| QueueError::InvalidState {
            message: format!("{} state lock poisoned", self.name),
        })
    }
}

#[async_trait]
impl<T: Message> HostedService for ConsumerSupervisor<T> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> Result<(), QueueError> {
        let mut state = self.lock_state()?;
        if *state != SupervisorState::NotStarted {
            return Err(QueueError::InvalidState {
                message: format!("{} cannot start from state {:?}", self.name, *state),
            });
        }

        info!(message_type = T::message_type(), "Starting message handler");
        self.dispatcher.start_listening()?;
        *state = SupervisorState::Started;
        Ok(())
    }

    async fn stop(&self) -> Result<(), QueueError> {
        let previous = {
            let mut state = self.lock_state()?;
            let previous = *state;
            if previous == SupervisorState::Started {
                *state = SupervisorState::Stopped;
            }
            previous
        };

        match previous {
            SupervisorState::NotStarted => {
                warn!(
                    message_type = T::message_type(),
                    "Stop requested for a message handler that never started"
                );
                Ok(())
            }
            SupervisorState::Stopped => {
                debug!(message_type = T::message_type(), "Message handler already stopped");
                Ok(())
            }
            SupervisorState::Started => {
                info!(message_type = T::message_type(), "Stopping message handler");
                self.dispatcher.stop_listening().await
            }
        }
    }
}
