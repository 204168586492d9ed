//! Bridge from the synchronous `send` to the async transport calls.

use crate::error::QueueError;
use std::future::Future;
use tokio::runtime::{Builder, Handle, RuntimeFlavor};

#[cfg(test)]
#[path = "blocking_tests.rs"]
mod tests;

/// Drive `fut` to completion from synchronous code
///
/// Inside a multi-threaded runtime the current worker is handed over with
/// `block_in_place`. Outside any runtime a private current-thread runtime is
/// used. A current-thread runtime cannot block without deadlocking, so that
/// case is an error.
pub(crate) fn wait<F: Future>(fut: F) -> Result<F::Output, QueueError> {
    match Handle::try_current() {
        Ok(handle) => match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => Err(QueueError::BlockingUnsupported),
            _ => Ok(tokio::task::block_in_place(|| handle.block_on(fut))),
        },
        Err(_) => {
            let runtime = Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| QueueError::permanent("runtime", e.to_string()))?;
            Ok(runtime.block_on(fut))
        }
    }
}
