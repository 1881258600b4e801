//! Handler dispatch utilities.
//!
//! Common decode → dispatch → ack cycle shared by the bus implementations.
//! Neither bundled transport can hand a message back to its source, so a
//! handler that reports a failure is redelivered in place with backoff.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use futures::FutureExt;
use tokio::sync::RwLock;
use tracing::{error, warn};

use super::{BusError, MessageHandler, WorkflowMessage};

/// Registered handlers, shared between a bus and its consumer task.
pub type Handlers = Arc<RwLock<Vec<Arc<dyn MessageHandler>>>>;

/// Standard backoff for redelivering a message to a failed handler.
///
/// - Min delay: 50ms
/// - Max delay: 5s
/// - Max attempts: 8
/// - Jitter enabled
pub fn redelivery_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(50))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(8)
        .with_jitter()
}

/// Only reported failures are redelivered; a panic is not retried.
fn is_redeliverable(err: &BusError) -> bool {
    matches!(err, BusError::HandlerFailed { .. })
}

/// Dispatch a message to all registered handlers using [`redelivery_backoff`].
pub async fn dispatch_to_handlers(handlers: &Handlers, message: &Arc<WorkflowMessage>) -> bool {
    dispatch_with_backoff(handlers, message, redelivery_backoff()).await
}

/// Dispatch a message to all registered handlers.
///
/// Calls each handler in sequence. A handler returning
/// [`BusError::HandlerFailed`] gets the message again until it succeeds or
/// `backoff` is exhausted; then the failure is logged and the remaining
/// handlers still run. A panicking handler counts as a failure. Returns `true`
/// if all handlers succeeded.
pub async fn dispatch_with_backoff(
    handlers: &Handlers,
    message: &Arc<WorkflowMessage>,
    backoff: ExponentialBuilder,
) -> bool {
    let handlers_guard = handlers.read().await;
    let mut all_succeeded = true;

    for handler in handlers_guard.iter() {
        let outcome = (|| invoke(handler, message))
            .retry(backoff)
            .when(is_redeliverable)
            .notify(|err, delay| {
                warn!(
                    kind = message.kind(),
                    correlation_id = message.correlation_id().unwrap_or_default(),
                    error = %err,
                    delay = ?delay,
                    "Handler failed, redelivering"
                );
            })
            .await;

        if let Err(e) = outcome {
            error!(
                kind = message.kind(),
                correlation_id = message.correlation_id().unwrap_or_default(),
                error = %e,
                "Handler failed"
            );
            all_succeeded = false;
        }
    }

    all_succeeded
}

async fn invoke(
    handler: &Arc<dyn MessageHandler>,
    message: &Arc<WorkflowMessage>,
) -> Result<(), BusError> {
    AssertUnwindSafe(handler.handle(Arc::clone(message)))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(BusError::HandlerPanicked(panic_message(panic))))
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Result of processing a message through handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// All handlers succeeded, safe to acknowledge.
    Success,
    /// One or more handlers still failed after redelivery.
    HandlerFailed,
    /// Message could not be decoded, no retry will help.
    DecodeError,
}

impl DispatchResult {
    /// Returns true if the message should be acknowledged (removed from queue).
    ///
    /// Decode errors are acked to prevent infinite redelivery of bad messages.
    pub fn should_ack(&self) -> bool {
        matches!(self, Self::Success | Self::DecodeError)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Decode a JSON payload and dispatch it to all handlers.
pub async fn process_payload(
    payload: &[u8],
    handlers: &Handlers,
    backoff: ExponentialBuilder,
) -> DispatchResult {
    match WorkflowMessage::from_json(payload) {
        Ok(message) => {
            let message = Arc::new(message);
            if dispatch_with_backoff(handlers, &message, backoff).await {
                DispatchResult::Success
            } else {
                DispatchResult::HandlerFailed
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to decode workflow message");
            DispatchResult::DecodeError
        }
    }
}
