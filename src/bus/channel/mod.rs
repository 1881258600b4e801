//! In-memory channel-based callback bus.
//!
//! Uses a tokio broadcast channel for pub/sub within a single process. Used
//! when the workflow engine runs embedded, and by tests.

use std::sync::Arc;

use async_trait::async_trait;
use backon::ExponentialBuilder;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};

use super::dispatch::{dispatch_with_backoff, redelivery_backoff, Handlers};
use super::{CallbackBus, MessageHandler, Result, WorkflowMessage};

/// Channel capacity for broadcast.
const CHANNEL_CAPACITY: usize = 1024;

/// In-memory callback bus using tokio broadcast channels.
pub struct ChannelCallbackBus {
    sender: broadcast::Sender<Arc<WorkflowMessage>>,
    handlers: Handlers,
    redelivery: ExponentialBuilder,
    /// Flag indicating if consumer task is running.
    consuming: Arc<RwLock<bool>>,
}

impl Default for ChannelCallbackBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelCallbackBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        info!("Channel callback bus initialized");

        Self {
            sender,
            handlers: Arc::new(RwLock::new(Vec::new())),
            redelivery: redelivery_backoff(),
            consuming: Arc::new(RwLock::new(false)),
        }
    }

    /// Backoff for redelivering a message to a failing handler.
    pub fn with_redelivery(mut self, backoff: ExponentialBuilder) -> Self {
        self.redelivery = backoff;
        self
    }

    async fn start_consuming_impl(&self) -> Result<()> {
        {
            let mut consuming = self.consuming.write().await;
            if *consuming {
                return Ok(());
            }
            *consuming = true;
        }

        let mut receiver = self.sender.subscribe();
        let handlers = self.handlers.clone();
        let redelivery = self.redelivery;

        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        debug!(kind = message.kind(), "Received workflow message via channel");
                        // Failing handlers are redelivered in place before moving on.
                        dispatch_with_backoff(&handlers, &message, redelivery).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        error!(skipped = n, "Channel consumer lagged, skipped messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Channel closed, stopping consumer");
                        break;
                    }
                }
            }
        });

        info!("Channel consumer started");
        Ok(())
    }
}

#[async_trait]
impl CallbackBus for ChannelCallbackBus {
    #[tracing::instrument(name = "bus.publish", skip_all, fields(kind = %message.kind()))]
    async fn publish(&self, message: Arc<WorkflowMessage>) -> Result<()> {
        match self.sender.send(message) {
            Ok(receivers) => debug!(receivers, "Published workflow message to channel"),
            Err(_) => debug!("Published workflow message (no receivers)"),
        }
        Ok(())
    }

    async fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let count = {
            let mut handlers = self.handlers.write().await;
            handlers.push(handler);
            handlers.len()
        };
        info!(handler_count = count, "Handler subscribed to channel bus");
        Ok(())
    }

    async fn start_consuming(&self) -> Result<()> {
        self.start_consuming_impl().await
    }
}

#[cfg(test)]
mod tests;
