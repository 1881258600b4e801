//! Inbound channel for workflow engine callbacks.
//!
//! This module contains:
//! - `WorkflowMessage`: the three message shapes the engine emits
//! - `MessageHandler` trait: for processing delivered messages
//! - `CallbackBus` trait: delivery of messages to handlers
//! - Bus configuration types
//! - Implementations: in-process broadcast channel, line-delimited JSON pipe
//!
//! Delivery is at-least-once with no ordering guarantee; handlers must be
//! idempotent.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::info;

pub mod channel;
pub mod dispatch;
pub mod pipe;

pub use channel::ChannelCallbackBus;
pub use dispatch::{
    dispatch_to_handlers, dispatch_with_backoff, process_payload, redelivery_backoff,
    DispatchResult,
};
pub use pipe::PipeCallbackBus;

// ============================================================================
// Messages
// ============================================================================

/// An activity (node) of the external process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub name: String,
}

/// Progress report from a running process instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntermediateStep {
    pub correlation_id: String,
    #[serde(default)]
    pub current_activity: Option<Activity>,
    #[serde(default)]
    pub next_activities: Vec<Activity>,
    /// Reviewer verdict at the current activity; `false` means rejected.
    #[serde(default)]
    pub verdict: bool,
    #[serde(default)]
    pub advisory_comment: Option<String>,
}

/// Terminal verdict of a process instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalResult {
    pub correlation_id: String,
    /// Kept as a string: the engine's vocabulary may grow.
    pub verdict: String,
}

/// Process definitions deleted from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRetired {
    pub process_keys: Vec<String>,
}

/// A message emitted by the workflow engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowMessage {
    IntermediateStep(IntermediateStep),
    FinalResult(FinalResult),
    ProcessRetired(ProcessRetired),
}

impl WorkflowMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IntermediateStep(_) => "intermediate_step",
            Self::FinalResult(_) => "final_result",
            Self::ProcessRetired(_) => "process_retired",
        }
    }

    /// Decode one JSON-encoded message.
    pub fn from_json(payload: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Correlation ID, for messages bound to a single record.
    pub fn correlation_id(&self) -> Option<&str> {
        match self {
            Self::IntermediateStep(m) => Some(&m.correlation_id),
            Self::FinalResult(m) => Some(&m.correlation_id),
            Self::ProcessRetired(_) => None,
        }
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors that can occur during bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Decode failed: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Handler for '{kind}' failed: {message}")]
    HandlerFailed { kind: String, message: String },

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Publish not supported for this bus type")]
    PublishNotSupported,
}

/// Handler for messages delivered by the bus.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: Arc<WorkflowMessage>)
        -> BoxFuture<'static, std::result::Result<(), BusError>>;
}

/// Delivery of workflow messages to subscribed handlers.
///
/// Implementations:
/// - `ChannelCallbackBus`: tokio broadcast channel within one process
/// - `PipeCallbackBus`: line-delimited JSON from a file, FIFO or stdin
#[async_trait]
pub trait CallbackBus: Send + Sync {
    /// Publish a message to every subscriber.
    async fn publish(&self, message: Arc<WorkflowMessage>) -> Result<()>;

    /// Register a handler. Call before [`start_consuming`](Self::start_consuming).
    async fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<()>;

    /// Start delivering messages to subscribed handlers.
    async fn start_consuming(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Messaging type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process broadcast channel.
    #[default]
    Channel,
    /// Line-delimited JSON.
    Pipe,
}

/// Messaging configuration (discriminated union).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    pub pipe: PipeConfig,
}

/// Pipe-specific configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// File or named pipe to read; stdin when unset.
    pub path: Option<String>,
}

/// Initialize the bus based on configuration.
pub fn init_bus(config: &MessagingConfig) -> Arc<dyn CallbackBus> {
    match config.messaging_type {
        MessagingType::Channel => {
            info!("Messaging: channel");
            Arc::new(ChannelCallbackBus::new())
        }
        MessagingType::Pipe => {
            info!(path = ?config.pipe.path, "Messaging: pipe");
            Arc::new(PipeCallbackBus::new(config.pipe.path.clone()))
        }
    }
}
