//! Line-delimited JSON callback consumer.
//!
//! Reads one [`WorkflowMessage`] per line from a file, a named pipe or stdin.
//! Subscribe-only: the engine (or a relay in front of it) is the writer.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use backon::ExponentialBuilder;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use super::dispatch::{process_payload, redelivery_backoff, DispatchResult, Handlers};
use super::{BusError, CallbackBus, MessageHandler, Result, WorkflowMessage};

/// Counts from one pass over the input.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipeStats {
    pub delivered: usize,
    pub failed: usize,
    pub malformed: usize,
}

/// Callback bus fed by line-delimited JSON.
pub struct PipeCallbackBus {
    path: Option<PathBuf>,
    handlers: Handlers,
    redelivery: ExponentialBuilder,
    consuming: Arc<RwLock<bool>>,
}

impl PipeCallbackBus {
    /// Read from `path`, or stdin when `None`.
    pub fn new(path: Option<impl Into<PathBuf>>) -> Self {
        Self {
            path: path.map(Into::into),
            handlers: Arc::new(RwLock::new(Vec::new())),
            redelivery: redelivery_backoff(),
            consuming: Arc::new(RwLock::new(false)),
        }
    }

    /// Backoff for redelivering a line to a failing handler.
    pub fn with_redelivery(mut self, backoff: ExponentialBuilder) -> Self {
        self.redelivery = backoff;
        self
    }

    /// Consume the input to EOF, dispatching every line.
    pub async fn consume(&self) -> Result<PipeStats> {
        consume_input(self.path.clone(), self.handlers.clone(), self.redelivery).await
    }
}

async fn consume_input(
    path: Option<PathBuf>,
    handlers: Handlers,
    redelivery: ExponentialBuilder,
) -> Result<PipeStats> {
    match path {
        Some(path) => {
            let file = tokio::fs::File::open(&path).await?;
            info!(path = %path.display(), "Reading workflow messages");
            consume_lines(BufReader::new(file), &handlers, redelivery).await
        }
        None => {
            info!("Reading workflow messages from stdin");
            consume_lines(BufReader::new(tokio::io::stdin()), &handlers, redelivery).await
        }
    }
}

async fn consume_lines<R>(
    reader: R,
    handlers: &Handlers,
    redelivery: ExponentialBuilder,
) -> Result<PipeStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut stats = PipeStats::default();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match process_payload(line.as_bytes(), handlers, redelivery).await {
            DispatchResult::Success => stats.delivered += 1,
            DispatchResult::HandlerFailed => {
                warn!("Workflow message still failing after redelivery, skipping");
                stats.failed += 1;
            }
            DispatchResult::DecodeError => stats.malformed += 1,
        }
    }

    info!(
        delivered = stats.delivered,
        failed = stats.failed,
        malformed = stats.malformed,
        "Workflow message input exhausted"
    );
    Ok(stats)
}

#[async_trait]
impl CallbackBus for PipeCallbackBus {
    async fn publish(&self, _message: Arc<WorkflowMessage>) -> Result<()> {
        Err(BusError::PublishNotSupported)
    }

    async fn subscribe(&self, handler: Arc<dyn MessageHandler>) -> Result<()> {
        self.handlers.write().await.push(handler);
        Ok(())
    }

    async fn start_consuming(&self) -> Result<()> {
        {
            let mut consuming = self.consuming.write().await;
            if *consuming {
                return Ok(());
            }
            *consuming = true;
        }

        let path = self.path.clone();
        let handlers = self.handlers.clone();
        let redelivery = self.redelivery;
        tokio::spawn(async move {
            if let Err(e) = consume_input(path, handlers, redelivery).await {
                error!(error = %e, "Pipe consumer stopped");
            }
        });
        Ok(())
    }
}
