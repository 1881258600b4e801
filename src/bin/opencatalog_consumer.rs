//! opencatalog-consumer: workflow callback consumer
//!
//! Applies workflow engine callbacks (intermediate steps, final results,
//! retired process definitions) to open-catalog records.
//!
//! ## Architecture
//! ```text
//! [Workflow Engine] --(callback channel)--> [opencatalog-consumer]
//!                                                  |
//!                                                  v
//!                                           [open_catalogs]
//! ```
//!
//! ## Configuration
//! - OPENCATALOG_CONFIG: Path to a YAML config file (or `--config <path>`)
//! - OPENCATALOG__STORAGE__TYPE/PATH: Record store
//! - OPENCATALOG__MESSAGING__TYPE: `channel` or `pipe`
//! - OPENCATALOG__MESSAGING__PIPE__PATH: Input for `pipe`; stdin when unset
//! - OPENCATALOG_LOG: Log filter (default: info)

use std::sync::Arc;

use tracing::{error, info, warn};

use opencatalog::bus::{init_bus, MessagingType};
use opencatalog::callbacks::CallbackDispatcher;
use opencatalog::config::Config;
use opencatalog::storage::init_storage;
use opencatalog::utils::bootstrap::{init_tracing, parse_config_path};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting opencatalog-consumer");

    let (store, _sources) = init_storage(&config.storage).await?;
    info!("Storage initialized");

    if config.messaging.messaging_type == MessagingType::Channel {
        warn!("Channel messaging only carries messages published inside this process");
    }

    let bus = init_bus(&config.messaging);
    bus.subscribe(Arc::new(CallbackDispatcher::new(store))).await?;
    bus.start_consuming().await?;

    info!("opencatalog-consumer started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
