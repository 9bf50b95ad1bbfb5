//! Alert Forwarder
//!
//! Consumes dedup-event change records, folds them into deduplicated
//! alerts and hands every alert write to a publisher.

mod ingest;
mod settings;
mod pipeline;
mod publisher;

pub use ingest::run;
pub use settings::{ConfigError, ForwarderSettings, LoggingConfig};
pub use pipeline::{ChangeRecord, Forwarder, ForwarderError, ForwarderStats};
pub use publisher::{
    AlertChange, AlertNotice, AlertPublisher, ChannelPublisher, JsonLinesPublisher, LogPublisher,
    PublishError,
};

use tracing::subscriber::SetGlobalDefaultError;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize logging on stderr; stdout is left for alert notices
pub fn init_logging(config: &LoggingConfig) -> Result<(), SetGlobalDefaultError> {
    let level = config.max_level().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    }
}
