//! Alert Forwarder - Main Entry Point
//!
//! Reads newline-delimited JSON change records from stdin and writes one
//! JSON alert notice per line to stdout.

use alerting::{AlertAggregator, NoRuleMetadata};
use forwarder::{init_logging, run, Forwarder, ForwarderSettings, JsonLinesPublisher};
use std::sync::Arc;
use storage::MemoryStore;
use tokio::io::BufReader;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1);
    let settings = ForwarderSettings::load(config_path.as_deref())?;
    init_logging(&settings.logging)?;

    info!("=== Alert Forwarder v{} ===", env!("CARGO_PKG_VERSION"));

    let aggregator = Arc::new(AlertAggregator::new(
        Arc::new(MemoryStore::new()),
        Arc::new(NoRuleMetadata),
        settings.aggregator.clone(),
    ));
    let forwarder = Forwarder::start(&settings, aggregator, Arc::new(JsonLinesPublisher::stdout()));

    match run(BufReader::new(tokio::io::stdin()), forwarder).await {
        Ok(stats) => {
            info!(?stats, "Input drained");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Stopping; unprocessed records must be re-delivered");
            Err(e.into())
        }
    }
}
