use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

pub const DEFAULT_FILTER: &str = "replay_ingest=info,bulk_import=info";

/// Installs the global fmt subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init_tracing(default_filter: &str) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))
}
