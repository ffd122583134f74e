use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "ongaku=info,serenity=warn,songbird=warn";

/// Installs the global subscriber. `log` records from this crate and its
/// dependencies are forwarded to it; `RUST_LOG` overrides the default filter.
pub fn init_logger() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow!(e.to_string()))
}
