use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,claude_relay=info,tower_http=info,reqwest=warn,hyper=warn";

/// Installs the global subscriber. `RUST_LOG` wins over the built-in filter.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
