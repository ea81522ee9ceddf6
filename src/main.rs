use std::net::SocketAddr;
use std::sync::Arc;

use claude_relay::connectors::{anthropic::AnthropicConnector, Connector};
use claude_relay::{config, observability, routing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init_tracing();

    let cfg = config::load().await?;

    // The credential is read exactly once; handlers never look at the environment.
    let connector: Option<Arc<dyn Connector>> = match config::api_key_from_env() {
        Some(key) => Some(Arc::new(AnthropicConnector::new(&cfg.upstream, key)?)),
        None => {
            tracing::warn!(
                "{} not configured; /api/chat will answer 500 until it is set",
                config::API_KEY_ENV
            );
            None
        }
    };

    let state = routing::AppState::new(&cfg, connector);
    let app = claude_relay::app(state, &cfg);

    let listener = tokio::net::TcpListener::bind((cfg.server.host.as_str(), cfg.server.port))
        .await
        .map_err(|e| {
            tracing::error!(host = %cfg.server.host, port = cfg.server.port, error = %e, "failed to bind");
            e
        })?;
    let addr: SocketAddr = listener.local_addr()?;
    tracing::info!("Claude relay listening on http://{addr}");
    tracing::info!("health check: http://localhost:{}/api/health", cfg.server.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("ctrl-c received, draining connections");
}
