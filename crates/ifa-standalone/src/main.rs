mod routes;
mod services;
mod state;

use ifa_core::config::Config;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::services::fetcher::HttpFetcher;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    )
    .init();

  let config = Config::from_env();
  let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

  // Ensure data directories exist
  tokio::fs::create_dir_all(&config.store_dir())
    .await
    .expect("Failed to create store directory");
  tokio::fs::create_dir_all(&config.caches_dir())
    .await
    .expect("Failed to create caches directory");

  let fetcher = HttpFetcher::new(&config).expect("Failed to build HTTP client");
  let app_state = state::AppState::new(config.clone(), fetcher).await;

  // Without an installed shell the proxy stays network-only.
  match app_state.proxy.install().await {
    Ok(()) => match app_state.proxy.activate().await {
      Ok(purged) => tracing::info!("Offline proxy ready ({} stale buckets purged)", purged.len()),
      Err(e) => tracing::error!("Activation failed: {}", e),
    },
    Err(e) => tracing::error!("Install failed, serving network-only: {}", e),
  }

  let proxy = app_state.proxy.clone();
  let app = routes::app(app_state);

  let listener = TcpListener::bind(addr).await.expect("Failed to bind");
  tracing::info!("Server listening on {}", addr);
  tracing::info!("Upstream: {}", config.upstream_url);
  tracing::info!(
    "Data directory: {}",
    std::fs::canonicalize(&config.data_dir)
      .unwrap_or_else(|_| config.data_dir.clone().into())
      .display()
  );

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .expect("Server error");

  proxy.retire().await;
}
