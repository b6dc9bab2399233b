//! kcli-gateway: axum API gateway between operator UIs and one or more
//! Kubernetes API servers. Serves REST + SSE + WebSocket under /api/v1 with
//! request ids, optional bearer auth, CORS, deadlines, panic recovery and
//! Prometheus metrics.

mod error;
mod metrics;
mod middleware;
mod routes;
mod state;

use axum::http::{HeaderValue, Method};
use kcli_core::{ClientLimits, ClusterRegistry, ProbePolicy, ResponseCache, StreamHub};
use state::{AppState, GatewaySettings};
use std::sync::Arc;
use std::time::Duration;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[kcli-gateway] .env not loaded: {e} (using system environment)");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = GatewaySettings::from_env();
    let cache = Arc::new(ResponseCache::new(512, Duration::from_secs(120)));
    let registry = Arc::new(
        ClusterRegistry::new(ClientLimits::default(), ProbePolicy::default())
            .with_cache(Arc::clone(&cache)),
    );
    let hub = Arc::new(StreamHub::new(Arc::clone(&cache), 256));
    let state = AppState::new(registry, cache, hub, settings.clone());

    let cors = if settings.cors_allowed_origins.is_empty() {
        CorsLayer::new()
    } else {
        let origins: Vec<HeaderValue> = settings
            .cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([
                axum::http::header::AUTHORIZATION,
                axum::http::header::CONTENT_TYPE,
            ])
    };

    let app = axum::Router::new()
        .nest("/api/v1", routes::api_router())
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::deadline,
        ))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::authenticate,
        ))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state),
            middleware::observe,
        ))
        .layer(CatchPanicLayer::custom(middleware::panic_response))
        .layer(cors)
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!(
        target: "kcli::gateway",
        addr = %settings.bind_addr,
        auth_required = matches!(&settings.auth, state::AuthMode::Required { .. }),
        "gateway listening"
    );

    let shutdown_state = Arc::clone(&state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!(target: "kcli::gateway", "shutdown signal; draining");
            shutdown_state.begin_drain();
            shutdown_state.hub.shutdown("draining");
            // In-flight requests get the drain deadline before the listener
            // closes under them.
            tokio::time::sleep(shutdown_state.settings.drain_deadline).await;
        })
        .await?;

    tracing::info!(target: "kcli::gateway", "gateway stopped");
    Ok(())
}
