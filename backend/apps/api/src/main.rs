//! API Gateway Entry Point
//!
//! Application entry point and server initialization.
//! Uses `anyhow` for startup errors, but request-level
//! errors should use `kernel::error::AppError`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, Method};
use gateway::application::admission::AdmissionController;
use gateway::application::config::CorsConfig;
use gateway::domain::repository::SubscriptionLookup;
use gateway::{GatewayAppState, GatewayConfig, gateway_router};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Re-export unified error types for use in handlers
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

const PURGE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env()?;
    let state = GatewayAppState::from_config(&config)?;

    tracing::info!(
        routes = state.routes.len(),
        lookup = %config.quota.lookup_url,
        fallback_rpm = config.quota.fallback_rpm,
        "Gateway configured"
    );
    for route in state.routes.routes() {
        tracing::info!(
            route = route.name(),
            pattern = %route.pattern(),
            upstream = route.upstream(),
            "Route registered"
        );
    }

    spawn_purge_task(state.admission.clone());

    let cors = cors_layer(&config.cors);

    // Build router
    let app = gateway_router(state).layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(cors),
    );

    // Start server
    tracing::info!("Listening on {}", config.bind_addr);

    let listener = TcpListener::bind(config.bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Periodically drop idle buckets and expired quotas
fn spawn_purge_task<L>(admission: Arc<AdmissionController<L>>)
where
    L: SubscriptionLookup + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let purged = admission.purge_idle();
            tracing::info!(
                buckets_deleted = purged,
                buckets_tracked = admission.tracked_buckets(),
                "Rate limit bucket cleanup completed"
            );
        }
    });
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .origins
        .iter()
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    let methods: Vec<Method> = config
        .methods
        .iter()
        .filter_map(|method| method.trim().parse().ok())
        .collect();

    let headers: Vec<HeaderName> = config
        .headers
        .iter()
        .filter_map(|name| name.trim().parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list(methods))
        .allow_headers(AllowHeaders::list(headers))
        .allow_credentials(true)
}
