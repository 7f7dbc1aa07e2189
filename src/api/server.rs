//! HTTP server implementation

use axum::{
    http::{
        header::{HeaderName, AUTHORIZATION, CONTENT_TYPE},
        Method,
    },
    middleware,
    routing::get,
    Router,
};
use std::net::SocketAddr;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use super::{handlers, middleware as guards};
use crate::core::{AppState, ConfiguredAppState, Result};
use crate::csrf::TokenStore;
use crate::system::MetricsStore;

/// Creates the application router with all routes and middleware
pub fn create_router<T: TokenStore, M: MetricsStore>(app_state: AppState<T, M>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            CONTENT_TYPE,
            AUTHORIZATION,
            HeaderName::from_static(handlers::CSRF_HEADER),
            HeaderName::from_static(handlers::SESSION_HEADER),
        ])
        .allow_origin(Any)
        .allow_credentials(false);

    Router::new()
        .route("/", get(handlers::root_handler))
        // CSRF routes
        .route("/api/csrf-token", get(handlers::issue_csrf_token::<T, M>))
        .route(
            "/api/csrf-debug",
            get(handlers::csrf_debug::<T, M>).delete(handlers::clear_csrf_tokens::<T, M>),
        )
        // Performance routes
        .route(
            "/api/performance",
            get(handlers::performance_report::<T, M>).post(handlers::performance_action::<T, M>),
        )
        // System routes
        .route("/health", get(handlers::health_check::<T, M>))
        .route("/info", get(handlers::system_info::<T, M>))
        // Route layers run after matching, so the timing layer sees the matched path.
        // The last one added runs first: rejected requests are timed too.
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            guards::csrf_guard::<T, M>,
        ))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            guards::record_timing::<T, M>,
        ))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(app_state)
}

async fn serve(addr: SocketAddr, app: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("Server listening on http://{}", addr);
    info!("CSRF tokens available at http://{}/api/csrf-token", addr);
    info!("Health check available at http://{}/health", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

/// Spawn background tasks, then serve until the listener fails
async fn run<T: TokenStore, M: MetricsStore>(addr: SocketAddr, app_state: AppState<T, M>) -> Result<()> {
    let config = &app_state.config;

    let sweeper = app_state.csrf.spawn_sweeper(config.csrf.sweep_interval);
    info!("CSRF sweeper running every {:?}", config.csrf.sweep_interval);

    let reporter = (config.is_production() && !config.metrics.report_interval.is_zero())
        .then(|| app_state.monitor.spawn_reporter(config.metrics.report_interval));

    let result = serve(addr, create_router(app_state.clone())).await;

    sweeper.abort();
    if let Some(reporter) = reporter {
        reporter.abort();
    }
    result
}

/// Start the HTTP server with the configured AppState
pub async fn start_api_server(configured_app_state: ConfiguredAppState) -> Result<()> {
    let http_addr = configured_app_state.http_addr();

    info!("Starting portal-guard API server on {}", http_addr);

    // Match once on the backend to get a concrete AppState
    match configured_app_state {
        ConfiguredAppState::Memory { app_state } => {
            info!("Using in-memory stores");
            run(http_addr, app_state).await
        }
        ConfiguredAppState::Redis { app_state } => {
            info!("Using Redis stores");
            run(http_addr, app_state).await
        }
    }
}
