use anyhow::Result;
use axum::{extract::DefaultBodyLimit, http::Uri, middleware, routing::get, Router};
use std::{net::SocketAddr, time::Duration};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    config::GatewayConfig,
    error::AppError,
    handlers::{self, AppState},
    observability::{
        observability_middleware, user_agent_middleware, ObservabilityState, RequestLogger,
        UserAgentGate,
    },
    signals::setup_signal_handlers,
    store::{config::environment_prefix, ConnectionManager},
};

/// Time allowed for queued records to reach the store on shutdown
pub const PERSISTENCE_DRAIN_GRACE: Duration = Duration::from_secs(10);

/// Start the gateway server
///
/// This function:
/// 1. Connects the document store once (persistence stays disabled on failure)
/// 2. Sets up signal handlers for graceful shutdown
/// 3. Creates the Axum application with the observability stack
/// 4. Serves requests until a shutdown signal arrives
/// 5. Drains the persistence queue and closes the store
pub async fn start_server(config: GatewayConfig) -> Result<()> {
    let manager = ConnectionManager::new(config.database_config());
    let logger = RequestLogger::from_manager(&manager, config.persistence_settings()).await;

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let (_, environment) = environment_prefix(&config.environment);
    let state = AppState {
        logger: logger.clone(),
        service_name: config.service_name.clone(),
        version: config.version.clone(),
        environment: environment.to_string(),
    };
    let observability = ObservabilityState {
        logger: logger.clone(),
        environment: environment.to_string(),
        version: config.version.clone(),
        verbose: config.is_verbose(),
        max_body_bytes: config.max_request_body_bytes,
    };
    let gate = UserAgentGate::new(config.user_agent_prefix.as_deref(), &config.environment);

    let app = create_router(state, observability, gate, config.max_request_body_bytes);

    let addr = SocketAddr::from((config.host.parse::<std::net::IpAddr>()?, config.port));

    info!("Starting {} on {}", config.service_name, addr);
    info!(
        environment,
        version = %config.version,
        persistence = logger.is_enabled(),
        user_agent_filter = config.user_agent_prefix.is_some(),
        "Configuration loaded"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, draining connections...");
    })
    .await?;

    signal_handle.await?;

    if logger.dropped_jobs() > 0 {
        tracing::warn!(dropped = logger.dropped_jobs(), "Records dropped while the persistence queue was full");
    }
    logger.shutdown(PERSISTENCE_DRAIN_GRACE).await;
    manager.disconnect().await;

    info!("Server stopped gracefully");

    Ok(())
}

/// Gateway routes wrapped in the observability stack
pub fn create_router(
    state: AppState,
    observability: ObservabilityState,
    gate: UserAgentGate,
    body_limit: usize,
) -> Router {
    let routes = Router::new()
        .route("/health", get(handlers::health::health_check))
        .fallback(not_found)
        .with_state(state);

    with_observability(routes, observability, gate)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

/// Wrap `routes` so every request is tracked, gated and logged
///
/// The observability middleware sits outside the user-agent gate so blocked
/// requests still carry tracking headers and are logged.
pub fn with_observability(
    routes: Router,
    observability: ObservabilityState,
    gate: UserAgentGate,
) -> Router {
    routes
        .layer(middleware::from_fn_with_state(gate, user_agent_middleware))
        .layer(middleware::from_fn_with_state(
            observability,
            observability_middleware,
        ))
}

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(format!("No route for {}", uri.path()))
}
