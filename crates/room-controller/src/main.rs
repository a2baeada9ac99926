//! Room Controller
//!
//! Ephemeral room broker for watch-together sessions: WebRTC signaling
//! exchange, identity-stable membership with host grace periods, and a
//! chunked relay fallback for failed peer transports.
//!
//! # Servers
//!
//! One HTTP server carries everything:
//! - `GET /ws` - WebSocket event protocol for participants
//! - `GET /health`, `GET /ready` - Kubernetes probes
//! - `GET /status` - live room/relay counters
//! - `GET /metrics` - Prometheus text format
//! - `GET /ice-config` - STUN/TURN servers for clients
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Spawn the controller actor
//! 4. Bind the listener (fail fast), then serve
//! 5. Wait for shutdown signal, then drain gracefully

#![warn(clippy::pedantic)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::routing::get;
use axum::{Json, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use room_controller::actors::{ControllerMetrics, RoomControllerHandle};
use room_controller::config::Config;
use room_controller::gateway::EventGateway;
use room_controller::observability::{health_router, status_router, HealthState};
use room_controller::transport::EventSink;
use room_controller::ws::{ws_router, ClientRegistry, WsState};
use serde_json::{json, Value};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "room_controller=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Room Controller");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        instance_id = %config.instance_id,
        bind_address = %config.bind_address,
        host_grace_seconds = config.host_grace_seconds,
        relay_purge_seconds = config.relay_purge_seconds,
        max_guests = config.max_guests,
        relay_max_chunks = config.relay_max_chunks,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| {
            error!(error = %e, "Failed to install Prometheus metrics recorder");
            e
        })
        .context("Failed to install Prometheus metrics recorder")?;
    info!("Prometheus metrics recorder initialized");

    // Initialize health state
    let health_state = Arc::new(HealthState::new());

    // Initialize the actor system and the transport registry
    let controller_metrics = ControllerMetrics::new();
    let registry = ClientRegistry::new();
    let controller = RoomControllerHandle::new(
        &config,
        Arc::clone(&registry) as Arc<dyn EventSink>,
        Arc::clone(&controller_metrics),
    );
    let gateway = EventGateway::new(controller.clone(), Arc::clone(&registry) as Arc<dyn EventSink>);
    info!("Actor system initialized");

    // Shutdown token for dependent tasks, child of the controller's token
    let shutdown_token = controller.child_token();

    // Assemble the HTTP surface
    let metrics_router = Router::new().route(
        "/metrics",
        get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );

    let ice_config = ice_config_payload(&config);
    let ice_router = Router::new().route(
        "/ice-config",
        get(move || {
            let payload = ice_config.clone();
            async move { Json(payload) }
        }),
    );

    let app = ws_router(WsState {
        gateway,
        registry: Arc::clone(&registry),
    })
    .merge(health_router(Arc::clone(&health_state)))
    .merge(status_router(controller.clone()))
    .merge(metrics_router)
    .merge(ice_router)
    .layer(TraceLayer::new_for_http());

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!(addr = %config.bind_address, "Listener bound successfully");

    // Serve with graceful shutdown
    let server_shutdown_token = shutdown_token.child_token();
    let server = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_shutdown_token.cancelled().await;
            info!("HTTP server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "HTTP server failed");
        }
    });

    health_state.set_ready();
    info!("Room Controller running - press Ctrl+C to shutdown");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so orchestrators stop sending traffic
    health_state.set_not_ready();

    // Cancel dependent tasks, then the actor (which notifies every room)
    shutdown_token.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
    controller.cancel();

    // Give the actor time to say goodbye to its rooms
    tokio::time::sleep(Duration::from_millis(200)).await;

    info!("Room Controller shutdown complete");
    Ok(())
}

/// Build the `/ice-config` payload handed to clients.
///
/// STUN servers come first; a TURN relay is appended when configured.
fn ice_config_payload(config: &Config) -> Value {
    let mut servers: Vec<Value> = config
        .stun_urls
        .iter()
        .map(|url| json!({ "urls": [url] }))
        .collect();

    if let Some(turn_url) = &config.turn_url {
        let mut turn = serde_json::Map::new();
        turn.insert("urls".to_string(), json!([turn_url]));
        if let Some(username) = &config.turn_username {
            turn.insert("username".to_string(), json!(username));
        }
        if let Some(credential) = config.turn_credential_value() {
            turn.insert("credential".to_string(), json!(credential));
        }
        servers.push(Value::Object(turn));
    }

    json!({ "iceServers": servers })
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed. This is acceptable because
/// without signal handlers, we cannot gracefully shut down the service.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
