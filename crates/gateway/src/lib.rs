//! HTTP API gateway for DeskPilot.
//!
//! Exposes `submit_turn` as a server-sent event stream plus read-only
//! endpoints for session history and the assistant/tool catalogue.
//!
//! Built on Axum.

pub mod api_v1;

use axum::extract::DefaultBodyLimit;
use axum::{Router, response::Json, routing::get};
use deskpilot_agent::ChatService;
use deskpilot_config::AppConfig;
use deskpilot_core::error::StoreError;
use deskpilot_core::event::EventBus;
use deskpilot_core::store::MessageStore;
use deskpilot_core::tool::ToolRegistry;
use deskpilot_tools::{InMemoryRecordSource, LookupSettings};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared state for every handler.
pub struct GatewayState {
    pub service: Arc<ChatService>,
    /// Every registered tool, regardless of assistant.
    pub tools: ToolRegistry,
}

pub type SharedState = Arc<GatewayState>;

/// Errors while wiring the gateway from configuration.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error("No provider configured for '{0}'; set an API key or run `deskpilot onboard`")]
    NoProvider(String),

    #[error("Unknown store backend: {0}")]
    UnknownBackend(String),

    #[error("Failed to open message store: {0}")]
    Store(#[from] StoreError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

/// Open the message store the config selects.
pub async fn open_store(config: &AppConfig) -> Result<Arc<dyn MessageStore>, BootstrapError> {
    match config.store.backend.as_str() {
        "memory" => Ok(Arc::new(deskpilot_store::InMemoryStore::new())),
        "sqlite" => {
            let path = config.store.resolved_path();
            if let Some(parent) = std::path::Path::new(&path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            Ok(Arc::new(deskpilot_store::SqliteStore::new(&path).await?))
        }
        other => Err(BootstrapError::UnknownBackend(other.to_string())),
    }
}

/// Build the provider, store, tools and engine once and share them.
///
/// Records come from the demo [`InMemoryRecordSource`]; a deployment swaps in
/// its own `RecordSource` through [`state_from_parts`].
pub async fn build_state(config: &AppConfig) -> Result<GatewayState, BootstrapError> {
    let router = deskpilot_providers::build_from_config(config);
    let provider = router
        .default_provider()
        .ok_or_else(|| BootstrapError::NoProvider(config.default_provider.clone()))?;
    let store = open_store(config).await?;

    let lookup = LookupSettings {
        provider: provider.clone(),
        model: config
            .search_model
            .clone()
            .unwrap_or_else(|| config.default_model.clone()),
        timeout: Duration::from_secs(config.engine.lookup_timeout_secs),
    };
    let tools = deskpilot_tools::default_registry(
        Arc::new(InMemoryRecordSource::with_demo_data().await),
        lookup,
    );

    Ok(state_from_parts(config, provider, store, tools))
}

/// Assemble gateway state from already-built collaborators.
pub fn state_from_parts(
    config: &AppConfig,
    provider: Arc<dyn deskpilot_core::provider::Provider>,
    store: Arc<dyn MessageStore>,
    tools: ToolRegistry,
) -> GatewayState {
    let events = Arc::new(EventBus::default());
    let service = ChatService::from_config(config, provider, store, &tools, events);
    GatewayState {
        service: Arc::new(service),
        tools,
    }
}

/// Build the full router.
///
/// Layers applied:
/// - CORS for the dashboard front end
/// - Request body size limit (1 MB)
/// - HTTP trace logging
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static(api_v1::TENANT_HEADER),
            axum::http::HeaderName::from_static(api_v1::USER_HEADER),
        ])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", api_v1::v1_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: AppConfig) -> Result<(), BootstrapError> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(build_state(&config).await?);
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
