//! Route definitions

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use super::auth::require_basic_auth;
use super::handlers::{
    completions, current_model, health, interface_state, list_models, load_model,
    restart_interface, unload_model, AppState,
};
use crate::config::ServerConfig;

/// Model management and inference endpoints
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Health check
        .route("/health", get(health))
        // OpenAI-compatible endpoints
        .route("/v1/models", get(list_models))
        .route("/v1/completions", post(completions))
        // Model slot
        .route("/v1/model", get(current_model))
        .route("/v1/model/load", post(load_model))
        .route("/v1/model/unload", post(unload_model))
}

/// Interface state endpoints
pub fn interface_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/v1/interface", get(interface_state))
        .route("/v1/interface/restart", post(restart_interface))
}

/// Assemble the full router for one endpoint generation
pub fn build_router(state: Arc<AppState>, server: &ServerConfig) -> Router {
    let interface = state.interface.clone();

    let mut router = api_routes();
    if !interface.api_only {
        router = router.merge(interface_routes());
        for mount in &interface.static_mounts {
            router = router.nest_service(&mount.route, ServeDir::new(&mount.dir));
        }
    }
    let mut router = router.with_state(state);

    if interface.auth_enabled {
        let credentials = Arc::new(interface.credentials.clone());
        router = router.layer(middleware::from_fn_with_state(
            credentials,
            require_basic_auth,
        ));
    }

    if server.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        router = router.layer(cors);
    }

    if server.request_logging {
        router = router.layer(TraceLayer::new_for_http());
    }

    match server.mount_path() {
        Some(prefix) => Router::new().nest(&prefix, router),
        None => router,
    }
}
