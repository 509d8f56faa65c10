//! HTTP request handlers

use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::interface::InterfaceState;
use super::RestartFlag;
use crate::config::GenerationConfig;
use crate::engine::{LoadRequest, ModelHandle, Planner, Scheduler};
use crate::error::{ConfigError, InferenceError, LoadError};
use crate::loader::{is_plain_model_name, list_available};

/// Shared application state for one endpoint generation
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub planner: Arc<RwLock<Planner>>,
    pub restart: RestartFlag,
    pub interface: Arc<InterfaceState>,
    /// Sampling defaults from the effective settings
    pub generation: GenerationConfig,
    pub model_dir: PathBuf,
}

impl AppState {
    /// Snapshot of the current planner
    fn planner(&self) -> Planner {
        self.planner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// List models available in the model directory
pub async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    match list_available(&state.model_dir) {
        Ok(models) => {
            let response = ModelsResponse {
                object: "list".to_string(),
                data: models
                    .iter()
                    .map(|m| ModelInfo {
                        id: m.name.clone(),
                        object: "model".to_string(),
                        format: m.format.as_str().to_string(),
                        size_bytes: m.size_bytes,
                        owned_by: "local".to_string(),
                    })
                    .collect(),
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Cannot read model directory: {}", e),
            "server_error",
        ),
    }
}

/// Current slot state
pub async fn current_model(State(state): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, Json(state.scheduler.status())).into_response()
}

/// Load (or replace) the model
pub async fn load_model(
    State(state): State<Arc<AppState>>,
    Json(request): Json<LoadRequest>,
) -> Response {
    if !is_plain_model_name(&request.model) {
        return load_error(LoadError::NotFound(request.model));
    }

    let planner = state.planner();
    let planned = match tokio::task::spawn_blocking(move || planner.plan(&request)).await {
        Ok(Ok(planned)) => planned,
        Ok(Err(e)) => return config_error(e),
        Err(e) => {
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("planning failed: {}", e),
                "server_error",
            )
        }
    };

    match state.scheduler.load(planned.identity, planned.plan).await {
        Ok(handle) => (StatusCode::OK, Json(LoadResponse { model: handle })).into_response(),
        Err(e) => load_error(e),
    }
}

/// Unload the model
pub async fn unload_model(State(state): State<Arc<AppState>>) -> Response {
    match state.scheduler.unload().await {
        Ok(()) => (StatusCode::OK, Json(StatusResponse::new("unloaded"))).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "unload_error"),
    }
}

/// Text completion endpoint
pub async fn completions(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CompletionRequest>,
) -> Response {
    let gen_config = request.generation_config(&state.generation);
    let prompt = request.prompt;

    let result = state
        .scheduler
        .with_backend(move |handle, backend| {
            let model = handle.identity.name.clone();
            backend
                .generate(&prompt, &gen_config)
                .map(|text| (model, text))
        })
        .await;

    match result {
        Ok(Ok((model, text))) => {
            let response = CompletionResponse {
                id: format!("cmpl-{}", uuid::Uuid::new_v4()),
                object: "text_completion".to_string(),
                created: chrono::Utc::now().timestamp(),
                model,
                choices: vec![CompletionChoice {
                    text,
                    index: 0,
                    finish_reason: "stop".to_string(),
                }],
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(Err(e)) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("{:#}", e),
            "server_error",
        ),
        Err(InferenceError::NoModel) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "No model is loaded",
            "model_not_loaded",
        ),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string(), "server_error"),
    }
}

/// Persistent interface state
pub async fn interface_state(State(state): State<Arc<AppState>>) -> Response {
    (StatusCode::OK, Json(state.interface.as_ref())).into_response()
}

/// Ask the supervisor to rebuild the interface
pub async fn restart_interface(State(state): State<Arc<AppState>>) -> Response {
    state.restart.request();
    tracing::info!("Interface restart requested");
    (StatusCode::ACCEPTED, Json(StatusResponse::new("restarting"))).into_response()
}

fn config_error(e: ConfigError) -> Response {
    error_response(StatusCode::BAD_REQUEST, e.to_string(), "invalid_request_error")
}

fn load_error(e: LoadError) -> Response {
    let status = match &e {
        LoadError::NotFound(_) => StatusCode::NOT_FOUND,
        LoadError::UnsupportedLoader { .. } | LoadError::InvalidModel(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        LoadError::ResourceExhausted(_) | LoadError::Backend(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, e.to_string(), "load_error")
}

fn error_response(status: StatusCode, message: impl Into<String>, kind: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                message: message.into(),
                r#type: kind.to_string(),
            },
        }),
    )
        .into_response()
}

// Request/Response types

#[derive(Deserialize)]
pub struct CompletionRequest {
    /// Ignored; the loaded model answers
    #[serde(default)]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default)]
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub repeat_penalty: Option<f32>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub stop: Option<Vec<String>>,
}

impl CompletionRequest {
    fn generation_config(&self, defaults: &GenerationConfig) -> GenerationConfig {
        GenerationConfig {
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            top_k: self.top_k.or(defaults.top_k),
            repeat_penalty: self.repeat_penalty.unwrap_or(defaults.repeat_penalty),
            seed: self.seed.or(defaults.seed),
            stop_sequences: self
                .stop
                .clone()
                .unwrap_or_else(|| defaults.stop_sequences.clone()),
        }
    }
}

#[derive(Serialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<CompletionChoice>,
}

#[derive(Serialize)]
pub struct CompletionChoice {
    pub text: String,
    pub index: usize,
    pub finish_reason: String,
}

#[derive(Serialize)]
pub struct LoadResponse {
    pub model: ModelHandle,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: String,
}

impl StatusResponse {
    fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
        }
    }
}

#[derive(Serialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

#[derive(Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub format: String,
    pub size_bytes: u64,
    pub owned_by: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub message: String,
    pub r#type: String,
}
