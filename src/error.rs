//! Error taxonomy for the host runtime
//!
//! Only [`ConfigError`] and [`EndpointError`] are allowed to end startup.
//! Everything else is surfaced to the caller that asked for the operation,
//! or logged and retried by the background tasks.

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Settings could not be read or interpreted.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings file {path}: {reason}")]
    Parse { path: PathBuf, reason: String },

    #[error("settings file {path} must contain a key/value mapping")]
    NotAMapping { path: PathBuf },

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
}

/// The resource fitter could not compute an offload count.
///
/// Never fatal: the fitter falls back to the requested layer count.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FitError {
    #[error("no VRAM budget declared")]
    NoBudget,

    #[error("model dimensions unknown for {0}")]
    UnknownDimensions(String),

    #[error("loader {0} does not support layer offload")]
    OffloadUnsupported(String),
}

/// Model instantiation failed. The slot is left empty.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("model not found: {0}")]
    NotFound(String),

    #[error("loader {loader} is not available for model {model}")]
    UnsupportedLoader { loader: String, model: String },

    #[error("invalid model: {0}")]
    InvalidModel(String),

    #[error("insufficient resources: {0}")]
    ResourceExhausted(String),

    #[error("backend failed to start: {0}")]
    Backend(String),
}

/// Releasing the backend failed. The slot is cleared regardless.
#[derive(Error, Debug)]
pub enum UnloadError {
    #[error("backend stop failed: {0}")]
    StopFailed(String),

    #[error("unload task failed: {0}")]
    TaskFailed(String),
}

/// Inference could not run.
#[derive(Error, Debug)]
pub enum InferenceError {
    #[error("no model is loaded")]
    NoModel,

    #[error("generation failed: {0}")]
    Backend(String),

    #[error("inference task failed: {0}")]
    TaskFailed(String),
}

/// The client endpoint could not be published.
#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid listen address {0}")]
    Address(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("failed to read auth file {path}: {source}")]
    AuthFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid endpoint settings: {0}")]
    Config(#[from] ConfigError),
}
