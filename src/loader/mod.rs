//! Model file utilities
//!
//! - Format detection for SafeTensors and GGUF
//! - Model directory discovery
//! - GGUF header metadata
//!
//! Weights are never loaded here; that is the backend's job.

mod detect;
pub mod gguf;

pub use detect::{
    detect_model_source, find_model_path, is_plain_model_name, list_available, AvailableModel,
    ModelFormat, ModelSource,
};
pub use gguf::{get_gguf_info, GgufInfo, GgufValue};

use std::path::PathBuf;

/// Environment variable overriding the model directory
pub const MODEL_DIR_ENV: &str = "LLMHOST_MODEL_DIR";

/// Default model directory
pub fn default_model_dir() -> PathBuf {
    std::env::var(MODEL_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(crate::config::USER_DATA_DIR).join("models"))
}
