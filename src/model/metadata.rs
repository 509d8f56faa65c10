//! Per-model metadata
//!
//! Metadata for a model comes from three places, applied in order:
//! 1. `config.yaml` in the model directory: regex pattern → settings
//! 2. the weights themselves (GGUF header), for llama.cpp models
//! 3. `config-user.yaml` in the model directory, same shape as (1)
//!
//! Patterns match case-insensitively against the start of the model name.
//! Every matching pattern contributes, later ones winning.

use std::path::{Path, PathBuf};

use regex::{Regex, RegexBuilder};
use serde_json::Value;

use crate::config::{read_settings_file, Settings};
use crate::error::ConfigError;
use crate::loader::{detect_model_source, find_model_path, get_gguf_info, GgufInfo, ModelFormat};
use crate::model::Loader;

/// Longest context suggested from GGUF metadata
const MAX_SUGGESTED_CTX: u64 = 8192;

/// Physical dimensions used to estimate memory footprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDimensions {
    /// Total size of the weights
    pub weights_bytes: u64,
    /// Offloadable layers (transformer blocks plus the output layer)
    pub layer_count: u32,
    /// KV heads × head dimension
    pub kv_width: u32,
}

impl ModelDimensions {
    fn from_gguf(info: &GgufInfo) -> Option<Self> {
        let blocks = info.arch_u64("block_count")?;
        let embedding = info.arch_u64("embedding_length")?;
        let heads = info.arch_u64("attention.head_count")?.max(1);
        let kv_heads = info.arch_u64("attention.head_count_kv").unwrap_or(heads);

        Some(Self {
            weights_bytes: info.file_size,
            layer_count: u32::try_from(blocks + 1).ok()?,
            kv_width: u32::try_from(kv_heads * (embedding / heads)).ok()?,
        })
    }
}

/// Loader-specific defaults for one model
#[derive(Debug, Clone, Default)]
pub struct ModelMetadata {
    pub settings: Settings,
    pub dimensions: Option<ModelDimensions>,
}

/// Pattern-keyed model settings plus weights inspection
#[derive(Debug, Clone)]
pub struct MetadataSource {
    model_dir: PathBuf,
    patterns: Vec<(Regex, Settings)>,
    user_patterns: Vec<(Regex, Settings)>,
}

impl MetadataSource {
    /// Read `config.yaml` and `config-user.yaml` from the model directory.
    ///
    /// Missing files are fine; malformed ones are a [`ConfigError`].
    pub fn load(model_dir: &Path) -> Result<Self, ConfigError> {
        let patterns = read_patterns(&model_dir.join("config.yaml"))?;
        let user_patterns = read_patterns(&model_dir.join("config-user.yaml"))?;
        tracing::debug!(
            patterns = patterns.len(),
            user_patterns = user_patterns.len(),
            "Loaded model metadata patterns"
        );

        Ok(Self {
            model_dir: model_dir.to_path_buf(),
            patterns,
            user_patterns,
        })
    }

    /// A source with no pattern files
    pub fn empty(model_dir: &Path) -> Self {
        Self {
            model_dir: model_dir.to_path_buf(),
            patterns: Vec::new(),
            user_patterns: Vec::new(),
        }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    /// Collect metadata for a model name
    pub fn lookup(&self, model_name: &str) -> ModelMetadata {
        let mut metadata = ModelMetadata::default();
        apply_patterns(&self.patterns, model_name, &mut metadata.settings);

        match find_model_path(&self.model_dir, model_name).and_then(detect_model_source) {
            Ok(source) => {
                if !metadata.settings.contains_key("loader") {
                    let loader = match source.format {
                        ModelFormat::Gguf => Loader::LlamaCpp,
                        ModelFormat::SafeTensors => Loader::Transformers,
                    };
                    metadata
                        .settings
                        .insert("loader".to_string(), Value::from(loader.as_str()));
                }

                if source.format == ModelFormat::Gguf {
                    match get_gguf_info(&source.weights_path) {
                        Ok(info) => apply_gguf(&info, &mut metadata),
                        Err(e) => tracing::warn!("Could not read GGUF metadata: {}", e),
                    }
                }
            }
            Err(e) => tracing::debug!("No weights found for {}: {}", model_name, e),
        }

        apply_patterns(&self.user_patterns, model_name, &mut metadata.settings);
        metadata
    }
}

fn apply_gguf(info: &GgufInfo, metadata: &mut ModelMetadata) {
    if let Some(ctx) = info.arch_u64("context_length") {
        metadata
            .settings
            .insert("ctx_size".to_string(), Value::from(ctx.min(MAX_SUGGESTED_CTX)));
    }
    if let Some(blocks) = info.arch_u64("block_count") {
        metadata
            .settings
            .insert("gpu_layers".to_string(), Value::from(blocks + 1));
    }
    metadata.dimensions = ModelDimensions::from_gguf(info);
}

fn apply_patterns(patterns: &[(Regex, Settings)], model_name: &str, settings: &mut Settings) {
    for (pattern, values) in patterns {
        if pattern.is_match(model_name) {
            for (key, value) in values {
                settings.insert(key.clone(), value.clone());
            }
        }
    }
}

fn read_patterns(path: &Path) -> Result<Vec<(Regex, Settings)>, ConfigError> {
    let Some(document) = read_settings_file(path)? else {
        return Ok(Vec::new());
    };

    let mut patterns = Vec::with_capacity(document.len());
    for (pattern, value) in document {
        let regex = RegexBuilder::new(&format!("^(?:{})", pattern))
            .case_insensitive(true)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: pattern.clone(),
                reason: e.to_string(),
            })?;

        let settings = match value {
            Value::Object(map) => map,
            Value::Null => Settings::new(),
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: pattern,
                    reason: "expected a mapping of settings".to_string(),
                })
            }
        };
        patterns.push((regex, settings));
    }
    Ok(patterns)
}
