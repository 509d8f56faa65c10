//! Load planning
//!
//! Turns a model name plus per-request overrides into a [`ModelIdentity`]
//! and a [`LoadPlan`]: metadata lookup, settings resolution, then fitting.

use serde::Deserialize;
use serde_json::Value;

use super::fitter::{fit, FitRequest, LoadPlan};
use crate::config::{CacheType, EffectiveConfig, InferenceConfig, Settings, SettingsLayers};
use crate::error::ConfigError;
use crate::model::{Loader, MetadataSource, ModelIdentity};

/// A request to load a model
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoadRequest {
    pub model: String,
    #[serde(default)]
    pub loader: Option<Loader>,
    #[serde(default)]
    pub ctx_size: Option<u32>,
    #[serde(default)]
    pub cache_type: Option<CacheType>,
    #[serde(default)]
    pub gpu_layers: Option<u32>,
    /// Allow the fitter to lower the layer count (default true)
    #[serde(default)]
    pub auto_adjust: Option<bool>,
    /// LoRA adapters to apply, replacing any configured ones
    #[serde(default)]
    pub lora: Option<Vec<String>>,
}

impl LoadRequest {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    fn overrides(&self) -> Settings {
        let mut overrides = Settings::new();
        if let Some(loader) = self.loader {
            overrides.insert("loader".to_string(), Value::from(loader.as_str()));
        }
        if let Some(ctx_size) = self.ctx_size {
            overrides.insert("ctx_size".to_string(), Value::from(ctx_size));
        }
        if let Some(cache_type) = self.cache_type {
            overrides.insert("cache_type".to_string(), Value::from(cache_type.to_string()));
        }
        if let Some(gpu_layers) = self.gpu_layers {
            overrides.insert("gpu_layers".to_string(), Value::from(gpu_layers));
        }
        if let Some(lora) = &self.lora {
            overrides.insert("lora".to_string(), Value::from(lora.clone()));
        }
        overrides
    }
}

/// Output of [`Planner::plan`]
#[derive(Debug, Clone)]
pub struct PlannedLoad {
    pub identity: ModelIdentity,
    pub plan: LoadPlan,
    pub config: EffectiveConfig,
}

/// Resolves settings for a model and fits it to the VRAM budget
#[derive(Debug, Clone)]
pub struct Planner {
    layers: SettingsLayers,
    metadata: MetadataSource,
}

impl Planner {
    pub fn new(layers: SettingsLayers, metadata: MetadataSource) -> Self {
        Self { layers, metadata }
    }

    pub fn layers(&self) -> &SettingsLayers {
        &self.layers
    }

    pub fn metadata(&self) -> &MetadataSource {
        &self.metadata
    }

    /// Swap in re-read settings layers
    pub fn set_layers(&mut self, layers: SettingsLayers) {
        self.layers = layers;
    }

    /// Compute the identity and load plan for a request.
    ///
    /// Request fields override everything, including CLI overrides. The
    /// layer count is auto-adjusted only when nobody set it explicitly and
    /// the model metadata supplied one.
    pub fn plan(&self, request: &LoadRequest) -> Result<PlannedLoad, ConfigError> {
        let mut overrides = self.layers.overrides.clone();
        overrides.extend(request.overrides());

        let metadata = self.metadata.lookup(&request.model);
        let config = crate::config::resolve(
            &overrides,
            &self.layers.on_disk,
            &metadata.settings,
            &self.layers.defaults,
        );
        let inference: InferenceConfig = config.view()?;
        let identity = ModelIdentity::new(request.model.clone(), inference.loader);

        let auto_adjust = request.auto_adjust.unwrap_or(true)
            && !overrides.contains_key("gpu_layers")
            && metadata.settings.contains_key("gpu_layers");

        let mut plan = fit(
            &identity,
            &FitRequest {
                context_size: inference.ctx_size,
                cache_type: inference.cache_type,
                requested_layers: inference.gpu_layers,
                dimensions: metadata.dimensions,
                budget_bytes: inference.vram_budget(),
                auto_adjust,
            },
        );

        plan.lora = inference.lora;

        Ok(PlannedLoad {
            identity,
            plan,
            config,
        })
    }
}
