//! Inference configuration settings

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::model::Loader;

/// KV cache precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheType {
    #[default]
    #[serde(rename = "fp16", alias = "f16")]
    Fp16,
    #[serde(rename = "q8_0", alias = "q8")]
    Q8_0,
    #[serde(rename = "q4_0", alias = "q4")]
    Q4_0,
}

impl CacheType {
    /// Bytes per cached element, including block scale overhead
    pub fn bytes_per_element(self) -> f64 {
        match self {
            CacheType::Fp16 => 2.0,
            CacheType::Q8_0 => 34.0 / 32.0,
            CacheType::Q4_0 => 18.0 / 32.0,
        }
    }

    /// Name understood by llama.cpp's `--cache-type-k/v`
    pub fn as_str(self) -> &'static str {
        match self {
            CacheType::Fp16 => "f16",
            CacheType::Q8_0 => "q8_0",
            CacheType::Q4_0 => "q4_0",
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheType::Fp16 => "fp16",
            CacheType::Q8_0 => "q8_0",
            CacheType::Q4_0 => "q4_0",
        };
        f.write_str(name)
    }
}

impl FromStr for CacheType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fp16" | "f16" => Ok(CacheType::Fp16),
            "q8_0" | "q8" => Ok(CacheType::Q8_0),
            "q4_0" | "q4" => Ok(CacheType::Q4_0),
            other => Err(format!(
                "unknown cache type '{}' (expected fp16, q8_0 or q4_0)",
                other
            )),
        }
    }
}

/// Model load settings, read out of the effective configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Backend loader bound to the model
    #[serde(default)]
    pub loader: Loader,

    /// Context window size
    #[serde(default = "default_ctx_size")]
    pub ctx_size: u32,

    /// KV cache precision
    #[serde(default)]
    pub cache_type: CacheType,

    /// Layers to offload to the accelerator
    #[serde(default)]
    pub gpu_layers: u32,

    /// Declared accelerator memory budget in MiB (0 = undeclared)
    #[serde(default)]
    pub vram_budget_mib: u64,

    /// Minutes of inactivity before the model is unloaded (0 = never)
    #[serde(default)]
    pub idle_timeout: u64,

    /// LoRA adapters applied on top of the model, in order
    #[serde(default)]
    pub lora: Vec<String>,
}

fn default_ctx_size() -> u32 {
    8192
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            loader: Loader::default(),
            ctx_size: default_ctx_size(),
            cache_type: CacheType::default(),
            gpu_layers: 0,
            vram_budget_mib: 0,
            idle_timeout: 0,
            lora: Vec::new(),
        }
    }
}

impl InferenceConfig {
    /// Declared VRAM budget in bytes, if any
    pub fn vram_budget(&self) -> Option<u64> {
        (self.vram_budget_mib > 0).then(|| self.vram_budget_mib.saturating_mul(1024 * 1024))
    }

    /// Idle eviction threshold, if enabled
    pub fn idle_threshold(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout.saturating_mul(60)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_type_parse() {
        assert_eq!("fp16".parse::<CacheType>().unwrap(), CacheType::Fp16);
        assert_eq!("q8".parse::<CacheType>().unwrap(), CacheType::Q8_0);
        assert_eq!("q4_0".parse::<CacheType>().unwrap(), CacheType::Q4_0);
        assert!("int3".parse::<CacheType>().is_err());
    }

    #[test]
    fn test_inference_config_from_yaml() {
        let config: InferenceConfig = serde_yaml::from_str(
            "loader: llama.cpp\nctx_size: 4096\ncache_type: q8_0\ngpu_layers: 33\nidle_timeout: 5\n",
        )
        .unwrap();
        assert_eq!(config.loader, Loader::LlamaCpp);
        assert_eq!(config.ctx_size, 4096);
        assert_eq!(config.cache_type, CacheType::Q8_0);
        assert_eq!(config.gpu_layers, 33);
        assert_eq!(config.idle_threshold(), Some(Duration::from_secs(300)));
        assert_eq!(config.vram_budget(), None);
    }

    #[test]
    fn test_huge_limits_saturate() {
        let config = InferenceConfig {
            vram_budget_mib: u64::MAX,
            idle_timeout: u64::MAX,
            ..Default::default()
        };
        assert_eq!(config.vram_budget(), Some(u64::MAX));
        assert_eq!(config.idle_threshold(), Some(Duration::from_secs(u64::MAX)));
    }
}
