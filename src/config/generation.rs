//! Generation defaults applied to inference requests

use serde::{Deserialize, Serialize};

/// Sampling parameters for one inference call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Maximum number of tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Temperature for sampling (0 = greedy)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Top-p nucleus sampling threshold
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Top-k sampling (None = disabled)
    #[serde(default)]
    pub top_k: Option<usize>,

    /// Repetition penalty (1.0 = no penalty)
    #[serde(default = "default_repeat_penalty")]
    pub repeat_penalty: f32,

    /// Stop sequences
    #[serde(default, alias = "stop")]
    pub stop_sequences: Vec<String>,

    /// Random seed (None = random)
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_max_tokens() -> usize {
    512
}

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    1.0
}

fn default_repeat_penalty() -> f32 {
    1.0
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            top_k: None,
            repeat_penalty: default_repeat_penalty(),
            stop_sequences: Vec::new(),
            seed: None,
        }
    }
}

impl GenerationConfig {
    /// Check if greedy decoding should be used
    pub fn is_greedy(&self) -> bool {
        self.temperature == 0.0
    }
}
