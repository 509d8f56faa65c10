//! Model identity
//!
//! A model is identified by its logical name together with the loader
//! backend it is bound to. The same weights under two loaders are two
//! different identities.

pub mod metadata;

pub use metadata::{MetadataSource, ModelDimensions, ModelMetadata};

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Inference backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Loader {
    #[default]
    #[serde(rename = "llama.cpp")]
    LlamaCpp,
    #[serde(rename = "Transformers")]
    Transformers,
    #[serde(rename = "ExLlamav3")]
    ExLlamaV3,
}

impl Loader {
    pub const ALL: [Loader; 3] = [Loader::LlamaCpp, Loader::Transformers, Loader::ExLlamaV3];

    pub fn as_str(self) -> &'static str {
        match self {
            Loader::LlamaCpp => "llama.cpp",
            Loader::Transformers => "Transformers",
            Loader::ExLlamaV3 => "ExLlamav3",
        }
    }

    /// Whether the loader can split layers between accelerator and host
    pub fn supports_layer_offload(self) -> bool {
        matches!(self, Loader::LlamaCpp)
    }
}

impl fmt::Display for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Loader {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Loader::ALL
            .into_iter()
            .find(|loader| loader.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown loader '{}'", s))
    }
}

/// Logical model name bound to a loader
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelIdentity {
    pub name: String,
    pub loader: Loader,
}

impl ModelIdentity {
    pub fn new(name: impl Into<String>, loader: Loader) -> Self {
        Self {
            name: name.into(),
            loader,
        }
    }
}

impl fmt::Display for ModelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.loader)
    }
}

/// Reduce a model argument to its logical name.
///
/// An existing path is reduced to its final component.
pub fn model_name_from_arg(arg: &str) -> String {
    let path = Path::new(arg);
    if path.exists() {
        if let Some(name) = path.file_name() {
            return name.to_string_lossy().into_owned();
        }
    }
    arg.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loader_round_trips_through_str() {
        assert_eq!("llama.cpp".parse::<Loader>().unwrap(), Loader::LlamaCpp);
        assert_eq!("transformers".parse::<Loader>().unwrap(), Loader::Transformers);
        assert!("vllm".parse::<Loader>().is_err());
    }

    #[test]
    fn test_identity_distinguishes_loaders() {
        let a = ModelIdentity::new("mistral-7b", Loader::LlamaCpp);
        let b = ModelIdentity::new("mistral-7b", Loader::Transformers);
        assert_ne!(a, b);
    }

    #[test]
    fn test_model_name_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("qwen.gguf");
        std::fs::write(&file, b"").unwrap();
        assert_eq!(model_name_from_arg(file.to_str().unwrap()), "qwen.gguf");
        assert_eq!(model_name_from_arg("not-a-path"), "not-a-path");
    }
}
