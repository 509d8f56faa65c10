//! Model format detection and model directory discovery

use std::path::{Component, Path, PathBuf};

use serde::Serialize;

use crate::error::LoadError;

/// Detected model format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ModelFormat {
    /// SafeTensors format (HuggingFace standard)
    SafeTensors,
    /// GGUF format (llama.cpp, quantized models)
    Gguf,
}

impl ModelFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelFormat::SafeTensors => "SafeTensors",
            ModelFormat::Gguf => "GGUF",
        }
    }
}

/// Detected model source
#[derive(Debug, Clone)]
pub struct ModelSource {
    /// Path to the model weights
    pub weights_path: PathBuf,
    /// Detected format
    pub format: ModelFormat,
}

/// A model found in the model directory
#[derive(Debug, Clone, Serialize)]
pub struct AvailableModel {
    pub name: String,
    pub path: PathBuf,
    pub format: ModelFormat,
    pub size_bytes: u64,
}

/// Detect model format and source from a path
///
/// The path can be:
/// - A directory containing model files
/// - A direct path to a .safetensors file
/// - A direct path to a .gguf file
pub fn detect_model_source<P: AsRef<Path>>(path: P) -> Result<ModelSource, LoadError> {
    let path = path.as_ref();

    if path.is_file() {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "safetensors" => Ok(ModelSource {
                weights_path: path.to_path_buf(),
                format: ModelFormat::SafeTensors,
            }),
            "gguf" => Ok(ModelSource {
                weights_path: path.to_path_buf(),
                format: ModelFormat::Gguf,
            }),
            _ => Err(LoadError::InvalidModel(format!(
                "unsupported model file format: .{}",
                ext
            ))),
        }
    } else if path.is_dir() {
        detect_model_in_directory(path)
    } else {
        Err(LoadError::NotFound(path.display().to_string()))
    }
}

/// Detect model files in a directory
fn detect_model_in_directory(dir: &Path) -> Result<ModelSource, LoadError> {
    // SafeTensors first (preferred)
    for name in ["model.safetensors", "pytorch_model.safetensors"] {
        let candidate = dir.join(name);
        if candidate.exists() {
            return Ok(ModelSource {
                weights_path: candidate,
                format: ModelFormat::SafeTensors,
            });
        }
    }

    if let Some(first_shard) = first_match(dir, "model-00001-of-*.safetensors") {
        return Ok(ModelSource {
            weights_path: first_shard,
            format: ModelFormat::SafeTensors,
        });
    }

    if let Some(gguf_file) = first_match(dir, "*.gguf") {
        return Ok(ModelSource {
            weights_path: gguf_file,
            format: ModelFormat::Gguf,
        });
    }

    Err(LoadError::InvalidModel(format!(
        "no supported model files found in directory: {}",
        dir.display()
    )))
}

/// First file in `dir` matching a glob pattern, in sorted order
fn first_match(dir: &Path, pattern: &str) -> Option<PathBuf> {
    let full_pattern = dir.join(pattern);
    glob::glob(full_pattern.to_str()?)
        .ok()?
        .filter_map(|r| r.ok())
        .next()
}

/// Whether `name` is a single file or directory name.
///
/// Names come from clients, so anything that could leave the model
/// directory (separators, `..`, absolute paths) is refused.
pub fn is_plain_model_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.contains(['/', '\\'])
}

/// Find a model by name: a directory entry, or a `<name>.gguf` /
/// `<name>.safetensors` file in the model directory.
pub fn find_model_path(model_dir: &Path, model_name: &str) -> Result<PathBuf, LoadError> {
    if !is_plain_model_name(model_name) {
        return Err(LoadError::NotFound(model_name.to_string()));
    }

    let in_dir = model_dir.join(model_name);
    if in_dir.exists() {
        return Ok(in_dir);
    }

    for candidate in [
        format!("{}.gguf", model_name),
        format!("{}.safetensors", model_name),
    ] {
        let candidate = model_dir.join(candidate);
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(LoadError::NotFound(model_name.to_string()))
}

/// List models in the model directory, sorted by name
pub fn list_available(model_dir: &Path) -> std::io::Result<Vec<AvailableModel>> {
    let mut models = Vec::new();

    if !model_dir.exists() {
        return Ok(models);
    }

    for entry in std::fs::read_dir(model_dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if name.starts_with('.') {
            continue;
        }
        let is_candidate = path.is_dir()
            || matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("gguf") | Some("safetensors")
            );
        if !is_candidate {
            continue;
        }

        if let Ok(source) = detect_model_source(&path) {
            models.push(AvailableModel {
                size_bytes: total_size(&path),
                name,
                path,
                format: source.format,
            });
        }
    }

    models.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(models)
}

/// Size of a file, or of the files directly inside a directory
fn total_size(path: &Path) -> u64 {
    if path.is_file() {
        return std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    }
    std::fs::read_dir(path)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.metadata().ok())
                .filter(|m| m.is_file())
                .map(|m| m.len())
                .sum()
        })
        .unwrap_or(0)
}
