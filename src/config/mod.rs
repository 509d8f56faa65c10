//! Configuration system for llmhost
//!
//! Settings are layered, highest priority first:
//! explicit overrides (CLI / request), the on-disk settings file,
//! model metadata, and hard-coded fallback defaults.
//!
//! The merged result is an [`EffectiveConfig`], an untyped key/value map.
//! Typed views ([`ServerConfig`], [`InferenceConfig`], [`GenerationConfig`])
//! are deserialized out of it on demand, so keys unknown to one view are
//! kept around for the others.

mod generation;
mod inference;
mod server;

pub use generation::GenerationConfig;
pub use inference::{CacheType, InferenceConfig};
pub use server::ServerConfig;

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::error::ConfigError;

/// Root directory for user data (settings, models, cache)
pub const USER_DATA_DIR: &str = "user_data";

/// Untyped settings mapping
pub type Settings = Map<String, Value>;

/// Fully layered configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectiveConfig {
    values: Settings,
}

impl EffectiveConfig {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.values.get(key).and_then(Value::as_u64)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn as_map(&self) -> &Settings {
        &self.values
    }

    /// Deserialize a typed view out of the merged settings
    pub fn view<T: DeserializeOwned>(&self) -> Result<T, ConfigError> {
        serde_json::from_value(Value::Object(self.values.clone())).map_err(|e| {
            ConfigError::InvalidValue {
                key: std::any::type_name::<T>()
                    .rsplit("::")
                    .next()
                    .unwrap_or("settings")
                    .to_string(),
                reason: e.to_string(),
            }
        })
    }
}

impl From<Settings> for EffectiveConfig {
    fn from(values: Settings) -> Self {
        Self { values }
    }
}

/// Merge the four settings layers.
///
/// Precedence is strict: `overrides` > `on_disk` > `metadata` > `defaults`.
/// Keys only present in a lower layer survive the merge.
pub fn resolve(
    overrides: &Settings,
    on_disk: &Settings,
    metadata: &Settings,
    defaults: &Settings,
) -> EffectiveConfig {
    let mut values = defaults.clone();
    for layer in [metadata, on_disk, overrides] {
        for (key, value) in layer {
            values.insert(key.clone(), value.clone());
        }
    }
    EffectiveConfig { values }
}

/// Hard-coded fallback settings, the lowest layer
pub fn fallback_defaults() -> Settings {
    let defaults = json!({
        "loader": "llama.cpp",
        "ctx_size": 8192,
        "cache_type": "fp16",
        "gpu_layers": 0,
        "vram_budget_mib": 0,
        "idle_timeout": 0,
        "listen_host": "127.0.0.1",
        "listen_port": 7860,
        "mode": "instruct",
        "character": "Assistant",
        "dark_theme": true,
        "max_tokens": 512,
        "temperature": 1.0,
        "top_p": 1.0,
    });
    match defaults {
        Value::Object(map) => map,
        _ => Settings::new(),
    }
}

/// Pick the settings file to load.
///
/// An explicit path wins if it exists; otherwise `user_data/settings.yaml`,
/// then `user_data/settings.json`.
pub fn discover_settings_file(explicit: Option<&Path>, root: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        tracing::warn!("Settings file {} does not exist, ignoring", path.display());
    }

    ["settings.yaml", "settings.json"]
        .iter()
        .map(|name| root.join(USER_DATA_DIR).join(name))
        .find(|candidate| candidate.exists())
}

/// Read a settings file.
///
/// A missing file yields `Ok(None)`. The format is chosen by extension:
/// `.json` is parsed as JSON, everything else as YAML.
pub fn read_settings_file(path: &Path) -> Result<Option<Settings>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let value: Value = if is_json {
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    } else {
        serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    };

    match value {
        Value::Object(map) => Ok(Some(map)),
        // An empty YAML document
        Value::Null => Ok(Some(Settings::new())),
        _ => Err(ConfigError::NotAMapping {
            path: path.to_path_buf(),
        }),
    }
}

/// The non-model settings layers, held for the lifetime of one interface
/// generation and re-read from disk on restart.
#[derive(Debug, Clone, Default)]
pub struct SettingsLayers {
    pub overrides: Settings,
    pub on_disk: Settings,
    pub defaults: Settings,
    pub source: Option<PathBuf>,
}

impl SettingsLayers {
    /// Read the on-disk layer once and pair it with the other layers
    pub fn load(overrides: Settings, source: Option<PathBuf>) -> Result<Self, ConfigError> {
        let on_disk = match &source {
            Some(path) => {
                tracing::info!("Loading settings from \"{}\"", path.display());
                read_settings_file(path)?.unwrap_or_default()
            }
            None => Settings::new(),
        };

        Ok(Self {
            overrides,
            on_disk,
            defaults: fallback_defaults(),
            source,
        })
    }

    /// Re-read the on-disk layer, keeping overrides and defaults
    pub fn reload(&self) -> Result<Self, ConfigError> {
        Self::load(self.overrides.clone(), self.source.clone())
    }

    /// Resolve with the given model metadata layer
    pub fn effective(&self, metadata: &Settings) -> EffectiveConfig {
        resolve(&self.overrides, &self.on_disk, metadata, &self.defaults)
    }

    /// Resolve without model metadata (interface-level settings)
    pub fn interface(&self) -> EffectiveConfig {
        self.effective(&Settings::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(value: Value) -> Settings {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_resolve_precedence() {
        let config = resolve(
            &map(json!({"ctx": 4096})),
            &map(json!({"ctx": 2048, "temp": 0.7})),
            &map(json!({"ctx": 1024})),
            &map(json!({"ctx": 512, "temp": 1.0})),
        );
        assert_eq!(config.get_u64("ctx"), Some(4096));
        assert_eq!(config.get("temp"), Some(&json!(0.7)));
        assert_eq!(config.as_map().len(), 2);
    }

    #[test]
    fn test_resolve_keeps_lower_layer_keys() {
        let config = resolve(
            &Settings::new(),
            &Settings::new(),
            &map(json!({"rope_freq_base": 10000})),
            &map(json!({"ctx": 512})),
        );
        assert_eq!(config.get_u64("rope_freq_base"), Some(10000));
        assert_eq!(config.get_u64("ctx"), Some(512));
    }

    #[test]
    fn test_read_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_settings_file(&dir.path().join("settings.yaml")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_read_yaml_and_json() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("settings.yaml");
        std::fs::write(&yaml, "mode: chat\ndark_theme: false\n").unwrap();
        let json_path = dir.path().join("settings.json");
        std::fs::write(&json_path, r#"{"mode": "notebook"}"#).unwrap();

        let from_yaml = read_settings_file(&yaml).unwrap().unwrap();
        assert_eq!(from_yaml.get("mode"), Some(&json!("chat")));
        assert_eq!(from_yaml.get("dark_theme"), Some(&json!(false)));

        let from_json = read_settings_file(&json_path).unwrap().unwrap();
        assert_eq!(from_json.get("mode"), Some(&json!("notebook")));
    }

    #[test]
    fn test_read_unparsable_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            read_settings_file(&path),
            Err(ConfigError::Parse { .. })
        ));

        let list = dir.path().join("list.yaml");
        std::fs::write(&list, "- a\n- b\n").unwrap();
        assert!(matches!(
            read_settings_file(&list),
            Err(ConfigError::NotAMapping { .. })
        ));
    }

    #[test]
    fn test_discover_settings_file_order() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_settings_file(None, dir.path()).is_none());

        let user_data = dir.path().join(USER_DATA_DIR);
        std::fs::create_dir_all(&user_data).unwrap();
        std::fs::write(user_data.join("settings.json"), "{}").unwrap();
        assert_eq!(
            discover_settings_file(None, dir.path()),
            Some(user_data.join("settings.json"))
        );

        std::fs::write(user_data.join("settings.yaml"), "{}").unwrap();
        assert_eq!(
            discover_settings_file(None, dir.path()),
            Some(user_data.join("settings.yaml"))
        );

        let explicit = dir.path().join("custom.yaml");
        std::fs::write(&explicit, "{}").unwrap();
        assert_eq!(
            discover_settings_file(Some(&explicit), dir.path()),
            Some(explicit)
        );
    }

    #[test]
    fn test_settings_layers_reload_picks_up_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "mode: chat\n").unwrap();

        let layers = SettingsLayers::load(Settings::new(), Some(path.clone())).unwrap();
        assert_eq!(layers.interface().get_str("mode"), Some("chat"));

        std::fs::write(&path, "mode: notebook\n").unwrap();
        let reloaded = layers.reload().unwrap();
        assert_eq!(reloaded.interface().get_str("mode"), Some("notebook"));
    }
}
