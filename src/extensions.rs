//! Extension load order
//!
//! Extensions are directories under `extensions/`. The host does not run
//! them; it only resolves the requested names in order and exposes their
//! directories as static assets.

use std::path::{Path, PathBuf};

use serde::Serialize;

/// Directory holding extensions, relative to the working root
pub const EXTENSIONS_DIR: &str = "extensions";

/// Extensions that only make sense with the interface
const INTERFACE_ONLY: &[&str] = &["gallery"];

/// A resolved extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extension {
    pub name: String,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Resolve extension names against `root/extensions`, in the order given.
///
/// Missing extensions are skipped with a warning and duplicates are loaded
/// once. With `api_only`, interface-only extensions are dropped.
pub fn load_extensions(root: &Path, names: &[String], api_only: bool) -> Vec<Extension> {
    let mut loaded: Vec<Extension> = Vec::new();

    for name in names.iter().map(|n| n.trim()).filter(|n| !n.is_empty()) {
        if api_only && INTERFACE_ONLY.contains(&name) {
            tracing::debug!("Skipping interface-only extension \"{}\"", name);
            continue;
        }
        if loaded.iter().any(|e| e.name == name) {
            continue;
        }

        let path = root.join(EXTENSIONS_DIR).join(name);
        if !path.is_dir() {
            tracing::warn!("Extension \"{}\" not found in {}", name, path.display());
            continue;
        }

        tracing::info!("Loading the extension \"{}\"", name);
        loaded.push(Extension {
            name: name.to_string(),
            path,
        });
    }

    loaded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_load_order_and_dedup() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["openai", "gallery", "whisper_stt"] {
            std::fs::create_dir_all(dir.path().join(EXTENSIONS_DIR).join(name)).unwrap();
        }

        let loaded = load_extensions(
            dir.path(),
            &names(&["whisper_stt", "missing", "openai", "whisper_stt", "gallery"]),
            false,
        );
        let order: Vec<_> = loaded.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(order, vec!["whisper_stt", "openai", "gallery"]);
    }

    #[test]
    fn test_api_only_drops_interface_extensions() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["openai", "gallery"] {
            std::fs::create_dir_all(dir.path().join(EXTENSIONS_DIR).join(name)).unwrap();
        }

        let loaded = load_extensions(dir.path(), &names(&["gallery", "openai"]), true);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "openai");
    }
}
