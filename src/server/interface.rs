//! Interface state
//!
//! Everything the client-facing endpoint derives from settings: theme,
//! mode, credentials and the static asset allowlist. Rebuilt from scratch
//! on every publish.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::auth::Credentials;
use crate::config::{EffectiveConfig, ServerConfig, USER_DATA_DIR};
use crate::error::EndpointError;
use crate::extensions::{Extension, EXTENSIONS_DIR};
use crate::model::Loader;

/// Cache directory under `user_data`
pub const CACHE_DIR: &str = "cache";

/// Files derived from the active character, regenerated on demand
const DERIVED_CACHE_FILES: &[&str] = &["pfp_character.png", "pfp_character_thumb.png"];

/// Top-level asset directories served to clients
const ASSET_DIRS: &[&str] = &["css", "js"];

#[derive(Debug, Deserialize)]
struct InterfaceSettings {
    #[serde(default = "default_mode")]
    mode: String,
    #[serde(default = "default_character")]
    character: String,
    #[serde(default = "default_dark_theme")]
    dark_theme: bool,
    #[serde(default)]
    loader: Loader,
}

fn default_mode() -> String {
    "instruct".to_string()
}

fn default_character() -> String {
    "Assistant".to_string()
}

fn default_dark_theme() -> bool {
    true
}

/// A static directory and the URL path it is mounted at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticMount {
    pub route: String,
    pub dir: PathBuf,
}

/// Persistent state of one interface generation
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceState {
    pub generation: u64,
    pub mode: String,
    pub character: String,
    pub dark_theme: bool,
    pub loader: Loader,
    /// Loader the model list is filtered by, `All` unless one was given explicitly
    pub filter_by_loader: String,
    /// Loaders offered to clients
    pub loaders: Vec<&'static str>,
    pub extensions: Vec<Extension>,
    pub api_only: bool,
    pub auth_enabled: bool,
    #[serde(skip)]
    pub credentials: Credentials,
    #[serde(skip)]
    pub static_mounts: Vec<StaticMount>,
}

impl InterfaceState {
    /// Derive the interface state for a new endpoint generation.
    ///
    /// `loader_filter` is the loader the operator asked for explicitly.
    pub fn build(
        root: &Path,
        config: &EffectiveConfig,
        server: &ServerConfig,
        extensions: &[Extension],
        loader_filter: Option<&str>,
        generation: u64,
    ) -> Result<Self, EndpointError> {
        let settings: InterfaceSettings = config.view()?;
        let credentials = Credentials::from_config(server)?;
        if !credentials.is_empty() {
            tracing::info!("Basic auth enabled ({} credentials)", credentials.len());
        }

        let static_mounts = if server.api_only {
            Vec::new()
        } else {
            static_mounts(root, extensions)
        };

        Ok(Self {
            generation,
            mode: settings.mode,
            character: settings.character,
            dark_theme: settings.dark_theme,
            loader: settings.loader,
            filter_by_loader: loader_filter.unwrap_or("All").to_string(),
            loaders: Loader::ALL.iter().map(|l| l.as_str()).collect(),
            extensions: extensions.to_vec(),
            api_only: server.api_only,
            auth_enabled: !credentials.is_empty(),
            credentials,
            static_mounts,
        })
    }
}

/// Remove derived files from the cache directory, creating it if needed
pub fn reset_cache(root: &Path) -> std::io::Result<PathBuf> {
    let cache = root.join(USER_DATA_DIR).join(CACHE_DIR);
    std::fs::create_dir_all(&cache)?;

    for name in DERIVED_CACHE_FILES {
        let path = cache.join(name);
        match std::fs::remove_file(&path) {
            Ok(()) => tracing::debug!("Removed {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(cache)
}

fn static_mounts(root: &Path, extensions: &[Extension]) -> Vec<StaticMount> {
    let mut mounts: Vec<StaticMount> = ASSET_DIRS
        .iter()
        .map(|dir| StaticMount {
            route: format!("/file/{}", dir),
            dir: root.join(dir),
        })
        .chain(extensions.iter().map(|ext| StaticMount {
            route: format!("/file/{}/{}", EXTENSIONS_DIR, ext.name),
            dir: ext.path.clone(),
        }))
        .collect();

    mounts.push(StaticMount {
        route: format!("/file/{}/{}", USER_DATA_DIR, CACHE_DIR),
        dir: root.join(USER_DATA_DIR).join(CACHE_DIR),
    });

    mounts.retain(|mount| mount.dir.is_dir());
    mounts
}
