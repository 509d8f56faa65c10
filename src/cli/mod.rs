//! CLI commands

mod info;
mod list;
mod serve;

pub use info::info;
pub use list::list;
pub use serve::serve;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde_json::Value;

use crate::config::{CacheType, Settings};
use crate::loader::default_model_dir;
use crate::model::Loader;

/// llmhost - host process for a single local LLM backend
#[derive(Parser)]
#[command(name = "llmhost")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load a model and serve it until interrupted
    Serve(ServeArgs),

    /// List available models
    List {
        /// Show detailed information
        #[arg(long, short)]
        verbose: bool,
    },

    /// Show model metadata and the load plan it would get
    Info {
        /// Model name or path
        model: String,

        /// Settings file (default: user_data/settings.yaml or .json)
        #[arg(long)]
        settings: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone, Default)]
pub struct ServeArgs {
    /// Model to load at startup (name in the model directory or a path)
    #[arg(long, short)]
    pub model: Option<String>,

    /// Pick the model interactively
    #[arg(long)]
    pub model_menu: bool,

    /// Directory holding models
    #[arg(long, env = "LLMHOST_MODEL_DIR")]
    pub model_dir: Option<PathBuf>,

    /// Settings file (default: user_data/settings.yaml or .json)
    #[arg(long)]
    pub settings: Option<PathBuf>,

    /// Backend loader (llama.cpp, Transformers, ExLlamav3)
    #[arg(long)]
    pub loader: Option<Loader>,

    /// Context window size
    #[arg(long)]
    pub ctx_size: Option<u32>,

    /// KV cache precision (fp16, q8_0, q4_0)
    #[arg(long)]
    pub cache_type: Option<CacheType>,

    /// Layers to offload to the GPU; disables auto-adjustment
    #[arg(long)]
    pub gpu_layers: Option<u32>,

    /// VRAM budget in MiB used to auto-adjust GPU layers
    #[arg(long)]
    pub vram_budget_mib: Option<u64>,

    /// Unload the model after this many minutes without use (0 = never)
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// LoRA adapters to apply after the model loads, in order
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub lora: Vec<String>,

    /// Extensions to load, in order
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    pub extensions: Vec<String>,

    /// Listen on all interfaces
    #[arg(long)]
    pub listen: bool,

    /// Host to bind to
    #[arg(long)]
    pub listen_host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Make the endpoint publicly reachable
    #[arg(long)]
    pub share: bool,

    /// TLS private key (PEM)
    #[arg(long)]
    pub ssl_keyfile: Option<PathBuf>,

    /// TLS certificate (PEM)
    #[arg(long)]
    pub ssl_certfile: Option<PathBuf>,

    /// Credentials as "user:pass,user2:pass2"
    #[arg(long)]
    pub auth: Option<String>,

    /// File with credentials in the same format
    #[arg(long)]
    pub auth_path: Option<PathBuf>,

    /// Serve everything under this path prefix
    #[arg(long)]
    pub subpath: Option<String>,

    /// Serve only the API (no interface state or static assets)
    #[arg(long, alias = "nowebui")]
    pub api_only: bool,

    /// llama-server executable
    #[arg(long, env = "LLMHOST_LLAMA_SERVER", default_value = "llama-server")]
    pub llama_server: PathBuf,
}

impl ServeArgs {
    /// Settings given explicitly on the command line
    pub fn overrides(&self) -> Settings {
        let mut overrides = Settings::new();
        let mut set = |key: &str, value: Value| {
            overrides.insert(key.to_string(), value);
        };

        if let Some(loader) = self.loader {
            set("loader", Value::from(loader.as_str()));
        }
        if let Some(ctx_size) = self.ctx_size {
            set("ctx_size", Value::from(ctx_size));
        }
        if let Some(cache_type) = self.cache_type {
            set("cache_type", Value::from(cache_type.to_string()));
        }
        if let Some(gpu_layers) = self.gpu_layers {
            set("gpu_layers", Value::from(gpu_layers));
        }
        if let Some(budget) = self.vram_budget_mib {
            set("vram_budget_mib", Value::from(budget));
        }
        if let Some(idle_timeout) = self.idle_timeout {
            set("idle_timeout", Value::from(idle_timeout));
        }
        if !self.lora.is_empty() {
            set("lora", Value::from(self.lora.clone()));
        }
        if self.listen {
            set("listen_host", Value::from("0.0.0.0"));
        }
        if let Some(host) = &self.listen_host {
            set("listen_host", Value::from(host.as_str()));
        }
        if let Some(port) = self.listen_port {
            set("listen_port", Value::from(port));
        }
        if self.share {
            set("share", Value::from(true));
        }
        if let Some(path) = &self.ssl_keyfile {
            set("ssl_keyfile", Value::from(path.to_string_lossy().into_owned()));
        }
        if let Some(path) = &self.ssl_certfile {
            set("ssl_certfile", Value::from(path.to_string_lossy().into_owned()));
        }
        if let Some(auth) = &self.auth {
            set("auth", Value::from(auth.as_str()));
        }
        if let Some(path) = &self.auth_path {
            set("auth_path", Value::from(path.to_string_lossy().into_owned()));
        }
        if let Some(subpath) = &self.subpath {
            set("subpath", Value::from(subpath.as_str()));
        }
        if self.api_only {
            set("api_only", Value::from(true));
        }
        overrides
    }

    pub fn model_dir(&self) -> PathBuf {
        self.model_dir.clone().unwrap_or_else(default_model_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> ServeArgs {
        let cli = Cli::try_parse_from(std::iter::once("llmhost").chain(args.iter().copied()))
            .unwrap();
        match cli.command {
            Commands::Serve(args) => args,
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn test_only_explicit_flags_become_overrides() {
        let args = parse(&["serve", "--ctx-size", "4096", "--cache-type", "q8_0"]);
        let overrides = args.overrides();
        assert_eq!(overrides.len(), 2);
        assert_eq!(overrides.get("ctx_size"), Some(&Value::from(4096)));
        assert_eq!(overrides.get("cache_type"), Some(&Value::from("q8_0")));
        assert!(!overrides.contains_key("gpu_layers"));
    }

    #[test]
    fn test_extensions_keep_order() {
        let args = parse(&["serve", "--extensions", "b,a", "--extensions", "c"]);
        assert_eq!(args.extensions, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_listen_and_loader_flags() {
        let args = parse(&["serve", "--listen", "--loader", "transformers", "--nowebui"]);
        let overrides = args.overrides();
        assert_eq!(overrides.get("listen_host"), Some(&Value::from("0.0.0.0")));
        assert_eq!(overrides.get("loader"), Some(&Value::from("Transformers")));
        assert_eq!(overrides.get("api_only"), Some(&Value::from(true)));
    }

    #[test]
    fn test_lora_list_becomes_override() {
        let args = parse(&["serve", "--lora", "style,tone", "--lora", "facts"]);
        assert_eq!(
            args.overrides().get("lora"),
            Some(&Value::from(vec!["style", "tone", "facts"]))
        );
        assert!(!parse(&["serve"]).overrides().contains_key("lora"));
    }
}
