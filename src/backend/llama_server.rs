//! llama.cpp backend
//!
//! Runs the model inside an external `llama-server` process bound to a
//! private loopback port and talks to it over HTTP. The child process is
//! the resource that must be released, so this backend is [`Stoppable`].

use std::ffi::OsString;
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Backend, BackendFactory, Stoppable};
use crate::config::{GenerationConfig, USER_DATA_DIR};
use crate::engine::LoadPlan;
use crate::error::LoadError;
use crate::loader::{detect_model_source, find_model_path, is_plain_model_name, ModelFormat};
use crate::model::{Loader, ModelIdentity};

/// How long the server may take to load weights
const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(600);

/// Interval between readiness probes
const HEALTH_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// LoRA adapter directory under `user_data`
const LORA_DIR: &str = "loras";

/// Spawns `llama-server` processes for llama.cpp models
#[derive(Debug, Clone)]
pub struct LlamaServerFactory {
    executable: PathBuf,
    model_dir: PathBuf,
    lora_dir: PathBuf,
    startup_timeout: Duration,
}

impl LlamaServerFactory {
    pub fn new(executable: impl Into<PathBuf>, model_dir: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            model_dir: model_dir.into(),
            lora_dir: PathBuf::from(USER_DATA_DIR).join(LORA_DIR),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }

    pub fn with_lora_dir(mut self, lora_dir: impl Into<PathBuf>) -> Self {
        self.lora_dir = lora_dir.into();
        self
    }

    /// Resolve adapter names against the LoRA directory
    fn lora_paths(&self, names: &[String]) -> Result<Vec<PathBuf>, LoadError> {
        names
            .iter()
            .map(|name| {
                let path = self.lora_dir.join(name);
                if is_plain_model_name(name) && path.exists() {
                    Ok(path)
                } else {
                    Err(LoadError::NotFound(format!("LoRA adapter {}", name)))
                }
            })
            .collect()
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

impl BackendFactory for LlamaServerFactory {
    fn instantiate(
        &self,
        identity: &ModelIdentity,
        plan: &LoadPlan,
    ) -> Result<Box<dyn Backend>, LoadError> {
        if identity.loader != Loader::LlamaCpp {
            return Err(LoadError::UnsupportedLoader {
                loader: identity.loader.to_string(),
                model: identity.name.clone(),
            });
        }

        let path = find_model_path(&self.model_dir, &identity.name)?;
        let source = detect_model_source(&path)?;
        if source.format != ModelFormat::Gguf {
            return Err(LoadError::InvalidModel(format!(
                "llama.cpp needs GGUF weights, found {} at {}",
                source.format.as_str(),
                source.weights_path.display()
            )));
        }

        let loras = self.lora_paths(&plan.lora)?;

        let server = LlamaServer::start(
            &self.executable,
            &source.weights_path,
            plan,
            &loras,
            self.startup_timeout,
        )?;
        Ok(Box::new(server))
    }
}

/// A running `llama-server` child process
pub struct LlamaServer {
    child: Option<Child>,
    base_url: String,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: String,
}

impl LlamaServer {
    /// Launch the server and wait until it reports healthy
    pub fn start(
        executable: &Path,
        weights: &Path,
        plan: &LoadPlan,
        loras: &[PathBuf],
        timeout: Duration,
    ) -> Result<Self, LoadError> {
        let port = free_port()
            .map_err(|e| LoadError::ResourceExhausted(format!("no free local port: {}", e)))?;

        tracing::info!(
            "Starting llama-server on port {} (ctx {}, cache {}, {} GPU layers)",
            port,
            plan.context_size,
            plan.cache_type,
            plan.offload_layers
        );

        for lora in loras {
            tracing::info!("Applying LoRA adapter {}", lora.display());
        }

        let child = Command::new(executable)
            .args(server_args(weights, plan, loras, port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                LoadError::Backend(format!("failed to launch {}: {}", executable.display(), e))
            })?;

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(None)
            .build()
            .map_err(|e| LoadError::Backend(format!("HTTP client: {}", e)))?;

        let mut server = Self {
            child: Some(child),
            base_url: format!("http://127.0.0.1:{}", port),
            client,
        };

        if let Err(e) = server.wait_until_ready(timeout) {
            let _ = server.stop();
            return Err(e);
        }
        Ok(server)
    }

    fn wait_until_ready(&mut self, timeout: Duration) -> Result<(), LoadError> {
        let started = Instant::now();
        let health_url = format!("{}/health", self.base_url);

        loop {
            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    self.child = None;
                    return Err(LoadError::Backend(format!(
                        "llama-server exited during startup ({})",
                        status
                    )));
                }
            }

            if let Ok(response) = self.client.get(&health_url).send() {
                if response.status().is_success() {
                    tracing::info!("llama-server ready after {:?}", started.elapsed());
                    return Ok(());
                }
            }

            if started.elapsed() >= timeout {
                return Err(LoadError::Backend(format!(
                    "llama-server did not become ready within {:?}",
                    timeout
                )));
            }
            std::thread::sleep(HEALTH_POLL_INTERVAL);
        }
    }
}

impl Backend for LlamaServer {
    fn generate(&mut self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        let mut body = json!({
            "prompt": prompt,
            "n_predict": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "repeat_penalty": config.repeat_penalty,
            "stop": config.stop_sequences,
        });
        if let Value::Object(map) = &mut body {
            if config.is_greedy() {
                map.insert("top_k".to_string(), json!(1));
            } else if let Some(top_k) = config.top_k {
                map.insert("top_k".to_string(), json!(top_k));
            }
            if let Some(seed) = config.seed {
                map.insert("seed".to_string(), json!(seed));
            }
        }

        let response = self
            .client
            .post(format!("{}/completion", self.base_url))
            .json(&body)
            .send()
            .context("llama-server request failed")?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            return Err(anyhow!("llama-server returned {}: {}", status, text));
        }

        let completion: CompletionResponse = response
            .json()
            .context("invalid llama-server response")?;
        Ok(completion.content)
    }

    fn as_stoppable(&mut self) -> Option<&mut dyn Stoppable> {
        Some(self)
    }
}

impl Stoppable for LlamaServer {
    fn stop(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        tracing::info!("Stopping llama-server (pid {})", child.id());
        if child.try_wait()?.is_none() {
            child.kill().context("failed to kill llama-server")?;
        }
        child.wait().context("failed to reap llama-server")?;
        Ok(())
    }
}

impl Drop for LlamaServer {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!("Failed to stop llama-server on drop: {}", e);
        }
    }
}

/// Command line for `llama-server`
fn server_args(weights: &Path, plan: &LoadPlan, loras: &[PathBuf], port: u16) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["--model".into(), weights.into()];
    let mut flag = |name: &str, value: String| {
        args.push(name.into());
        args.push(value.into());
    };
    flag("--ctx-size", plan.context_size.to_string());
    flag("--cache-type-k", plan.cache_type.as_str().to_string());
    flag("--cache-type-v", plan.cache_type.as_str().to_string());
    flag("--n-gpu-layers", plan.offload_layers.to_string());
    flag("--host", "127.0.0.1".to_string());
    flag("--port", port.to_string());
    for lora in loras {
        args.push("--lora".into());
        args.push(lora.into());
    }
    args
}

fn free_port() -> std::io::Result<u16> {
    Ok(TcpListener::bind("127.0.0.1:0")?.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheType;

    fn plan(loader: Loader) -> LoadPlan {
        LoadPlan {
            loader,
            context_size: 2048,
            cache_type: CacheType::Fp16,
            offload_layers: 0,
            declared_vram_budget: None,
            lora: Vec::new(),
        }
    }

    #[test]
    fn test_rejects_other_loaders() {
        let dir = tempfile::tempdir().unwrap();
        let factory = LlamaServerFactory::new("llama-server", dir.path());
        let identity = ModelIdentity::new("model", Loader::Transformers);
        assert!(matches!(
            factory.instantiate(&identity, &plan(Loader::Transformers)),
            Err(LoadError::UnsupportedLoader { .. })
        ));
    }

    #[test]
    fn test_missing_weights_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let factory = LlamaServerFactory::new("llama-server", dir.path());
        let identity = ModelIdentity::new("absent", Loader::LlamaCpp);
        assert!(matches!(
            factory.instantiate(&identity, &plan(Loader::LlamaCpp)),
            Err(LoadError::NotFound(_))
        ));
    }

    #[test]
    fn test_missing_executable_is_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tiny.gguf"), b"GGUF").unwrap();
        let factory = LlamaServerFactory::new(dir.path().join("no-such-binary"), dir.path())
            .with_startup_timeout(Duration::from_secs(1));
        let identity = ModelIdentity::new("tiny", Loader::LlamaCpp);
        assert!(matches!(
            factory.instantiate(&identity, &plan(Loader::LlamaCpp)),
            Err(LoadError::Backend(_))
        ));
    }

    #[test]
    fn test_names_outside_model_dir_are_not_found() {
        let root = tempfile::tempdir().unwrap();
        let models = root.path().join("models");
        std::fs::create_dir(&models).unwrap();
        std::fs::create_dir(root.path().join("other")).unwrap();
        let outside = root.path().join("other").join("evil.gguf");
        std::fs::write(&outside, b"GGUF").unwrap();

        let factory = LlamaServerFactory::new(root.path().join("no-such-binary"), &models);
        for name in [outside.to_string_lossy().into_owned(), "../other/evil".to_string()] {
            let identity = ModelIdentity::new(name, Loader::LlamaCpp);
            assert!(matches!(
                factory.instantiate(&identity, &plan(Loader::LlamaCpp)),
                Err(LoadError::NotFound(_))
            ));
        }
    }

    #[test]
    fn test_missing_lora_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tiny.gguf"), b"GGUF").unwrap();
        let factory = LlamaServerFactory::new(dir.path().join("no-such-binary"), dir.path())
            .with_lora_dir(dir.path().join("loras"));
        let identity = ModelIdentity::new("tiny", Loader::LlamaCpp);
        let mut with_lora = plan(Loader::LlamaCpp);
        with_lora.lora = vec!["style".to_string()];
        assert!(matches!(
            factory.instantiate(&identity, &with_lora),
            Err(LoadError::NotFound(_))
        ));
    }

    #[test]
    fn test_server_args_pass_plan_and_loras() {
        let mut plan = plan(Loader::LlamaCpp);
        plan.offload_layers = 12;
        let loras = vec![PathBuf::from("/l/style"), PathBuf::from("/l/tone")];
        let args: Vec<String> = server_args(Path::new("/m/tiny.gguf"), &plan, &loras, 4242)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(&args[..2], ["--model", "/m/tiny.gguf"]);
        assert!(args.windows(2).any(|w| w == ["--n-gpu-layers", "12"]));
        assert!(args.windows(2).any(|w| w == ["--cache-type-k", "f16"]));
        assert!(args.windows(2).any(|w| w == ["--port", "4242"]));
        assert_eq!(
            &args[args.len() - 4..],
            ["--lora", "/l/style", "--lora", "/l/tone"]
        );
    }
}
