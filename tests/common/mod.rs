//! Shared test fixtures: an in-process backend that records its lifecycle

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::{Map, Value};

use llmhost::backend::{Backend, BackendFactory, Stoppable};
use llmhost::config::GenerationConfig;
use llmhost::engine::LoadPlan;
use llmhost::error::LoadError;
use llmhost::model::ModelIdentity;

/// Counters shared between a factory and the backends it creates
#[derive(Debug, Default)]
pub struct Counters {
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub instantiated: AtomicUsize,
    pub stopped: AtomicUsize,
    pub generated: AtomicUsize,
}

impl Counters {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn instantiated(&self) -> usize {
        self.instantiated.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct MockFactory {
    pub counters: Arc<Counters>,
    /// Models that fail to instantiate
    pub missing: Mutex<Vec<String>>,
    pub fail_stop: bool,
    pub generate_delay: Duration,
    pub instantiate_delay: Duration,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_stop() -> Self {
        Self {
            fail_stop: true,
            ..Default::default()
        }
    }

    pub fn slow_generate(delay: Duration) -> Self {
        Self {
            generate_delay: delay,
            ..Default::default()
        }
    }

    pub fn with_missing(self, name: &str) -> Self {
        if let Ok(mut missing) = self.missing.lock() {
            missing.push(name.to_string());
        }
        self
    }
}

impl BackendFactory for MockFactory {
    fn instantiate(
        &self,
        identity: &ModelIdentity,
        _plan: &LoadPlan,
    ) -> Result<Box<dyn Backend>, LoadError> {
        std::thread::sleep(self.instantiate_delay);
        if self.missing.lock().unwrap().contains(&identity.name) {
            return Err(LoadError::NotFound(identity.name.clone()));
        }

        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);
        self.counters.instantiated.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MockBackend {
            name: identity.name.clone(),
            counters: self.counters.clone(),
            fail_stop: self.fail_stop,
            delay: self.generate_delay,
        }))
    }
}

pub struct MockBackend {
    name: String,
    counters: Arc<Counters>,
    fail_stop: bool,
    delay: Duration,
}

impl Backend for MockBackend {
    fn generate(&mut self, prompt: &str, _config: &GenerationConfig) -> Result<String> {
        std::thread::sleep(self.delay);
        self.counters.generated.fetch_add(1, Ordering::SeqCst);
        if prompt == "fail" {
            return Err(anyhow!("generation failed on purpose"));
        }
        Ok(format!("{}: {}", self.name, prompt))
    }

    fn as_stoppable(&mut self) -> Option<&mut dyn Stoppable> {
        Some(self)
    }
}

impl Stoppable for MockBackend {
    fn stop(&mut self) -> Result<()> {
        self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            Err(anyhow!("stop failed on purpose"))
        } else {
            Ok(())
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn plan() -> LoadPlan {
    LoadPlan {
        loader: llmhost::Loader::LlamaCpp,
        context_size: 2048,
        cache_type: Default::default(),
        offload_layers: 0,
        declared_vram_budget: None,
        lora: Vec::new(),
    }
}

pub fn identity(name: &str) -> ModelIdentity {
    ModelIdentity::new(name, llmhost::Loader::LlamaCpp)
}

pub fn settings(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => panic!("settings must be an object"),
    }
}
