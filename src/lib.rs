//! llmhost - host process for a single local LLM backend
//!
//! llmhost keeps one model loaded behind an HTTP endpoint and manages the
//! lifecycle around it: settings resolution, fitting the model to the
//! VRAM budget, loading and replacing it, unloading it when idle, and
//! rebuilding the endpoint without restarting the process.
//!
//! # Architecture
//!
//! - **config**: layered settings (overrides, settings file, model metadata, defaults)
//! - **engine**: fitter, planner, scheduler (the model slot and its gate), idle watchdog
//! - **backend**: the inference backend seam and the `llama-server` backend
//! - **server**: the client endpoint and its restart supervisor
//! - **shutdown**: signal handling and the final unload
//!
//! # Example
//!
//! ```bash
//! # Serve a model, unloading it after 30 idle minutes
//! llmhost serve --model mistral-7b --idle-timeout 30
//!
//! # Fit the model to a 6 GiB VRAM budget
//! llmhost serve --model mistral-7b --vram-budget-mib 6144
//!
//! # List available models
//! llmhost list
//! ```

pub mod backend;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod extensions;
pub mod loader;
pub mod model;
pub mod server;
pub mod shutdown;

// Re-export key types
pub use config::{EffectiveConfig, GenerationConfig, InferenceConfig, ServerConfig};
pub use engine::{LoadPlan, Planner, Scheduler};
pub use model::{Loader, ModelIdentity};
pub use server::Supervisor;
