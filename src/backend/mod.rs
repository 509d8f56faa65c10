//! Inference backend seam
//!
//! The host never runs a model itself. A [`BackendFactory`] turns a
//! [`LoadPlan`] into a live [`Backend`]; the scheduler owns that backend
//! for as long as it sits in the model slot.
//!
//! Backends that hold external resources (child processes, device
//! contexts) expose them through the [`Stoppable`] capability, which the
//! scheduler checks on unload and shutdown.

mod llama_server;

pub use llama_server::{LlamaServer, LlamaServerFactory};

use anyhow::Result;

use crate::config::GenerationConfig;
use crate::engine::LoadPlan;
use crate::error::LoadError;
use crate::model::ModelIdentity;

/// A loaded model
///
/// All calls are made with the scheduler's gate held, so `&mut self` is
/// exclusive. Calls may block for a long time.
pub trait Backend: Send {
    /// Generate a completion for `prompt`
    fn generate(&mut self, prompt: &str, config: &GenerationConfig) -> Result<String>;

    /// Capability query for explicit resource release
    fn as_stoppable(&mut self) -> Option<&mut dyn Stoppable> {
        None
    }
}

/// A backend whose resources must be released explicitly
pub trait Stoppable {
    fn stop(&mut self) -> Result<()>;
}

/// Creates backends from load plans
pub trait BackendFactory: Send + Sync {
    /// Instantiate a backend. May block for a long time.
    fn instantiate(
        &self,
        identity: &ModelIdentity,
        plan: &LoadPlan,
    ) -> Result<Box<dyn Backend>, LoadError>;
}
