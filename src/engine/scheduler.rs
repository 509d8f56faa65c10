//! Model scheduler for lifecycle management
//!
//! Owns the single model slot. Every inference call and every lifecycle
//! transition (load, unload, replace, idle eviction) goes through one
//! mutex, the gate, so at most one of them runs at any instant and no
//! caller holding the gate ever sees a half-loaded or half-released model.
//!
//! Backends block, so the work done under the gate runs on the blocking
//! pool with an owned guard. The guard moves into the blocking task and is
//! released when that task ends, whether it returns, fails, or the caller
//! that started it is cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::backend::{Backend, BackendFactory};
use crate::config::GenerationConfig;
use crate::engine::LoadPlan;
use crate::error::{InferenceError, LoadError, UnloadError};
use crate::model::ModelIdentity;

/// Lifecycle state of the model slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Empty,
    Loading,
    Ready,
    Unloading,
}

/// Description of the model currently in the slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelHandle {
    pub identity: ModelIdentity,
    pub plan: LoadPlan,
    #[serde(skip)]
    pub loaded_at: Instant,
}

/// Published view of the slot, readable without taking the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub state: ModelState,
    pub model: Option<ModelHandle>,
}

impl SlotStatus {
    fn empty() -> Self {
        Self {
            state: ModelState::Empty,
            model: None,
        }
    }

    fn with(state: ModelState, model: Option<ModelHandle>) -> Self {
        Self { state, model }
    }
}

struct LoadedModel {
    handle: ModelHandle,
    backend: Box<dyn Backend>,
}

/// The model slot. Only reachable through the gate.
#[derive(Default)]
struct ModelSlot {
    loaded: Option<LoadedModel>,
}

/// Time of the last inference completion.
///
/// Written without the gate; last writer wins. The idle watchdog tolerates
/// a slightly stale value.
#[derive(Debug)]
pub struct ActivityClock {
    origin: Instant,
    last_ms: AtomicU64,
}

impl ActivityClock {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ms: AtomicU64::new(0),
        }
    }

    /// Record activity now
    pub fn touch(&self) {
        let now = self.origin.elapsed().as_millis() as u64;
        self.last_ms.fetch_max(now, Ordering::Relaxed);
    }

    /// Time since the last recorded activity
    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_ms.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(last)
    }
}

/// Outcome of one idle-eviction attempt
#[derive(Debug)]
pub enum IdleCheck {
    /// The gate is held; try again later
    Busy,
    /// Nothing loaded
    Empty,
    /// Used within the threshold
    Active,
    /// The model was unloaded
    Evicted(ModelIdentity),
    /// Unloading failed; the slot was cleared anyway
    Failed(UnloadError),
}

/// Model scheduler
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Scheduler {
    gate: Arc<Mutex<ModelSlot>>,
    status: Arc<watch::Sender<SlotStatus>>,
    activity: Arc<ActivityClock>,
    factory: Arc<dyn BackendFactory>,
}

impl Scheduler {
    /// Create a scheduler with an empty slot
    pub fn new(factory: Arc<dyn BackendFactory>) -> Self {
        let (status, _) = watch::channel(SlotStatus::empty());
        Self {
            gate: Arc::new(Mutex::new(ModelSlot::default())),
            status: Arc::new(status),
            activity: Arc::new(ActivityClock::new()),
            factory,
        }
    }

    /// Current slot status
    pub fn status(&self) -> SlotStatus {
        self.status.borrow().clone()
    }

    pub fn activity(&self) -> &ActivityClock {
        &self.activity
    }

    /// Load a model into the slot.
    ///
    /// Any current occupant is released first, under the same gate
    /// acquisition, so the old and new backends are never resident at the
    /// same time. On failure the slot is left empty.
    pub async fn load(
        &self,
        identity: ModelIdentity,
        plan: LoadPlan,
    ) -> Result<ModelHandle, LoadError> {
        let mut slot = self.gate.clone().lock_owned().await;
        let status = self.status.clone();
        let factory = self.factory.clone();
        let activity = self.activity.clone();

        let task = tokio::task::spawn_blocking(move || {
            if let Some(previous) = slot.loaded.take() {
                status.send_replace(SlotStatus::with(
                    ModelState::Unloading,
                    Some(previous.handle.clone()),
                ));
                if let Err(e) = release(previous) {
                    tracing::warn!("Releasing the previous model failed: {}", e);
                }
            }

            status.send_replace(SlotStatus::with(ModelState::Loading, None));
            tracing::info!("Loading {}", identity);
            let started = Instant::now();

            match factory.instantiate(&identity, &plan) {
                Ok(backend) => {
                    let handle = ModelHandle {
                        identity,
                        plan,
                        loaded_at: Instant::now(),
                    };
                    slot.loaded = Some(LoadedModel {
                        handle: handle.clone(),
                        backend,
                    });
                    activity.touch();
                    status.send_replace(SlotStatus::with(ModelState::Ready, Some(handle.clone())));
                    tracing::info!(
                        "Loaded {} in {:.2}s",
                        handle.identity,
                        started.elapsed().as_secs_f64()
                    );
                    Ok(handle)
                }
                Err(e) => {
                    status.send_replace(SlotStatus::empty());
                    tracing::error!("Failed to load {}: {}", identity, e);
                    Err(e)
                }
            }
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                self.status.send_replace(SlotStatus::empty());
                Err(LoadError::Backend(format!("load task failed: {}", e)))
            }
        }
    }

    /// Replace the current model.
    ///
    /// Same as [`Scheduler::load`]: release and construction happen under
    /// one gate acquisition, so no other caller observes the empty slot in
    /// between.
    pub async fn replace(
        &self,
        identity: ModelIdentity,
        plan: LoadPlan,
    ) -> Result<ModelHandle, LoadError> {
        self.load(identity, plan).await
    }

    /// Unload the current model. Unloading an empty slot succeeds.
    ///
    /// The slot is cleared even when the backend fails to stop; the error
    /// is still returned.
    pub async fn unload(&self) -> Result<(), UnloadError> {
        let slot = self.gate.clone().lock_owned().await;
        if slot.loaded.is_none() {
            return Ok(());
        }
        self.release_locked(slot).await
    }

    /// Unload if idle for at least `threshold`, without waiting for the gate
    pub async fn evict_if_idle(&self, threshold: Duration) -> IdleCheck {
        let Ok(slot) = self.gate.clone().try_lock_owned() else {
            return IdleCheck::Busy;
        };
        let identity = match &slot.loaded {
            Some(model) => model.handle.identity.clone(),
            None => return IdleCheck::Empty,
        };
        if self.activity.idle_for() < threshold {
            return IdleCheck::Active;
        }

        match self.release_locked(slot).await {
            Ok(()) => IdleCheck::Evicted(identity),
            Err(e) => IdleCheck::Failed(e),
        }
    }

    async fn release_locked(
        &self,
        mut slot: tokio::sync::OwnedMutexGuard<ModelSlot>,
    ) -> Result<(), UnloadError> {
        let status = self.status.clone();
        let task = tokio::task::spawn_blocking(move || {
            let Some(model) = slot.loaded.take() else {
                return Ok(());
            };
            status.send_replace(SlotStatus::with(
                ModelState::Unloading,
                Some(model.handle.clone()),
            ));
            let result = release(model);
            status.send_replace(SlotStatus::empty());
            result
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                self.status.send_replace(SlotStatus::empty());
                Err(UnloadError::TaskFailed(e.to_string()))
            }
        }
    }

    /// Run `f` against the loaded backend with the gate held.
    ///
    /// This is the only way inference callers reach the slot. Completion,
    /// successful or not, counts as activity.
    pub async fn with_backend<F, T>(&self, f: F) -> Result<T, InferenceError>
    where
        F: FnOnce(&ModelHandle, &mut dyn Backend) -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut slot = self.gate.clone().lock_owned().await;
        if slot.loaded.is_none() {
            return Err(InferenceError::NoModel);
        }
        let activity = self.activity.clone();

        tokio::task::spawn_blocking(move || {
            let Some(model) = slot.loaded.as_mut() else {
                return Err(InferenceError::NoModel);
            };
            let output = f(&model.handle, model.backend.as_mut());
            activity.touch();
            Ok(output)
        })
        .await
        .map_err(|e| InferenceError::TaskFailed(e.to_string()))?
    }

    /// Generate a completion with the loaded model
    pub async fn generate(
        &self,
        prompt: String,
        config: GenerationConfig,
    ) -> Result<String, InferenceError> {
        self.with_backend(move |_, backend| backend.generate(&prompt, &config))
            .await?
            .map_err(|e| InferenceError::Backend(format!("{:#}", e)))
    }
}

/// Stop the backend if it can be stopped, then drop it
fn release(model: LoadedModel) -> Result<(), UnloadError> {
    let LoadedModel {
        handle,
        mut backend,
    } = model;

    let result = match backend.as_stoppable() {
        Some(stoppable) => stoppable
            .stop()
            .map_err(|e| UnloadError::StopFailed(format!("{:#}", e))),
        None => Ok(()),
    };
    drop(backend);

    match &result {
        Ok(()) => tracing::info!("Unloaded {}", handle.identity),
        Err(e) => tracing::warn!("Unloaded {} with errors: {}", handle.identity, e),
    }
    result
}
