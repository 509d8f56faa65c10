//! Resource fitting
//!
//! Computes how many layers to offload to the accelerator so that the
//! estimated footprint stays within the declared VRAM budget.
//!
//! The fitter is advisory. With `auto_adjust` off the requested count is
//! passed through untouched, and any failure to estimate degrades to the
//! requested count instead of failing the load.

use serde::Serialize;

use crate::config::CacheType;
use crate::error::FitError;
use crate::model::{Loader, ModelDimensions, ModelIdentity};

/// Fixed scratch memory needed as soon as anything runs on the accelerator
pub const COMPUTE_OVERHEAD_BYTES: u64 = 512 * 1024 * 1024;

/// Everything needed to instantiate a backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadPlan {
    pub loader: Loader,
    pub context_size: u32,
    pub cache_type: CacheType,
    pub offload_layers: u32,
    /// Declared VRAM budget in bytes
    pub declared_vram_budget: Option<u64>,
    /// LoRA adapter names, applied in order after the weights load
    pub lora: Vec<String>,
}

/// Inputs to [`fit`]
#[derive(Debug, Clone)]
pub struct FitRequest {
    pub context_size: u32,
    pub cache_type: CacheType,
    /// Layer count asked for (explicitly or by model metadata)
    pub requested_layers: u32,
    pub dimensions: Option<ModelDimensions>,
    pub budget_bytes: Option<u64>,
    pub auto_adjust: bool,
}

/// Estimated accelerator memory for `layers` offloaded layers
pub fn estimate_footprint(
    dims: &ModelDimensions,
    layers: u32,
    context_size: u32,
    cache_type: CacheType,
) -> u64 {
    if layers == 0 {
        return 0;
    }

    let weights_per_layer = dims.weights_bytes / u64::from(dims.layer_count.max(1));
    // K and V, one entry per token per KV channel
    let kv_per_layer = (2.0
        * f64::from(context_size)
        * f64::from(dims.kv_width)
        * cache_type.bytes_per_element())
    .ceil() as u64;

    u64::from(layers)
        .saturating_mul(weights_per_layer.saturating_add(kv_per_layer))
        .saturating_add(COMPUTE_OVERHEAD_BYTES)
}

/// Largest layer count in `0..=upper` whose footprint fits `budget`
pub fn max_fitting_layers(
    dims: &ModelDimensions,
    upper: u32,
    context_size: u32,
    cache_type: CacheType,
    budget: u64,
) -> u32 {
    let fits = |n: u32| estimate_footprint(dims, n, context_size, cache_type) <= budget;

    // footprint is monotonic in n and footprint(0) == 0
    let (mut lo, mut hi) = (0u32, upper);
    while lo < hi {
        let mid = lo + (hi - lo + 1) / 2;
        if fits(mid) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    lo
}

/// Compute the load plan for a model
pub fn fit(identity: &ModelIdentity, request: &FitRequest) -> LoadPlan {
    let offload_layers = if request.auto_adjust {
        match try_fit(identity, request) {
            Ok(layers) => {
                if layers != request.requested_layers {
                    tracing::info!(
                        model = %identity.name,
                        requested = request.requested_layers,
                        adjusted = layers,
                        "Adjusted GPU layers to fit VRAM budget"
                    );
                }
                layers
            }
            Err(e) => {
                tracing::warn!(
                    model = %identity.name,
                    "Cannot auto-adjust GPU layers ({}), using {}",
                    e,
                    request.requested_layers
                );
                request.requested_layers
            }
        }
    } else {
        request.requested_layers
    };

    LoadPlan {
        loader: identity.loader,
        context_size: request.context_size,
        cache_type: request.cache_type,
        offload_layers,
        declared_vram_budget: request.budget_bytes,
        lora: Vec::new(),
    }
}

fn try_fit(identity: &ModelIdentity, request: &FitRequest) -> Result<u32, FitError> {
    if !identity.loader.supports_layer_offload() {
        return Err(FitError::OffloadUnsupported(identity.loader.to_string()));
    }
    let budget = request.budget_bytes.ok_or(FitError::NoBudget)?;
    let dims = request
        .dimensions
        .ok_or_else(|| FitError::UnknownDimensions(identity.name.clone()))?;

    let upper = request.requested_layers.min(dims.layer_count);
    Ok(max_fitting_layers(
        &dims,
        upper,
        request.context_size,
        request.cache_type,
        budget,
    ))
}
