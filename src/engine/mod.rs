//! Model lifecycle engine
//!
//! - Fitter: fits the offload layer count to the VRAM budget
//! - Planner: resolves settings and metadata into a load plan
//! - Scheduler: owns the model slot behind the gate (load/unload/replace)
//! - Watchdog: unloads the model after a period of inactivity

mod fitter;
mod planner;
mod scheduler;
mod watchdog;

pub use fitter::{
    estimate_footprint, fit, max_fitting_layers, FitRequest, LoadPlan, COMPUTE_OVERHEAD_BYTES,
};
pub use planner::{LoadRequest, PlannedLoad, Planner};
pub use scheduler::{ActivityClock, IdleCheck, ModelHandle, ModelState, Scheduler, SlotStatus};
pub use watchdog::{IdleWatchdog, DEFAULT_POLL_INTERVAL};
