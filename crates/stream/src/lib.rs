//! Observable areas: camera-centred windows of world data, recomputed on a
//! background worker and double-buffered for tear-free reads.
//!
//! # Invariants
//! - The active window is only replaced by `swap_buffers`, as a single
//!   snapshot pointer flip; readers never observe a partially built window.
//! - The worker never computes while a finished window awaits its swap.
//! - A window recentres when the camera enters a different chunk, and
//!   recomputes in place when loaded data lands inside it.
//! - Disposal is cooperative: the worker stops at the next step boundary.

mod area;
mod config;
mod error;
mod timer;
mod window;

pub use area::ObservableArea;
pub use config::{AreaConfig, MAX_WINDOW_SIZE};
pub use error::AreaError;
pub use timer::{AreaStats, PassTimer};
pub use window::{
    default_pipeline, AreaWindow, BuildCollision, CollisionMesh, FetchEntities, FetchLights,
    FetchMeshes, Recentre, StepContext, WindowStep,
};

pub fn crate_info() -> &'static str {
    "worldcache-stream v0.1.0"
}
