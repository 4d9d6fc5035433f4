//! Single-threaded graphics context ownership for texflow.
//!
//! Every GPU object lives in a share group (one device plus its texture
//! namespace). A [`ContextExecutor`] owns a worker thread and the
//! [`GraphicsContext`] bound to it; all GPU work is submitted through the
//! executor and runs on that thread:
//!
//! ```text
//!   caller thread                       executor worker
//!   ─────────────                       ───────────────
//!   ContextExecutor::create ──spawn──▶  bring-up (wgpu | software)
//!          ◀──────────── ready ───────  GraphicsContext::initialize
//!   submit / call ───── Command ─────▶  task(&GraphicsContext)
//!   release ─────────── Shutdown ────▶  GraphicsContext::release
//! ```
//!
//! The wgpu backend renders through one WGSL pipeline; the software backend
//! reproduces the same draw semantics on the CPU so pipelines run unchanged
//! on machines without an adapter.

mod backend;
pub mod bringup;
mod context;
pub mod drawer;
mod errors;
mod executor;
pub mod matrix;
pub mod mirror;
mod surface;
mod texture;
mod types;

pub use backend::{SharedContext, SOFTWARE_MAX_TEXTURE_DIMENSION};
pub use context::GraphicsContext;
pub use drawer::{DrawRequest, Effect, Program};
pub use errors::{ContextError, ContextResult, ReadbackError, SurfaceError};
pub use executor::{ContextExecutor, ExecutorState};
pub use matrix::Mat4;
pub use mirror::MirrorMode;
pub use surface::{ImageSurface, RenderSurface, SurfaceHandle};
pub use texture::{OwnedTexture, TextureId};
pub use types::{
    AdapterProfile, BackendKind, BackendPreference, ContextFlags, ExecutorConfig, FeatureLevel,
    DEFAULT_BACKING_SIZE, DEFAULT_INIT_TIMEOUT,
};
