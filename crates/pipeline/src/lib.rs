//! Frame pipelines built from nodes that pass GPU textures along a chain.
//!
//! Every node belongs to one [`ContextExecutor`](gpucontext::ContextExecutor)
//! and is driven on its worker thread. Sources push [`Frame`]s to their
//! successor, which renders, observes or fans them out further:
//!
//! ```text
//!   ImageSource ──▶ EffectNode ──▶ Distributor ─┬─▶ CaptureNode ──▶ (callback)
//!   SurfaceSource                                └─▶ SurfaceRenderer ──▶ surface
//! ```
//!
//! A frame's texture id is only valid during the delivery that carries it.
//! Chain edits (`set_downstream`, `append`, `remove`, [`splice_after`],
//! [`unlink`]) may be called from any thread; they are marshalled onto the
//! executor so they never race with a delivery in progress.

mod chain;
mod error;
mod frame;
mod node;
mod nodes;
pub mod pacing;

pub use chain::{splice_after, unlink, walk};
pub use error::{PipelineError, PipelineResult};
pub use frame::Frame;
pub use node::{NodeKind, PipelineNode, WeakNode};
pub use nodes::{
    CaptureCallbacks, CaptureNode, Distributor, EffectNode, FrameProducer, ImageSource,
    RelayNode, RendererStats, SurfaceRenderer, SurfaceSource, TapCallback, DEFAULT_EFFECT_SIZE,
    DEFAULT_SOURCE_FPS,
};
