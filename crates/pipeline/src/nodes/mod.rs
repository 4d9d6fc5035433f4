//! Concrete node kinds.
//!
//! Every kind is a variant of the closed [`Stage`] enum stored inside a
//! [`PipelineNode`](crate::PipelineNode); the typed handles in the submodules
//! wrap a node and expose the kind-specific controls.

pub(crate) mod capture;
pub(crate) mod distributor;
pub(crate) mod effect;
pub(crate) mod relay;
pub(crate) mod renderer;
pub(crate) mod source;

use gpucontext::{GraphicsContext, ReadbackError};
use image::RgbaImage;

use crate::frame::Frame;

pub use capture::{CaptureCallbacks, CaptureNode};
pub use distributor::Distributor;
pub use effect::{EffectNode, DEFAULT_EFFECT_SIZE};
pub use relay::{RelayNode, TapCallback};
pub use renderer::{RendererStats, SurfaceRenderer};
pub use source::{FrameProducer, ImageSource, SurfaceSource, DEFAULT_SOURCE_FPS};

pub(crate) enum Stage {
    ImageSource(source::ImageSourceStage),
    SurfaceSource(source::SurfaceSourceStage),
    Distributor(distributor::DistributorStage),
    Capture(capture::CaptureStage),
    Relay(relay::RelayStage),
    Effect(effect::EffectStage),
    Renderer(renderer::RendererStage),
}

/// Work a stage hands back to its node once the stage lock is released.
pub(crate) enum Deferred {
    Captured {
        image: RgbaImage,
        rearm: Option<capture::Rearm>,
    },
    CaptureFailed(ReadbackError),
    Tap(Frame),
}

pub(crate) struct StageOutput {
    pub(crate) forward: Option<Frame>,
    pub(crate) deferred: Option<Deferred>,
}

impl StageOutput {
    pub(crate) fn forward(frame: Frame) -> Self {
        Self {
            forward: Some(frame),
            deferred: None,
        }
    }

    pub(crate) fn consume() -> Self {
        Self {
            forward: None,
            deferred: None,
        }
    }

    pub(crate) fn with_deferred(mut self, deferred: Deferred) -> Self {
        self.deferred = Some(deferred);
        self
    }
}

/// Per-kind callback table supplied at construction.
pub(crate) enum Callbacks {
    Capture(CaptureCallbacks),
    Tap(TapCallback),
}

impl Stage {
    pub(crate) fn process(
        &mut self,
        ctx: &GraphicsContext,
        frame: Frame,
        owner: &str,
    ) -> StageOutput {
        match self {
            // Sources only emit; anything delivered to them passes through.
            Stage::ImageSource(_) | Stage::SurfaceSource(_) => StageOutput::forward(frame),
            Stage::Distributor(stage) => stage.process(frame),
            Stage::Capture(stage) => stage.process(ctx, frame, owner),
            Stage::Relay(stage) => stage.process(frame),
            Stage::Effect(stage) => stage.process(ctx, frame, owner),
            Stage::Renderer(stage) => stage.process(ctx, frame, owner),
        }
    }

    pub(crate) fn release_resources(&mut self, ctx: &GraphicsContext, owner: &str) {
        match self {
            Stage::ImageSource(stage) => stage.release_resources(ctx, owner),
            Stage::SurfaceSource(stage) => stage.release_resources(ctx, owner),
            Stage::Distributor(_) | Stage::Relay(_) => {}
            Stage::Capture(stage) => stage.release_resources(ctx, owner),
            Stage::Effect(stage) => stage.release_resources(ctx, owner),
            Stage::Renderer(stage) => stage.release_resources(ctx, owner),
        }
    }
}

/// Hands an owned texture back to the context, logging on failure.
pub(crate) fn release_texture(
    ctx: &GraphicsContext,
    slot: &mut Option<gpucontext::OwnedTexture>,
    owner: &str,
) {
    if let Some(texture) = slot.take() {
        if let Err(err) = ctx.release_texture(texture) {
            tracing::warn!(node = owner, error = %err, "failed to release node texture");
        }
    }
}

/// Keeps `slot` holding a texture of exactly `width`×`height`.
pub(crate) fn ensure_texture<'a>(
    ctx: &GraphicsContext,
    slot: &'a mut Option<gpucontext::OwnedTexture>,
    width: u32,
    height: u32,
    owner: &str,
) -> gpucontext::ContextResult<&'a gpucontext::OwnedTexture> {
    if slot.as_ref().is_some_and(|texture| !texture.matches(width, height)) {
        release_texture(ctx, slot, owner);
    }
    if slot.is_none() {
        *slot = Some(ctx.create_texture(width, height)?);
        tracing::debug!(node = owner, width, height, "allocated node texture");
    }
    slot.as_ref()
        .ok_or_else(|| gpucontext::ContextError::invalid_state("texture slot empty after allocation"))
}
