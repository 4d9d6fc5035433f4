use std::ops::Deref;
use std::time::Instant;

use gpucontext::{
    ContextExecutor, DrawRequest, GraphicsContext, MirrorMode, OwnedTexture, Program,
    SurfaceHandle,
};

use super::{ensure_texture, release_texture, Stage, StageOutput};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::node::{NodeKind, PipelineNode};
use crate::pacing::{interval_for_fps, FrameLimiter};

/// Delivery counters of a [`SurfaceRenderer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub presented: u64,
    /// Deliveries refused by the frame-rate ceiling.
    pub dropped: u64,
    /// Deliveries that arrived while no surface was bound.
    pub skipped: u64,
    /// Deliveries whose draw or present failed.
    pub failed: u64,
}

pub(crate) struct RendererStage {
    surface: Option<SurfaceHandle>,
    limiter: FrameLimiter,
    mirror: MirrorMode,
    target: Option<OwnedTexture>,
    stats: RendererStats,
}

impl RendererStage {
    pub(crate) fn process(&mut self, ctx: &GraphicsContext, frame: Frame, owner: &str) -> StageOutput {
        let Some(surface) = self.surface.clone() else {
            self.stats.skipped += 1;
            return StageOutput::consume();
        };
        if !self.limiter.admit(Instant::now()) {
            self.stats.dropped += 1;
            return StageOutput::consume();
        }
        match self.present(ctx, &surface, &frame, owner) {
            Ok(()) => self.stats.presented += 1,
            Err(err) => {
                self.stats.failed += 1;
                tracing::warn!(
                    node = owner,
                    surface = %surface.label(),
                    error = %err,
                    "failed to present frame"
                );
            }
        }
        StageOutput::consume()
    }

    fn present(
        &mut self,
        ctx: &GraphicsContext,
        surface: &SurfaceHandle,
        frame: &Frame,
        owner: &str,
    ) -> PipelineResult<()> {
        let (width, height) = surface.size();
        let target = ensure_texture(ctx, &mut self.target, width, height, owner)?.id();
        ctx.draw(&DrawRequest {
            source: frame.texture,
            target,
            tex_matrix: frame.transform,
            mvp: self.mirror.mvp(),
            program: Program::default(),
        })?;
        ctx.present_to(surface, target)?;
        Ok(())
    }

    pub(crate) fn release_resources(&mut self, ctx: &GraphicsContext, owner: &str) {
        release_texture(ctx, &mut self.target, owner);
        self.limiter.reset();
    }
}

/// Terminal node presenting frames to an external surface.
#[derive(Clone, Debug)]
pub struct SurfaceRenderer {
    node: PipelineNode,
}

impl SurfaceRenderer {
    pub fn new(executor: &ContextExecutor, surface: Option<SurfaceHandle>) -> Self {
        Self::build(executor, None, surface)
    }

    pub fn named(
        executor: &ContextExecutor,
        label: impl Into<String>,
        surface: Option<SurfaceHandle>,
    ) -> Self {
        Self::build(executor, Some(label.into()), surface)
    }

    fn build(executor: &ContextExecutor, label: Option<String>, surface: Option<SurfaceHandle>) -> Self {
        let stage = Stage::Renderer(RendererStage {
            surface,
            limiter: FrameLimiter::unlimited(),
            mirror: MirrorMode::Normal,
            target: None,
            stats: RendererStats::default(),
        });
        Self {
            node: PipelineNode::new(executor, NodeKind::Renderer, label, stage, None),
        }
    }

    pub fn node(&self) -> &PipelineNode {
        &self.node
    }

    fn update<T, F>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce(&GraphicsContext, &mut RendererStage) -> T + Send + 'static,
        T: Send + 'static,
    {
        let label = self.node.label().to_owned();
        self.node.update_stage(move |ctx, stage| match stage {
            Stage::Renderer(stage) => Ok(f(ctx, stage)),
            _ => Err(PipelineError::Unsupported {
                node: label,
                operation: "renderer control",
            }),
        })
    }

    /// Binds a new surface, or none to stop presenting without detaching.
    pub fn set_surface(&self, surface: Option<SurfaceHandle>) -> PipelineResult<()> {
        let owner = self.node.label().to_owned();
        self.update(move |ctx, stage| {
            let resized = match (&stage.surface, &surface) {
                (Some(old), Some(new)) => old.size() != new.size(),
                _ => true,
            };
            if resized {
                release_texture(ctx, &mut stage.target, &owner);
            }
            stage.surface = surface;
            stage.limiter.reset();
        })
    }

    pub fn has_surface(&self) -> bool {
        self.node
            .read_stage(|stage| matches!(stage, Stage::Renderer(s) if s.surface.is_some()))
            .unwrap_or(false)
    }

    /// Caps presentation at `fps`; zero or negative removes the ceiling.
    pub fn set_max_fps(&self, fps: f32) -> PipelineResult<()> {
        let interval = interval_for_fps(fps);
        self.update(move |_, stage| stage.limiter.set_min_interval(interval))
    }

    /// Fraction of the minimum interval an early frame may undercut.
    pub fn set_slack(&self, slack: f64) -> PipelineResult<()> {
        self.update(move |_, stage| {
            let limiter = std::mem::take(&mut stage.limiter);
            stage.limiter = limiter.slack(slack);
        })
    }

    pub fn set_mirror(&self, mirror: MirrorMode) -> PipelineResult<()> {
        self.update(move |_, stage| stage.mirror = mirror)
    }

    pub fn stats(&self) -> RendererStats {
        self.node
            .read_stage(|stage| match stage {
                Stage::Renderer(stage) => stage.stats,
                _ => RendererStats::default(),
            })
            .unwrap_or_default()
    }
}

impl Deref for SurfaceRenderer {
    type Target = PipelineNode;

    fn deref(&self) -> &PipelineNode {
        &self.node
    }
}

impl From<SurfaceRenderer> for PipelineNode {
    fn from(renderer: SurfaceRenderer) -> Self {
        renderer.node
    }
}
