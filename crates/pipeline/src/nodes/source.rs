//! Frame sources: a timed still image and an externally fed surface.

use std::ops::Deref;
use std::time::{Duration, Instant};

use gpucontext::matrix::Mat4;
use gpucontext::{ContextExecutor, GraphicsContext, OwnedTexture};
use image::RgbaImage;

use super::{ensure_texture, release_texture, Stage};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::node::{NodeKind, PipelineNode, WeakNode};
use crate::pacing::{interval_for_fps, Cadence};

pub const DEFAULT_SOURCE_FPS: f32 = 30.0;

pub(crate) struct ImageSourceStage {
    image: RgbaImage,
    texture: Option<OwnedTexture>,
    /// Set when `image` changed since the last upload.
    dirty: bool,
    cadence: Cadence,
    running: bool,
    generation: u64,
    delivered: u64,
}

impl ImageSourceStage {
    fn new(image: RgbaImage) -> Self {
        Self {
            image,
            texture: None,
            dirty: true,
            cadence: Cadence::new(default_period()),
            running: false,
            generation: 0,
            delivered: 0,
        }
    }

    fn next_frame(&mut self, ctx: &GraphicsContext, owner: &str) -> PipelineResult<Frame> {
        let (width, height) = self.image.dimensions();
        let texture = ensure_texture(ctx, &mut self.texture, width, height, owner)?;
        let id = texture.id();
        if self.dirty {
            ctx.write_texture(id, &self.image)?;
            self.dirty = false;
        }
        self.delivered += 1;
        Ok(Frame::new(id, width, height).with_feature_level(ctx.feature_level().is_high()))
    }

    fn halt(&mut self) {
        self.running = false;
        self.generation += 1;
    }

    pub(crate) fn release_resources(&mut self, ctx: &GraphicsContext, owner: &str) {
        self.halt();
        release_texture(ctx, &mut self.texture, owner);
        self.dirty = true;
    }
}

fn default_period() -> Duration {
    interval_for_fps(DEFAULT_SOURCE_FPS).unwrap_or(Duration::from_millis(33))
}

/// Redelivers one still image on a fixed timer.
#[derive(Clone, Debug)]
pub struct ImageSource {
    node: PipelineNode,
}

impl ImageSource {
    pub fn new(executor: &ContextExecutor, image: RgbaImage) -> Self {
        Self::build(executor, None, image)
    }

    pub fn named(executor: &ContextExecutor, label: impl Into<String>, image: RgbaImage) -> Self {
        Self::build(executor, Some(label.into()), image)
    }

    fn build(executor: &ContextExecutor, label: Option<String>, image: RgbaImage) -> Self {
        let stage = Stage::ImageSource(ImageSourceStage::new(image));
        Self {
            node: PipelineNode::new(executor, NodeKind::ImageSource, label, stage, None),
        }
    }

    pub fn node(&self) -> &PipelineNode {
        &self.node
    }

    fn update<T, F>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce(&GraphicsContext, &mut ImageSourceStage) -> PipelineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let label = self.node.label().to_owned();
        self.node.update_stage(move |ctx, stage| match stage {
            Stage::ImageSource(stage) => f(ctx, stage),
            _ => Err(PipelineError::Unsupported {
                node: label,
                operation: "image source control",
            }),
        })
    }

    /// Starts the timer; the first frame goes out immediately.
    pub fn start(&self) -> PipelineResult<()> {
        let node = self.node.clone();
        self.node.marshal(move |ctx| {
            let generation = {
                let mut guard = node.lock_stage()?;
                let Stage::ImageSource(stage) = &mut *guard else {
                    return Ok(());
                };
                if stage.running {
                    return Ok(());
                }
                stage.running = true;
                stage.generation += 1;
                stage.cadence.reset();
                stage.generation
            };
            tracing::debug!(node = %node.label(), "image source started");
            tick(ctx, node.downgrade(), generation);
            Ok(())
        })
    }

    pub fn stop(&self) -> PipelineResult<()> {
        self.update(|_, stage| {
            stage.halt();
            Ok(())
        })
    }

    pub fn is_running(&self) -> bool {
        self.node
            .read_stage(|stage| matches!(stage, Stage::ImageSource(s) if s.running))
            .unwrap_or(false)
    }

    /// Swaps the image; the next tick uploads it.
    pub fn set_image(&self, image: RgbaImage) -> PipelineResult<()> {
        self.update(move |_, stage| {
            stage.image = image;
            stage.dirty = true;
            Ok(())
        })
    }

    /// Changes the delivery rate; non-positive rates are rejected.
    pub fn set_fps(&self, fps: f32) -> PipelineResult<()> {
        let Some(period) = interval_for_fps(fps) else {
            return Err(PipelineError::Unsupported {
                node: self.node.label().to_owned(),
                operation: "non-positive frame rate",
            });
        };
        self.update(move |_, stage| {
            stage.cadence = Cadence::new(period);
            Ok(())
        })
    }

    pub fn delivered(&self) -> u64 {
        self.node
            .read_stage(|stage| match stage {
                Stage::ImageSource(stage) => stage.delivered,
                _ => 0,
            })
            .unwrap_or(0)
    }
}

/// Emits one frame and re-posts itself while the generation still matches.
fn tick(ctx: &GraphicsContext, weak: WeakNode, generation: u64) {
    let Some(node) = weak.upgrade() else {
        return;
    };
    let emitted = {
        let Ok(mut guard) = node.lock_stage() else {
            return;
        };
        let Stage::ImageSource(stage) = &mut *guard else {
            return;
        };
        if !stage.running || stage.generation != generation {
            return;
        }
        let frame = stage.next_frame(ctx, node.label());
        let delay = stage.cadence.next_delay(Instant::now());
        if frame.is_err() {
            stage.halt();
        }
        frame.map(|frame| (frame, delay))
    };
    let (frame, delay) = match emitted {
        Ok(emitted) => emitted,
        Err(err) => {
            tracing::warn!(node = %node.label(), error = %err, "image source stopped");
            return;
        }
    };

    node.deliver(ctx, frame);

    let scheduled = node.executor().submit_delayed(
        move |ctx| {
            tick(ctx, weak, generation);
            Ok(())
        },
        delay,
    );
    if let Err(err) = scheduled {
        tracing::debug!(node = %node.label(), error = %err, "image source timer ended");
    }
}

impl Deref for ImageSource {
    type Target = PipelineNode;

    fn deref(&self) -> &PipelineNode {
        &self.node
    }
}

impl From<ImageSource> for PipelineNode {
    fn from(source: ImageSource) -> Self {
        source.node
    }
}

pub(crate) struct SurfaceSourceStage {
    texture: Option<OwnedTexture>,
    last: Option<Frame>,
    pushes: u64,
}

impl SurfaceSourceStage {
    fn accept(
        &mut self,
        ctx: &GraphicsContext,
        image: &RgbaImage,
        transform: Option<Mat4>,
        owner: &str,
    ) -> PipelineResult<Frame> {
        let (width, height) = image.dimensions();
        let texture = ensure_texture(ctx, &mut self.texture, width, height, owner)?;
        let id = texture.id();
        ctx.write_texture(id, image)?;
        let mut frame = Frame::new(id, width, height)
            .with_feature_level(ctx.feature_level().is_high())
            .external();
        if let Some(transform) = transform {
            frame = frame.with_transform(transform);
        }
        self.last = Some(frame);
        self.pushes += 1;
        Ok(frame)
    }

    pub(crate) fn release_resources(&mut self, ctx: &GraphicsContext, owner: &str) {
        self.last = None;
        release_texture(ctx, &mut self.texture, owner);
    }
}

/// Source fed by an external producer; there is no timer.
#[derive(Clone, Debug)]
pub struct SurfaceSource {
    node: PipelineNode,
}

impl SurfaceSource {
    pub fn new(executor: &ContextExecutor) -> Self {
        Self::build(executor, None)
    }

    pub fn named(executor: &ContextExecutor, label: impl Into<String>) -> Self {
        Self::build(executor, Some(label.into()))
    }

    fn build(executor: &ContextExecutor, label: Option<String>) -> Self {
        let stage = Stage::SurfaceSource(SurfaceSourceStage {
            texture: None,
            last: None,
            pushes: 0,
        });
        Self {
            node: PipelineNode::new(executor, NodeKind::SurfaceSource, label, stage, None),
        }
    }

    pub fn node(&self) -> &PipelineNode {
        &self.node
    }

    /// Handle that external threads use to push pictures.
    pub fn producer(&self) -> FrameProducer {
        FrameProducer {
            node: self.node.downgrade(),
            executor: self.node.executor().clone(),
        }
    }

    pub fn pushes(&self) -> u64 {
        self.node
            .read_stage(|stage| match stage {
                Stage::SurfaceSource(stage) => stage.pushes,
                _ => 0,
            })
            .unwrap_or(0)
    }
}

impl Deref for SurfaceSource {
    type Target = PipelineNode;

    fn deref(&self) -> &PipelineNode {
        &self.node
    }
}

impl From<SurfaceSource> for PipelineNode {
    fn from(source: SurfaceSource) -> Self {
        source.node
    }
}

/// Cloneable push handle for a [`SurfaceSource`].
///
/// Holds only a weak reference, so a producer outliving its source turns
/// pushes into no-ops.
#[derive(Clone, Debug)]
pub struct FrameProducer {
    node: WeakNode,
    executor: ContextExecutor,
}

impl FrameProducer {
    /// Uploads `image` on the executor thread and forwards it as one frame.
    ///
    /// Returns once the push is queued.
    pub fn push_frame(&self, image: RgbaImage, transform: Option<Mat4>) -> PipelineResult<()> {
        let weak = self.node.clone();
        self.executor.submit(move |ctx| {
            let Some(node) = weak.upgrade() else {
                return Ok(());
            };
            let frame = {
                let mut guard = node.lock_stage()?;
                let Stage::SurfaceSource(stage) = &mut *guard else {
                    return Ok(());
                };
                stage.accept(ctx, &image, transform, node.label())?
            };
            node.deliver(ctx, frame);
            Ok(())
        })?;
        Ok(())
    }

    /// Redelivers the most recent picture, if any.
    pub fn signal(&self) -> PipelineResult<()> {
        let weak = self.node.clone();
        self.executor.submit(move |ctx| {
            let Some(node) = weak.upgrade() else {
                return Ok(());
            };
            let last = node
                .read_stage(|stage| match stage {
                    Stage::SurfaceSource(stage) => stage.last,
                    _ => None,
                })
                .flatten();
            if let Some(frame) = last {
                node.deliver(ctx, frame);
            }
            Ok(())
        })?;
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.node.upgrade().is_some()
    }
}
