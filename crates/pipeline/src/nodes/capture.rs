//! On-demand readback of frames into CPU memory.

use std::ops::Deref;
use std::time::Duration;

use gpucontext::matrix;
use gpucontext::{
    ContextExecutor, DrawRequest, GraphicsContext, OwnedTexture, Program, ReadbackError,
};
use image::RgbaImage;

use super::{ensure_texture, release_texture, Callbacks, Deferred, Stage, StageOutput};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::node::{NodeKind, PipelineNode};

/// Success and failure handlers of a [`CaptureNode`].
///
/// Both run on the executor thread after the node's state is unlocked, so
/// they may trigger, remove or reconfigure the node.
pub struct CaptureCallbacks {
    pub on_captured: Box<dyn FnMut(RgbaImage) + Send>,
    pub on_error: Box<dyn FnMut(ReadbackError) + Send>,
}

impl CaptureCallbacks {
    pub fn new<C, E>(on_captured: C, on_error: E) -> Self
    where
        C: FnMut(RgbaImage) + Send + 'static,
        E: FnMut(ReadbackError) + Send + 'static,
    {
        Self {
            on_captured: Box::new(on_captured),
            on_error: Box::new(on_error),
        }
    }

    /// Captures only; failures are logged by the node and otherwise dropped.
    pub fn on_captured<C>(on_captured: C) -> Self
    where
        C: FnMut(RgbaImage) + Send + 'static,
    {
        Self::new(on_captured, |_| {})
    }
}

struct Burst {
    remaining: u32,
    interval: Duration,
}

/// Re-arm request handed from the stage to its node after a burst capture.
pub(crate) struct Rearm {
    interval: Duration,
    generation: u64,
}

pub(crate) struct CaptureStage {
    armed: bool,
    countdown: Option<u64>,
    burst: Option<Burst>,
    /// Bumped on every cancel so stale re-arm timers become no-ops.
    generation: u64,
    frames_seen: u64,
    captures: u64,
    target: Option<OwnedTexture>,
}

impl CaptureStage {
    fn new() -> Self {
        Self {
            armed: false,
            countdown: None,
            burst: None,
            generation: 0,
            frames_seen: 0,
            captures: 0,
            target: None,
        }
    }

    fn is_outstanding(&self) -> bool {
        self.armed || self.countdown.is_some() || self.burst.is_some()
    }

    fn cancel(&mut self) {
        self.armed = false;
        self.countdown = None;
        self.burst = None;
        self.generation += 1;
    }

    pub(crate) fn process(&mut self, ctx: &GraphicsContext, frame: Frame, owner: &str) -> StageOutput {
        self.frames_seen += 1;
        if let Some(remaining) = self.countdown {
            if remaining <= 1 {
                self.countdown = None;
                self.armed = true;
            } else {
                self.countdown = Some(remaining - 1);
            }
        }
        if !self.armed {
            return StageOutput::forward(frame);
        }
        self.armed = false;

        match self.read(ctx, &frame, owner) {
            Ok(image) => {
                self.captures += 1;
                let rearm = self.advance_burst();
                StageOutput::forward(frame).with_deferred(Deferred::Captured { image, rearm })
            }
            Err(err) => {
                self.cancel();
                StageOutput::forward(frame).with_deferred(Deferred::CaptureFailed(err))
            }
        }
    }

    fn advance_burst(&mut self) -> Option<Rearm> {
        let burst = self.burst.as_mut()?;
        burst.remaining = burst.remaining.saturating_sub(1);
        if burst.remaining == 0 {
            self.burst = None;
            return None;
        }
        Some(Rearm {
            interval: burst.interval,
            generation: self.generation,
        })
    }

    /// Copies the frame's pixels out, resolving a non-identity transform
    /// through a private texture first.
    fn read(&mut self, ctx: &GraphicsContext, frame: &Frame, owner: &str) -> Result<RgbaImage, ReadbackError> {
        if frame.has_identity_transform() {
            return ctx.read_texture(frame.texture);
        }
        let target = ensure_texture(ctx, &mut self.target, frame.width, frame.height, owner)?.id();
        ctx.draw(&DrawRequest {
            source: frame.texture,
            target,
            tex_matrix: frame.transform,
            mvp: matrix::IDENTITY,
            program: Program::default(),
        })?;
        ctx.read_texture(target)
    }

    pub(crate) fn release_resources(&mut self, ctx: &GraphicsContext, owner: &str) {
        self.cancel();
        release_texture(ctx, &mut self.target, owner);
    }
}

/// Arms the next burst capture once `rearm.interval` has passed.
pub(crate) fn schedule_rearm(node: &PipelineNode, rearm: Rearm) {
    let weak = node.downgrade();
    let Rearm {
        interval,
        generation,
    } = rearm;
    let scheduled = node.executor().submit_delayed(
        move |_ctx| {
            let Some(node) = weak.upgrade() else {
                return Ok(());
            };
            let mut guard = node.lock_stage()?;
            if let Stage::Capture(stage) = &mut *guard {
                if stage.generation == generation && stage.burst.is_some() {
                    stage.armed = true;
                }
            }
            Ok(())
        },
        interval,
    );
    if let Err(err) = scheduled {
        tracing::debug!(node = %node.label(), error = %err, "burst re-arm not scheduled");
    }
}

/// Forwards frames unchanged and copies selected ones to the CPU.
#[derive(Clone, Debug)]
pub struct CaptureNode {
    node: PipelineNode,
}

impl CaptureNode {
    pub fn new(executor: &ContextExecutor, callbacks: CaptureCallbacks) -> Self {
        Self::build(executor, None, callbacks)
    }

    pub fn named(
        executor: &ContextExecutor,
        label: impl Into<String>,
        callbacks: CaptureCallbacks,
    ) -> Self {
        Self::build(executor, Some(label.into()), callbacks)
    }

    fn build(executor: &ContextExecutor, label: Option<String>, callbacks: CaptureCallbacks) -> Self {
        let stage = Stage::Capture(CaptureStage::new());
        Self {
            node: PipelineNode::new(
                executor,
                NodeKind::Capture,
                label,
                stage,
                Some(Callbacks::Capture(callbacks)),
            ),
        }
    }

    pub fn node(&self) -> &PipelineNode {
        &self.node
    }

    pub fn set_callbacks(&self, callbacks: CaptureCallbacks) {
        self.node.set_callbacks(Some(Callbacks::Capture(callbacks)));
    }

    fn update<T, F>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce(&mut CaptureStage) -> T + Send + 'static,
        T: Send + 'static,
    {
        let label = self.node.label().to_owned();
        self.node.update_stage(move |_, stage| match stage {
            Stage::Capture(stage) => Ok(f(stage)),
            _ => Err(PipelineError::Unsupported {
                node: label,
                operation: "capture control",
            }),
        })
    }

    /// Arms a single capture of the next frame.
    ///
    /// Returns `false` when a request is already outstanding.
    pub fn trigger(&self) -> PipelineResult<bool> {
        self.update(|stage| {
            if stage.is_outstanding() {
                return false;
            }
            stage.armed = true;
            true
        })
    }

    /// Captures `count` frames, re-arming `interval` after each capture.
    pub fn trigger_burst(&self, count: u32, interval: Duration) -> PipelineResult<bool> {
        if count == 0 {
            return Ok(false);
        }
        self.update(move |stage| {
            if stage.is_outstanding() {
                return false;
            }
            stage.generation += 1;
            stage.armed = true;
            if count > 1 {
                stage.burst = Some(Burst {
                    remaining: count,
                    interval,
                });
            }
            true
        })
    }

    /// Captures the `frames`-th delivery from now; zero means the next one.
    pub fn trigger_after_frames(&self, frames: u64) -> PipelineResult<bool> {
        self.update(move |stage| {
            if stage.is_outstanding() {
                return false;
            }
            if frames <= 1 {
                stage.armed = true;
            } else {
                stage.countdown = Some(frames);
            }
            true
        })
    }

    /// Drops any armed capture, countdown or burst.
    pub fn cancel(&self) -> PipelineResult<()> {
        self.update(CaptureStage::cancel)
    }

    pub fn is_outstanding(&self) -> bool {
        self.read(CaptureStage::is_outstanding).unwrap_or(false)
    }

    pub fn frames_seen(&self) -> u64 {
        self.read(|stage| stage.frames_seen).unwrap_or(0)
    }

    pub fn captures(&self) -> u64 {
        self.read(|stage| stage.captures).unwrap_or(0)
    }

    fn read<T>(&self, read: impl FnOnce(&CaptureStage) -> T) -> Option<T> {
        self.node
            .read_stage(|stage| match stage {
                Stage::Capture(stage) => Some(read(stage)),
                _ => None,
            })
            .flatten()
    }
}

impl Deref for CaptureNode {
    type Target = PipelineNode;

    fn deref(&self) -> &PipelineNode {
        &self.node
    }
}

impl From<CaptureNode> for PipelineNode {
    fn from(capture: CaptureNode) -> Self {
        capture.node
    }
}
