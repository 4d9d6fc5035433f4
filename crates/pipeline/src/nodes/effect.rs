use std::ops::Deref;

use gpucontext::{
    ContextExecutor, DrawRequest, Effect, GraphicsContext, MirrorMode, OwnedTexture, Program,
};

use super::{ensure_texture, release_texture, Stage, StageOutput};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::node::{NodeKind, PipelineNode};

/// Output size reported before the first frame arrives.
pub const DEFAULT_EFFECT_SIZE: (u32, u32) = (512, 512);

pub(crate) struct EffectStage {
    program: Program,
    mirror: MirrorMode,
    target: Option<OwnedTexture>,
    rendered: u64,
}

impl EffectStage {
    pub(crate) fn process(&mut self, ctx: &GraphicsContext, frame: Frame, owner: &str) -> StageOutput {
        match self.render(ctx, &frame, owner) {
            Ok(output) => {
                self.rendered += 1;
                StageOutput::forward(output)
            }
            Err(err) => {
                tracing::warn!(node = owner, error = %err, "effect render failed; frame dropped");
                StageOutput::consume()
            }
        }
    }

    fn render(&mut self, ctx: &GraphicsContext, frame: &Frame, owner: &str) -> PipelineResult<Frame> {
        let target = ensure_texture(ctx, &mut self.target, frame.width, frame.height, owner)?.id();
        ctx.draw(&DrawRequest {
            source: frame.texture,
            target,
            tex_matrix: frame.transform,
            mvp: self.mirror.mvp(),
            program: self.program,
        })?;
        Ok(Frame::new(target, frame.width, frame.height)
            .with_feature_level(frame.high_feature_level))
    }

    fn output_size(&self) -> (u32, u32) {
        self.target
            .as_ref()
            .map(OwnedTexture::size)
            .unwrap_or(DEFAULT_EFFECT_SIZE)
    }

    pub(crate) fn release_resources(&mut self, ctx: &GraphicsContext, owner: &str) {
        release_texture(ctx, &mut self.target, owner);
    }
}

/// Re-renders each frame through a program into a private texture.
#[derive(Clone, Debug)]
pub struct EffectNode {
    node: PipelineNode,
}

impl EffectNode {
    pub fn new(executor: &ContextExecutor, effect: Effect) -> Self {
        Self::build(executor, None, effect)
    }

    pub fn named(executor: &ContextExecutor, label: impl Into<String>, effect: Effect) -> Self {
        Self::build(executor, Some(label.into()), effect)
    }

    /// Effect node that copies its input unchanged.
    pub fn passthrough(executor: &ContextExecutor) -> Self {
        Self::new(executor, Effect::Passthrough)
    }

    fn build(executor: &ContextExecutor, label: Option<String>, effect: Effect) -> Self {
        let stage = Stage::Effect(EffectStage {
            program: Program::new(effect),
            mirror: MirrorMode::Normal,
            target: None,
            rendered: 0,
        });
        Self {
            node: PipelineNode::new(executor, NodeKind::Effect, label, stage, None),
        }
    }

    pub fn node(&self) -> &PipelineNode {
        &self.node
    }

    fn update<T, F>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce(&mut EffectStage) -> T + Send + 'static,
        T: Send + 'static,
    {
        let label = self.node.label().to_owned();
        self.node.update_stage(move |_, stage| match stage {
            Stage::Effect(stage) => Ok(f(stage)),
            _ => Err(PipelineError::Unsupported {
                node: label,
                operation: "effect control",
            }),
        })
    }

    fn read<T>(&self, read: impl FnOnce(&EffectStage) -> T) -> Option<T> {
        self.node
            .read_stage(|stage| match stage {
                Stage::Effect(stage) => Some(read(stage)),
                _ => None,
            })
            .flatten()
    }

    /// Switches program, keeping the current parameters.
    pub fn set_effect(&self, effect: Effect) -> PipelineResult<()> {
        self.update(move |stage| stage.program.effect = effect)
    }

    /// Selects a built-in program by its numeric index.
    pub fn set_effect_index(&self, index: u32) -> PipelineResult<()> {
        let effect = Effect::from_index(index).ok_or_else(|| PipelineError::Unsupported {
            node: self.node.label().to_owned(),
            operation: "unknown effect index",
        })?;
        self.set_effect(effect)
    }

    pub fn effect(&self) -> Effect {
        self.read(|stage| stage.program.effect)
            .unwrap_or(Effect::Passthrough)
    }

    /// Sets the program's parameter array (a row-major 4×5 color matrix).
    pub fn set_params(&self, params: Vec<f32>) -> PipelineResult<()> {
        self.update(move |stage| stage.program.set_params(&params))
    }

    pub fn set_mirror(&self, mirror: MirrorMode) -> PipelineResult<()> {
        self.update(move |stage| stage.mirror = mirror)
    }

    pub fn mirror(&self) -> MirrorMode {
        self.read(|stage| stage.mirror).unwrap_or_default()
    }

    pub fn output_size(&self) -> (u32, u32) {
        self.read(EffectStage::output_size)
            .unwrap_or(DEFAULT_EFFECT_SIZE)
    }

    pub fn rendered(&self) -> u64 {
        self.read(|stage| stage.rendered).unwrap_or(0)
    }
}

impl Deref for EffectNode {
    type Target = PipelineNode;

    fn deref(&self) -> &PipelineNode {
        &self.node
    }
}

impl From<EffectNode> for PipelineNode {
    fn from(effect: EffectNode) -> Self {
        effect.node
    }
}
