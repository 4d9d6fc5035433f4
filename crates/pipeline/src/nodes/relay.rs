use std::ops::Deref;

use gpucontext::{ContextExecutor, GraphicsContext};

use super::{Callbacks, Deferred, Stage, StageOutput};
use crate::frame::Frame;
use crate::node::{NodeKind, PipelineNode};

/// Observer invoked with every frame passing a [`RelayNode`].
///
/// Runs on the executor thread with no pipeline lock held.
pub type TapCallback = Box<dyn FnMut(&GraphicsContext, &Frame) + Send>;

pub(crate) struct RelayStage {
    frames: u64,
}

impl RelayStage {
    pub(crate) fn process(&mut self, frame: Frame) -> StageOutput {
        self.frames += 1;
        StageOutput::forward(frame).with_deferred(Deferred::Tap(frame))
    }
}

/// Pass-through node. Removing it reconnects its parent to its child.
#[derive(Clone, Debug)]
pub struct RelayNode {
    node: PipelineNode,
}

impl RelayNode {
    pub fn new(executor: &ContextExecutor) -> Self {
        Self::build(executor, None, None)
    }

    pub fn named(executor: &ContextExecutor, label: impl Into<String>) -> Self {
        Self::build(executor, Some(label.into()), None)
    }

    pub fn with_tap<F>(executor: &ContextExecutor, tap: F) -> Self
    where
        F: FnMut(&GraphicsContext, &Frame) + Send + 'static,
    {
        Self::build(executor, None, Some(Box::new(tap)))
    }

    fn build(executor: &ContextExecutor, label: Option<String>, tap: Option<TapCallback>) -> Self {
        let stage = Stage::Relay(RelayStage { frames: 0 });
        let callbacks = tap.map(Callbacks::Tap);
        Self {
            node: PipelineNode::new(executor, NodeKind::Relay, label, stage, callbacks),
        }
    }

    pub fn node(&self) -> &PipelineNode {
        &self.node
    }

    /// Installs `tap`, replacing any previous one.
    pub fn set_tap<F>(&self, tap: F)
    where
        F: FnMut(&GraphicsContext, &Frame) + Send + 'static,
    {
        self.node.set_callbacks(Some(Callbacks::Tap(Box::new(tap))));
    }

    pub fn clear_tap(&self) {
        self.node.set_callbacks(None);
    }

    pub fn has_tap(&self) -> bool {
        self.node.has_callbacks()
    }

    pub fn frames(&self) -> u64 {
        self.node
            .read_stage(|stage| match stage {
                Stage::Relay(stage) => stage.frames,
                _ => 0,
            })
            .unwrap_or(0)
    }
}

impl Deref for RelayNode {
    type Target = PipelineNode;

    fn deref(&self) -> &PipelineNode {
        &self.node
    }
}

impl From<RelayNode> for PipelineNode {
    fn from(relay: RelayNode) -> Self {
        relay.node
    }
}
