use std::ops::Deref;

use gpucontext::ContextExecutor;

use super::{Stage, StageOutput};
use crate::chain;
use crate::error::PipelineResult;
use crate::frame::Frame;
use crate::node::{NodeKind, PipelineNode};

pub(crate) struct DistributorStage {
    deliveries: u64,
}

impl DistributorStage {
    pub(crate) fn process(&mut self, frame: Frame) -> StageOutput {
        self.deliveries += 1;
        StageOutput::forward(frame)
    }
}

/// Delivers every frame to each attached child, in insertion order.
///
/// Children share the incoming texture and must treat it as read-only.
#[derive(Clone, Debug)]
pub struct Distributor {
    node: PipelineNode,
}

impl Distributor {
    pub fn new(executor: &ContextExecutor) -> Self {
        Self::build(executor, None)
    }

    pub fn named(executor: &ContextExecutor, label: impl Into<String>) -> Self {
        Self::build(executor, Some(label.into()))
    }

    fn build(executor: &ContextExecutor, label: Option<String>) -> Self {
        let stage = Stage::Distributor(DistributorStage { deliveries: 0 });
        Self {
            node: PipelineNode::new(executor, NodeKind::Distributor, label, stage, None),
        }
    }

    pub fn node(&self) -> &PipelineNode {
        &self.node
    }

    /// Appends `child` to the set, moving it from any previous parent.
    pub fn add_child(&self, child: &PipelineNode) -> PipelineResult<()> {
        chain::add_child(&self.node, child)
    }

    pub fn remove_child(&self, child: &PipelineNode) -> PipelineResult<bool> {
        chain::remove_child(&self.node, child)
    }

    pub fn deliveries(&self) -> u64 {
        self.node
            .read_stage(|stage| match stage {
                Stage::Distributor(stage) => stage.deliveries,
                _ => 0,
            })
            .unwrap_or(0)
    }
}

impl Deref for Distributor {
    type Target = PipelineNode;

    fn deref(&self) -> &PipelineNode {
        &self.node
    }
}

impl From<Distributor> for PipelineNode {
    fn from(distributor: Distributor) -> Self {
        distributor.node
    }
}
