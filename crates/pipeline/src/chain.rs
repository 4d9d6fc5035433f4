//! Link bookkeeping for node chains.
//!
//! Mutating functions here run on the executor thread of the nodes involved;
//! the public wrappers on [`PipelineNode`] marshal there first. At most one
//! node's link lock is held at any time.

use gpucontext::GraphicsContext;

use crate::error::{integrity_violation, PipelineError, PipelineResult};
use crate::node::{Downstream, PipelineNode};

/// Upper bound on chain walks; longer chains are treated as corrupt.
const MAX_CHAIN_WALK: usize = 4096;

/// Validates that `child` may become a successor of `parent`.
pub(crate) fn check_link(parent: &PipelineNode, child: &PipelineNode) -> PipelineResult<()> {
    if parent == child {
        return Err(integrity_violation(format!(
            "node '{}' cannot be its own downstream",
            parent.label()
        )));
    }
    if parent.executor() != child.executor() {
        return Err(integrity_violation(format!(
            "nodes '{}' ({}) and '{}' ({}) belong to different executors",
            parent.label(),
            parent.executor().name(),
            child.label(),
            child.executor().name()
        )));
    }
    let mut cursor = parent.parent();
    let mut steps = 0;
    while let Some(ancestor) = cursor {
        if &ancestor == child {
            return Err(integrity_violation(format!(
                "linking '{}' after '{}' would create a cycle",
                child.label(),
                parent.label()
            )));
        }
        steps += 1;
        if steps > MAX_CHAIN_WALK {
            return Err(integrity_violation(format!(
                "chain above '{}' exceeds {MAX_CHAIN_WALK} nodes",
                parent.label()
            )));
        }
        cursor = ancestor.parent();
    }
    Ok(())
}

/// Drops `child` from `parent`'s successors, returning the slot it held.
fn forget_child(parent: &PipelineNode, child: &PipelineNode) -> Option<usize> {
    let mut links = parent.links();
    match &mut links.downstream {
        Downstream::Single(slot) => {
            if slot.as_ref() == Some(child) {
                *slot = None;
                Some(0)
            } else {
                None
            }
        }
        Downstream::Fanout(children) => {
            let index = children.iter().position(|candidate| candidate == child)?;
            children.remove(index);
            Some(index)
        }
    }
}

/// Makes `child` a successor of `parent` at `index` (fan-out) or as the
/// single successor.
fn adopt(parent: &PipelineNode, child: &PipelineNode, index: usize) -> Option<PipelineNode> {
    let displaced = {
        let mut links = parent.links();
        match &mut links.downstream {
            Downstream::Single(slot) => slot.replace(child.clone()),
            Downstream::Fanout(children) => {
                let index = index.min(children.len());
                children.insert(index, child.clone());
                None
            }
        }
    };
    child.set_parent(Some(parent));
    displaced
}

/// Takes every successor out of `node`, leaving it without downstream links.
fn take_downstream(node: &PipelineNode) -> Vec<PipelineNode> {
    let mut links = node.links();
    match &mut links.downstream {
        Downstream::Single(slot) => slot.take().into_iter().collect(),
        Downstream::Fanout(children) => std::mem::take(children),
    }
}

/// Moves `child` away from whatever parent it currently has.
fn reparent_from_previous(child: &PipelineNode) {
    if let Some(previous) = child.parent() {
        forget_child(&previous, child);
        child.set_parent(None);
    }
}

fn terminal(node: &PipelineNode) -> PipelineError {
    PipelineError::Terminal(node.label().to_owned())
}

/// Replaces `parent`'s successors with `child`.
pub(crate) fn link(
    ctx: &GraphicsContext,
    parent: &PipelineNode,
    child: Option<&PipelineNode>,
) -> PipelineResult<()> {
    if parent.kind().is_terminal() {
        return match child {
            Some(_) => Err(terminal(parent)),
            None => Ok(()),
        };
    }
    if let Some(child) = child {
        check_link(parent, child)?;
        if parent.children().as_slice() == std::slice::from_ref(child) {
            return Ok(());
        }
        if !child.is_child_of(parent) {
            reparent_from_previous(child);
        }
    }

    let previous = take_downstream(parent);
    for old in previous {
        if Some(&old) == child {
            continue;
        }
        old.set_parent(None);
        old.release_resources(ctx);
        tracing::debug!(parent = %parent.label(), node = %old.label(), "replaced downstream node");
    }
    if let Some(child) = child {
        adopt(parent, child, 0);
        tracing::debug!(parent = %parent.label(), node = %child.label(), "linked downstream node");
    }
    Ok(())
}

/// Detaches `node` from its parent. Returns `false` when it had none.
///
/// With `heal`, the parent adopts the node's own successor in the slot the
/// node occupied. The detached node releases its private GPU resources.
pub(crate) fn detach(ctx: &GraphicsContext, node: &PipelineNode, heal: bool) -> PipelineResult<bool> {
    let Some(parent) = node.parent() else {
        return Ok(false);
    };
    let Some(index) = forget_child(&parent, node) else {
        node.set_parent(None);
        return Err(integrity_violation(format!(
            "node '{}' names '{}' as parent but is not among its successors",
            node.label(),
            parent.label()
        )));
    };
    node.set_parent(None);

    if heal {
        for successor in take_downstream(node) {
            successor.set_parent(None);
            if let Some(displaced) = adopt(&parent, &successor, index) {
                displaced.set_parent(None);
            }
            tracing::debug!(
                context = %ctx.label(),
                parent = %parent.label(),
                node = %successor.label(),
                "healed chain around removed node"
            );
        }
    }
    node.release_resources(ctx);
    tracing::debug!(context = %ctx.label(), node = %node.label(), parent = %parent.label(), "detached node");
    Ok(true)
}

/// Attaches `node` after the tail of the chain containing `any`.
pub fn append(any: &PipelineNode, node: &PipelineNode) -> PipelineResult<()> {
    let tail = find_tail(any);
    if tail.kind().is_terminal() {
        return Err(terminal(&tail));
    }
    tail.set_downstream(Some(node))
}

/// Inserts a free `node` directly after `existing`.
///
/// On a distributor the node becomes an additional child. Otherwise it takes
/// over `existing`'s successor as its own.
pub fn splice_after(existing: &PipelineNode, node: &PipelineNode) -> PipelineResult<()> {
    if node.parent().is_some() || !node.children().is_empty() {
        return Err(integrity_violation(format!(
            "node '{}' must be detached before it can be spliced",
            node.label()
        )));
    }
    check_link(existing, node)?;
    let existing_node = existing.clone();
    let inserted = node.clone();
    existing.marshal(move |_ctx| {
        let existing = existing_node;
        if existing.kind().is_terminal() {
            return Err(terminal(&existing));
        }
        if existing.kind().is_fanout() {
            adopt(&existing, &inserted, usize::MAX);
            return Ok(());
        }
        let successor = existing.downstream();
        if successor.is_some() && inserted.kind().is_terminal() {
            return Err(terminal(&inserted));
        }
        if let Some(successor) = &successor {
            forget_child(&existing, successor);
        }
        adopt(&existing, &inserted, 0);
        if let Some(successor) = successor {
            adopt(&inserted, &successor, 0);
        }
        tracing::debug!(after = %existing.label(), node = %inserted.label(), "spliced node");
        Ok(())
    })
}

/// Removes `node` and reconnects its parent to its successor.
pub fn unlink(node: &PipelineNode) -> PipelineResult<()> {
    let target = node.clone();
    node.marshal(move |ctx| detach(ctx, &target, true).map(|_| ()))
}

/// Adds `child` to a fan-out node without disturbing its other children.
pub(crate) fn add_child(parent: &PipelineNode, child: &PipelineNode) -> PipelineResult<()> {
    check_link(parent, child)?;
    let parent_node = parent.clone();
    let child = child.clone();
    parent.marshal(move |_ctx| {
        check_link(&parent_node, &child)?;
        if child.is_child_of(&parent_node) {
            return Ok(());
        }
        reparent_from_previous(&child);
        adopt(&parent_node, &child, usize::MAX);
        Ok(())
    })
}

/// Drops `child` from a fan-out node and releases its private resources.
/// Returns whether it was a child.
pub(crate) fn remove_child(parent: &PipelineNode, child: &PipelineNode) -> PipelineResult<bool> {
    let parent_node = parent.clone();
    let child = child.clone();
    parent.marshal(move |ctx| {
        if !child.is_child_of(&parent_node) {
            return Ok(false);
        }
        let removed = forget_child(&parent_node, &child).is_some();
        child.set_parent(None);
        child.release_resources(ctx);
        Ok(removed)
    })
}

pub fn find_head(node: &PipelineNode) -> PipelineNode {
    let mut head = node.clone();
    for _ in 0..MAX_CHAIN_WALK {
        match head.parent() {
            Some(parent) => head = parent,
            None => return head,
        }
    }
    tracing::warn!(node = %node.label(), "head search hit the walk limit");
    head
}

/// Last node reached by following `downstream()` links.
pub fn find_tail(node: &PipelineNode) -> PipelineNode {
    let mut tail = node.clone();
    for _ in 0..MAX_CHAIN_WALK {
        match tail.downstream() {
            Some(next) => tail = next,
            None => return tail,
        }
    }
    tracing::warn!(node = %node.label(), "tail search hit the walk limit");
    tail
}

/// Nodes from `head` to the tail, in delivery order.
pub fn walk(head: &PipelineNode) -> Vec<PipelineNode> {
    let mut nodes = vec![head.clone()];
    let mut cursor = head.downstream();
    while let Some(node) = cursor {
        if nodes.len() >= MAX_CHAIN_WALK {
            break;
        }
        cursor = node.downstream();
        nodes.push(node);
    }
    nodes
}
