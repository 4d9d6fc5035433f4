//! The generic pipeline node and frame delivery.
//!
//! A node is a reference-counted handle. Parents hold strong references to
//! their children and children hold weak references back, so a chain lives
//! as long as its head does. Links and stage state sit behind separate locks;
//! neither is held while a frame is forwarded or a user callback runs, which
//! lets a node remove itself (or anything else) from inside a delivery.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use gpucontext::{ContextExecutor, GraphicsContext};

use crate::chain;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::nodes::{Callbacks, Deferred, Stage};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    ImageSource,
    SurfaceSource,
    Distributor,
    Capture,
    Relay,
    Effect,
    Renderer,
}

impl NodeKind {
    pub fn name(self) -> &'static str {
        match self {
            NodeKind::ImageSource => "image-source",
            NodeKind::SurfaceSource => "surface-source",
            NodeKind::Distributor => "distributor",
            NodeKind::Capture => "capture",
            NodeKind::Relay => "relay",
            NodeKind::Effect => "effect",
            NodeKind::Renderer => "renderer",
        }
    }

    pub fn is_fanout(self) -> bool {
        matches!(self, NodeKind::Distributor)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, NodeKind::Renderer)
    }

    pub fn is_source(self) -> bool {
        matches!(self, NodeKind::ImageSource | NodeKind::SurfaceSource)
    }

    /// Whether `remove()` stitches the parent to this node's child.
    pub fn heals_on_remove(self) -> bool {
        matches!(self, NodeKind::Relay)
    }
}

pub(crate) enum Downstream {
    Single(Option<PipelineNode>),
    Fanout(Vec<PipelineNode>),
}

pub(crate) struct Links {
    pub(crate) parent: Option<Weak<NodeInner>>,
    pub(crate) downstream: Downstream,
}

pub(crate) struct NodeInner {
    id: u64,
    label: String,
    kind: NodeKind,
    executor: ContextExecutor,
    enabled: AtomicBool,
    links: Mutex<Links>,
    stage: Mutex<Stage>,
    callbacks: Mutex<Option<Callbacks>>,
}

/// Shared handle to one stage of a pipeline chain.
#[derive(Clone)]
pub struct PipelineNode {
    inner: Arc<NodeInner>,
}

/// Non-owning node handle, for callbacks and timers that must not keep a
/// node alive.
#[derive(Clone)]
pub struct WeakNode {
    inner: Weak<NodeInner>,
}

impl WeakNode {
    pub fn upgrade(&self) -> Option<PipelineNode> {
        self.inner.upgrade().map(|inner| PipelineNode { inner })
    }
}

impl fmt::Debug for WeakNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(node) => write!(f, "WeakNode({})", node.label()),
            None => f.write_str("WeakNode(<dropped>)"),
        }
    }
}

impl PipelineNode {
    pub(crate) fn new(
        executor: &ContextExecutor,
        kind: NodeKind,
        label: Option<String>,
        stage: Stage,
        callbacks: Option<Callbacks>,
    ) -> Self {
        let id = NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed);
        let downstream = if kind.is_fanout() {
            Downstream::Fanout(Vec::new())
        } else {
            Downstream::Single(None)
        };
        Self {
            inner: Arc::new(NodeInner {
                id,
                label: label.unwrap_or_else(|| format!("{}-{id}", kind.name())),
                kind,
                executor: executor.clone(),
                enabled: AtomicBool::new(true),
                links: Mutex::new(Links {
                    parent: None,
                    downstream,
                }),
                stage: Mutex::new(stage),
                callbacks: Mutex::new(callbacks),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn kind(&self) -> NodeKind {
        self.inner.kind
    }

    pub fn executor(&self) -> &ContextExecutor {
        &self.inner.executor
    }

    pub fn downgrade(&self) -> WeakNode {
        WeakNode {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// A disabled node forwards frames untouched without running its stage.
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Release);
    }

    pub(crate) fn links(&self) -> MutexGuard<'_, Links> {
        // Link updates never panic while holding the lock, so a poisoned
        // mutex still holds consistent links.
        self.inner
            .links
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn lock_stage(&self) -> PipelineResult<MutexGuard<'_, Stage>> {
        self.inner.stage.lock().map_err(|_| {
            PipelineError::ChainIntegrity(format!("stage of node '{}' is poisoned", self.label()))
        })
    }

    /// Reads stage state from any thread without marshalling.
    pub(crate) fn read_stage<T>(&self, read: impl FnOnce(&Stage) -> T) -> Option<T> {
        self.inner.stage.lock().ok().map(|stage| read(&stage))
    }

    /// Runs `f` on the executor thread and waits for its result.
    pub(crate) fn marshal<T, F>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce(&GraphicsContext) -> PipelineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        self.inner.executor.call(f)?
    }

    /// Runs `f` against this node's stage on the executor thread.
    pub(crate) fn update_stage<T, F>(&self, f: F) -> PipelineResult<T>
    where
        F: FnOnce(&GraphicsContext, &mut Stage) -> PipelineResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let node = self.clone();
        self.marshal(move |ctx| {
            let mut stage = node.lock_stage()?;
            f(ctx, &mut stage)
        })
    }

    pub(crate) fn set_callbacks(&self, callbacks: Option<Callbacks>) {
        if let Ok(mut slot) = self.inner.callbacks.lock() {
            *slot = callbacks;
        }
    }

    pub(crate) fn has_callbacks(&self) -> bool {
        self.inner
            .callbacks
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Invokes the node's callbacks with no lock held.
    ///
    /// The table is taken out for the duration of the call, so a callback may
    /// replace it; a replacement wins over the table being put back.
    fn with_callbacks(&self, invoke: impl FnOnce(&mut Callbacks)) {
        let taken = self
            .inner
            .callbacks
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        let Some(mut callbacks) = taken else {
            return;
        };
        invoke(&mut callbacks);
        if let Ok(mut slot) = self.inner.callbacks.lock() {
            if slot.is_none() {
                *slot = Some(callbacks);
            }
        }
    }

    pub fn parent(&self) -> Option<PipelineNode> {
        self.links()
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| PipelineNode { inner })
    }

    pub fn is_attached(&self) -> bool {
        self.parent().is_some()
    }

    /// The single logical successor; a distributor reports its first child.
    pub fn downstream(&self) -> Option<PipelineNode> {
        match &self.links().downstream {
            Downstream::Single(child) => child.clone(),
            Downstream::Fanout(children) => children.first().cloned(),
        }
    }

    /// Every node this one currently forwards to.
    pub fn children(&self) -> Vec<PipelineNode> {
        match &self.links().downstream {
            Downstream::Single(child) => child.iter().cloned().collect(),
            Downstream::Fanout(children) => children.clone(),
        }
    }

    pub(crate) fn is_child_of(&self, parent: &PipelineNode) -> bool {
        self.links()
            .parent
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), Arc::as_ptr(&parent.inner)))
    }

    pub(crate) fn set_parent(&self, parent: Option<&PipelineNode>) {
        self.links().parent = parent.map(|parent| Arc::downgrade(&parent.inner));
    }

    pub fn find_head(&self) -> PipelineNode {
        chain::find_head(self)
    }

    pub fn find_tail(&self) -> PipelineNode {
        chain::find_tail(self)
    }

    /// Replaces this node's successor.
    ///
    /// The previous successor is detached (keeping its own downstream link)
    /// and releases its private GPU resources. A node attached elsewhere is
    /// moved here. On a distributor this replaces the whole child set.
    pub fn set_downstream(&self, node: Option<&PipelineNode>) -> PipelineResult<()> {
        if let Some(child) = node {
            chain::check_link(self, child)?;
        }
        let parent = self.clone();
        let child = node.cloned();
        self.marshal(move |ctx| chain::link(ctx, &parent, child.as_ref()))
    }

    /// Attaches `node` at the tail of the chain this node belongs to.
    pub fn append(&self, node: &PipelineNode) -> PipelineResult<()> {
        chain::append(self, node)
    }

    /// Detaches this node from its parent.
    ///
    /// The parent is left without a successor unless this node heals on
    /// removal (relays), in which case the parent adopts this node's child.
    /// Private GPU resources are released; a non-healing node keeps its own
    /// successor.
    pub fn remove(&self) -> PipelineResult<()> {
        let node = self.clone();
        let heal = self.kind().heals_on_remove();
        self.marshal(move |ctx| chain::detach(ctx, &node, heal).map(|_| ()))
    }

    /// Releases private GPU resources and stops timers without detaching.
    pub fn dispose(&self) -> PipelineResult<()> {
        let node = self.clone();
        self.marshal(move |ctx| {
            node.release_resources(ctx);
            Ok(())
        })
    }

    pub(crate) fn release_resources(&self, ctx: &GraphicsContext) {
        match self.inner.stage.lock() {
            Ok(mut stage) => stage.release_resources(ctx, self.label()),
            Err(_) => tracing::warn!(node = %self.label(), "cannot release resources of poisoned stage"),
        }
    }

    /// Delivers a frame to this node on the executor thread.
    ///
    /// The texture id in `frame` must not be used after this call returns.
    pub fn on_frame_available(&self, ctx: &GraphicsContext, frame: Frame) {
        if !ctx.is_owner_thread() {
            tracing::warn!(node = %self.label(), "frame delivered off the executor thread; dropped");
            return;
        }
        let forward = if self.is_enabled() {
            self.run_stage(ctx, frame)
        } else {
            Some(frame)
        };
        if let Some(frame) = forward {
            self.deliver(ctx, frame);
        }
    }

    fn run_stage(&self, ctx: &GraphicsContext, frame: Frame) -> Option<Frame> {
        let output = match self.inner.stage.lock() {
            Ok(mut stage) => stage.process(ctx, frame, self.label()),
            Err(_) => {
                tracing::warn!(node = %self.label(), "stage poisoned; dropping frame");
                return None;
            }
        };
        if let Some(deferred) = output.deferred {
            self.dispatch(ctx, deferred);
        }
        output.forward
    }

    fn dispatch(&self, ctx: &GraphicsContext, deferred: Deferred) {
        match deferred {
            Deferred::Captured { image, rearm } => {
                if let Some(rearm) = rearm {
                    crate::nodes::capture::schedule_rearm(self, rearm);
                }
                self.with_callbacks(|callbacks| match callbacks {
                    Callbacks::Capture(capture) => (capture.on_captured)(image),
                    Callbacks::Tap(_) => {}
                });
            }
            Deferred::CaptureFailed(err) => {
                tracing::warn!(node = %self.label(), error = %err, "capture readback failed");
                self.with_callbacks(|callbacks| match callbacks {
                    Callbacks::Capture(capture) => (capture.on_error)(err),
                    Callbacks::Tap(_) => {}
                });
            }
            Deferred::Tap(frame) => {
                self.with_callbacks(|callbacks| match callbacks {
                    Callbacks::Tap(tap) => tap(ctx, &frame),
                    Callbacks::Capture(_) => {}
                });
            }
        }
    }

    /// Forwards `frame` to the current successors.
    ///
    /// Targets are snapshotted first; a distributor child that removed itself
    /// earlier in the same delivery is skipped.
    pub(crate) fn deliver(&self, ctx: &GraphicsContext, frame: Frame) {
        let targets = self.children();
        let fanout = self.kind().is_fanout();
        for child in targets {
            if fanout && !child.is_child_of(self) {
                continue;
            }
            child.on_frame_available(ctx, frame);
        }
    }
}

impl PartialEq for PipelineNode {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for PipelineNode {}

impl fmt::Debug for PipelineNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineNode")
            .field("id", &self.id())
            .field("label", &self.label())
            .field("kind", &self.kind())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
