//! Dedicated worker thread that owns one [`GraphicsContext`].
//!
//! The executor is the only way to run GPU work. Tasks submitted from other
//! threads are queued and run in submission order on the worker; tasks
//! submitted from the worker itself run immediately, so a task may freely
//! call back into the executor. Failures are caught at the task boundary and
//! logged, and never stop the worker.

use std::any::Any;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use anyhow::anyhow;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};

use crate::backend::SharedContext;
use crate::bringup;
use crate::context::GraphicsContext;
use crate::errors::{ContextError, ContextResult};
use crate::types::ExecutorConfig;

type Task = Box<dyn FnOnce(&GraphicsContext) -> anyhow::Result<()> + Send + 'static>;

/// Lifecycle of an executor. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExecutorState {
    Created = 0,
    Initializing = 1,
    Ready = 2,
    Released = 3,
}

impl ExecutorState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ExecutorState::Created,
            1 => ExecutorState::Initializing,
            2 => ExecutorState::Ready,
            _ => ExecutorState::Released,
        }
    }
}

enum Command {
    Run(Task),
    Delayed(DelayedTask),
    Shutdown,
}

struct DelayedTask {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for DelayedTask {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for DelayedTask {}

impl PartialOrd for DelayedTask {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedTask {
    // Reversed so the max-heap pops the earliest deadline first.
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct ExecutorShared {
    name: String,
    config: ExecutorConfig,
    state: AtomicU8,
    thread: OnceLock<ThreadId>,
    context: OnceLock<Arc<GraphicsContext>>,
    sender: Sender<Command>,
    worker: Mutex<Option<JoinHandle<()>>>,
    seq: AtomicU64,
    siblings: AtomicU64,
}

impl ExecutorShared {
    fn state(&self) -> ExecutorState {
        ExecutorState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: ExecutorState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn on_worker(&self) -> bool {
        self.thread.get() == Some(&thread::current().id())
    }

    fn join_worker(&self) {
        if self.on_worker() {
            return;
        }
        let handle = self.worker.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!(executor = %self.name, "executor worker panicked during shutdown");
            }
        }
    }
}

impl Drop for ExecutorShared {
    fn drop(&mut self) {
        if self.state() != ExecutorState::Released {
            tracing::warn!(executor = %self.name, "context executor dropped without release");
            self.set_state(ExecutorState::Released);
            let _ = self.sender.send(Command::Shutdown);
            self.join_worker();
        }
    }
}

/// Owner of one worker thread and the graphics context bound to it.
#[derive(Clone)]
pub struct ContextExecutor {
    shared: Arc<ExecutorShared>,
}

impl ContextExecutor {
    /// Spawns the worker and blocks until its context is live.
    pub fn create(config: ExecutorConfig) -> ContextResult<Self> {
        let (sender, receiver) = unbounded();
        let timeout = config.init_timeout;
        let name = config.name.clone();
        let shared = Arc::new(ExecutorShared {
            name: name.clone(),
            config: config.clone(),
            state: AtomicU8::new(ExecutorState::Created as u8),
            thread: OnceLock::new(),
            context: OnceLock::new(),
            sender,
            worker: Mutex::new(None),
            seq: AtomicU64::new(0),
            siblings: AtomicU64::new(0),
        });

        let (ready_tx, ready_rx) = bounded(1);
        shared.set_state(ExecutorState::Initializing);
        let weak = Arc::downgrade(&shared);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_worker(config, weak, receiver, ready_tx))
            .map_err(|err| {
                shared.set_state(ExecutorState::Released);
                ContextError::Initialization(format!("failed to spawn executor thread: {err}"))
            })?;
        if let Ok(mut slot) = shared.worker.lock() {
            *slot = Some(handle);
        }

        match ready_rx.recv_timeout(timeout) {
            Ok(Ok(())) => {
                tracing::debug!(executor = %name, "context executor ready");
                Ok(Self { shared })
            }
            Ok(Err(err)) => {
                shared.set_state(ExecutorState::Released);
                shared.join_worker();
                Err(err)
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(executor = %name, ?timeout, "context bring-up timed out");
                shared.set_state(ExecutorState::Released);
                let _ = shared.sender.send(Command::Shutdown);
                Err(ContextError::InitializationTimeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                shared.set_state(ExecutorState::Released);
                shared.join_worker();
                Err(ContextError::Initialization(
                    "executor thread exited during bring-up".to_string(),
                ))
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn state(&self) -> ExecutorState {
        self.shared.state()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ExecutorState::Ready
    }

    pub fn is_executor_thread(&self) -> bool {
        self.shared.on_worker()
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.shared.thread.get().copied()
    }

    pub fn context(&self) -> ContextResult<Arc<GraphicsContext>> {
        self.shared
            .context
            .get()
            .cloned()
            .ok_or_else(|| ContextError::invalid_state("executor has no graphics context"))
    }

    /// Handle for creating contexts that share this executor's GPU objects.
    pub fn share_handle(&self) -> ContextResult<SharedContext> {
        Ok(self.context()?.share_handle())
    }

    fn ensure_accepting(&self) -> ContextResult<()> {
        match self.state() {
            ExecutorState::Ready => Ok(()),
            ExecutorState::Released => Err(ContextError::invalid_state(format!(
                "executor '{}' has been released",
                self.shared.name
            ))),
            state => Err(ContextError::invalid_state(format!(
                "executor '{}' is not ready ({state:?})",
                self.shared.name
            ))),
        }
    }

    /// Queues `task`, or runs it right away when called on the worker.
    pub fn submit<F>(&self, task: F) -> ContextResult<()>
    where
        F: FnOnce(&GraphicsContext) -> anyhow::Result<()> + Send + 'static,
    {
        self.ensure_accepting()?;
        if self.is_executor_thread() {
            let context = self.context()?;
            run_here(&self.shared.name, &context, Box::new(task));
            return Ok(());
        }
        self.send(Command::Run(Box::new(task)))
    }

    /// Runs `task` on the worker no earlier than `delay` from now.
    pub fn submit_delayed<F>(&self, task: F, delay: Duration) -> ContextResult<()>
    where
        F: FnOnce(&GraphicsContext) -> anyhow::Result<()> + Send + 'static,
    {
        if delay.is_zero() {
            return self.submit(task);
        }
        self.ensure_accepting()?;
        let seq = self.shared.seq.fetch_add(1, Ordering::Relaxed);
        self.send(Command::Delayed(DelayedTask {
            due: Instant::now() + delay,
            seq,
            task: Box::new(task),
        }))
    }

    /// Runs `task` on the worker and waits for its result.
    pub fn call<T, F>(&self, task: F) -> ContextResult<T>
    where
        F: FnOnce(&GraphicsContext) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_accepting()?;
        if self.is_executor_thread() {
            let context = self.context()?;
            return panic::catch_unwind(AssertUnwindSafe(|| task(&context)))
                .map_err(|payload| ContextError::Backend(panic_error(payload)));
        }

        let (result_tx, result_rx) = bounded(1);
        self.send(Command::Run(Box::new(move |ctx: &GraphicsContext| -> anyhow::Result<()> {
            let _ = result_tx.send(task(ctx));
            Ok(())
        })))?;
        result_rx.recv().map_err(|_| {
            ContextError::invalid_state(format!(
                "task on executor '{}' did not complete",
                self.shared.name
            ))
        })
    }

    fn send(&self, command: Command) -> ContextResult<()> {
        self.shared.sender.send(command).map_err(|_| {
            ContextError::invalid_state(format!("executor '{}' worker is gone", self.shared.name))
        })
    }

    /// Stops accepting work and tears the context down after queued tasks.
    ///
    /// Safe to call repeatedly and from any thread; joins the worker unless
    /// called from it.
    pub fn release(&self) {
        let previous = ExecutorState::from_u8(
            self.shared
                .state
                .swap(ExecutorState::Released as u8, Ordering::AcqRel),
        );
        if previous != ExecutorState::Released {
            tracing::debug!(executor = %self.shared.name, "releasing context executor");
            let _ = self.shared.sender.send(Command::Shutdown);
        }
        self.shared.join_worker();
    }

    /// New executor on its own thread sharing this one's textures and programs.
    pub fn create_sibling(&self) -> ContextResult<Self> {
        if self.state() != ExecutorState::Ready {
            return Err(ContextError::invalid_state(format!(
                "cannot create sibling of executor '{}' in state {:?}",
                self.shared.name,
                self.state()
            )));
        }
        let shared = self.share_handle()?;
        let index = self.shared.siblings.fetch_add(1, Ordering::Relaxed) + 1;
        let config = ExecutorConfig {
            name: format!("{}-sibling-{index}", self.shared.name),
            shared: Some(shared),
            surface: None,
            ..self.shared.config.clone()
        };
        Self::create(config)
    }
}

impl fmt::Debug for ContextExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextExecutor")
            .field("name", &self.shared.name)
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for ContextExecutor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for ContextExecutor {}

fn run_worker(
    config: ExecutorConfig,
    shared: Weak<ExecutorShared>,
    receiver: Receiver<Command>,
    ready_tx: Sender<ContextResult<()>>,
) {
    let name = config.name.clone();
    match shared.upgrade() {
        Some(shared) => {
            let _ = shared.thread.set(thread::current().id());
        }
        None => return,
    }
    apply_priority(&name, config.priority);

    let context = match bringup::open_share_group(&config)
        .and_then(|group| GraphicsContext::initialize(&config, group))
    {
        Ok(context) => Arc::new(context),
        Err(err) => {
            tracing::warn!(executor = %name, error = %err, "graphics context bring-up failed");
            let _ = ready_tx.send(Err(err));
            return;
        }
    };

    {
        let Some(shared) = shared.upgrade() else {
            context.release();
            return;
        };
        let _ = shared.context.set(Arc::clone(&context));
        let promoted = shared.state.compare_exchange(
            ExecutorState::Initializing as u8,
            ExecutorState::Ready as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if promoted.is_err() {
            tracing::debug!(executor = %name, "executor released before bring-up finished");
            context.release();
            return;
        }
    }
    let _ = ready_tx.send(Ok(()));
    drop(ready_tx);

    run_loop(&name, &context, receiver);
    context.release();
    tracing::debug!(executor = %name, "executor worker stopped");
}

fn run_loop(name: &str, context: &GraphicsContext, receiver: Receiver<Command>) {
    let mut delayed: BinaryHeap<DelayedTask> = BinaryHeap::new();
    loop {
        let now = Instant::now();
        while delayed.peek().is_some_and(|next| next.due <= now) {
            if let Some(next) = delayed.pop() {
                run_here(name, context, next.task);
            }
        }

        let command = match delayed.peek() {
            Some(next) => {
                let wait = next.due.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(wait) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };

        match command {
            Command::Run(task) => run_here(name, context, task),
            Command::Delayed(task) => delayed.push(task),
            Command::Shutdown => break,
        }
    }

    if !delayed.is_empty() {
        tracing::debug!(executor = %name, dropped = delayed.len(), "dropping pending delayed tasks");
    }
}

/// Runs a task on the current thread without checking ownership.
fn run_here(name: &str, context: &GraphicsContext, task: Task) {
    match panic::catch_unwind(AssertUnwindSafe(|| task(context))) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            tracing::warn!(executor = %name, error = %format!("{err:#}"), "executor task failed");
        }
        Err(payload) => {
            tracing::error!(executor = %name, error = %panic_error(payload), "executor task panicked");
        }
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    anyhow!("task panicked: {message}")
}

#[cfg(target_os = "linux")]
fn apply_priority(name: &str, priority: Option<i32>) {
    let Some(requested) = priority else {
        return;
    };
    let nice = requested.clamp(-20, 19);
    // SAFETY: setpriority takes plain integers; who = 0 targets the calling thread on Linux.
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, nice) };
    if rc == 0 {
        tracing::debug!(executor = %name, nice, "applied executor thread priority");
    } else {
        tracing::warn!(
            executor = %name,
            nice,
            error = %std::io::Error::last_os_error(),
            "failed to set executor thread priority"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn apply_priority(name: &str, priority: Option<i32>) {
    if let Some(nice) = priority {
        tracing::debug!(executor = %name, nice, "thread priority is not supported on this platform");
    }
}
