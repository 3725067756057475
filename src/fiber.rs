//! Fibers: stackful contexts that can synchronously wait on promises.
//!
//! A fiber runs its body on a dedicated OS thread while the loop thread
//! blocks, and vice versa: a strict baton protocol over a mutex and
//! condition variable guarantees that exactly one of the two stacks runs
//! at any moment. The baton hand-off is the stack switch; platform stack
//! allocation reduces to `thread::Builder::stack_size`.
//!
//! The fiber presents itself to the loop as both a node (producing the
//! body's return value) and an event (fired for each resumption):
//!
//! ```text
//!   WAITING ──fire──► RUNNING ──wait(promise)──► WAITING
//!                        │
//!                        ├─ body returns ──► FINISHED (arms consumer)
//!                        └─ cancel baton ──► CANCELED (stack unwound)
//! ```
//!
//! Dropping the fiber's node while it is parked sends a cancel baton; the
//! fiber's `wait` rethrows it as a sentinel panic payload, unwinding the
//! body so destructors run, and the worker thread is reclaimed.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::{mpsc, Arc, Mutex as StdMutex, Weak};
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::cell::ResultCell;
use crate::error::{Error, Result};
use crate::event::{ArmKind, Event, EventHandle};
use crate::event_loop::{LoopHandle, WaitScope};
use crate::node::{OnReadyEvent, PromiseNode, TraceBuilder};
use crate::promise::Promise;

/// Sentinel panic payload used to unwind a cancelled fiber's stack.
struct FiberCancelToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Turn {
    Loop,
    Fiber,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Waiting,
    Running,
    Finished,
    Canceled,
}

struct FiberSync {
    turn: Turn,
    phase: Phase,
    cancel: bool,
}

/// Baton shared between the loop thread and the fiber thread.
pub(crate) struct FiberControl {
    sync: Mutex<FiberSync>,
    condvar: Condvar,
}

impl FiberControl {
    fn new() -> Self {
        Self {
            sync: Mutex::new(FiberSync {
                turn: Turn::Loop,
                phase: Phase::Waiting,
                cancel: false,
            }),
            condvar: Condvar::new(),
        }
    }
}

/// What a fiber-flavored `WaitScope` needs to suspend: the baton and the
/// fiber's resumption event.
pub(crate) struct FiberWaitCtx {
    control: Arc<FiberControl>,
    event: EventHandle,
}

struct FiberResult<T: Send + 'static> {
    cell: Option<ResultCell<T>>,
    on_ready: OnReadyEvent,
}

struct FiberShared<T: Send + 'static> {
    result: StdMutex<FiberResult<T>>,
}

/// The fiber's outer node: owns the baton and delivers the body's result.
struct FiberNode<T: Send + 'static> {
    shared: Arc<FiberShared<T>>,
    control: Arc<FiberControl>,
    _event: EventHandle,
}

type FiberJob = Box<dyn FnOnce() + Send>;

fn fire<T: Send + 'static>(control: &Arc<FiberControl>, shared: &Weak<FiberShared<T>>) {
    let mut guard = control.sync.lock();
    if matches!(guard.phase, Phase::Finished | Phase::Canceled) {
        return;
    }
    // Switch to the fiber stack and block until it switches back.
    guard.turn = Turn::Fiber;
    control.condvar.notify_all();
    while guard.turn == Turn::Fiber {
        control.condvar.wait(&mut guard);
    }
    let finished = guard.phase == Phase::Finished;
    drop(guard);
    if finished {
        if let Some(shared) = shared.upgrade() {
            shared
                .result
                .lock()
                .expect("lock poisoned")
                .on_ready
                .arm();
        }
    }
}

fn run_fiber<T, F>(
    body: F,
    control: Arc<FiberControl>,
    shared: Weak<FiberShared<T>>,
    handle: LoopHandle,
    event: EventHandle,
) where
    T: Send + 'static,
    F: FnOnce(&mut WaitScope) -> Result<T> + Send + 'static,
{
    {
        let mut guard = control.sync.lock();
        while guard.turn != Turn::Fiber {
            control.condvar.wait(&mut guard);
        }
        if guard.cancel {
            // Cancelled before the body ever ran.
            guard.phase = Phase::Canceled;
            guard.turn = Turn::Loop;
            control.condvar.notify_all();
            return;
        }
        guard.phase = Phase::Running;
    }

    let ctx = Arc::new(FiberWaitCtx {
        control: control.clone(),
        event,
    });
    let mut scope = WaitScope::for_fiber(handle, ctx);
    let outcome = catch_unwind(AssertUnwindSafe(|| body(&mut scope)));
    drop(scope);

    let mut guard = control.sync.lock();
    match outcome {
        Ok(result) => {
            if let Some(shared) = shared.upgrade() {
                shared.result.lock().expect("lock poisoned").cell =
                    Some(ResultCell::from_result(result));
            }
            guard.phase = Phase::Finished;
        }
        Err(payload) => {
            if payload.is::<FiberCancelToken>() {
                guard.phase = Phase::Canceled;
            } else {
                if let Some(shared) = shared.upgrade() {
                    shared.result.lock().expect("lock poisoned").cell =
                        Some(ResultCell::from_error(Error::from_panic(payload)));
                }
                guard.phase = Phase::Finished;
            }
        }
    }
    tracing::debug!(phase = ?guard.phase, "fiber exited");
    guard.turn = Turn::Loop;
    control.condvar.notify_all();
}

/// Suspends the current fiber until `node` is ready, then extracts its
/// result. Runs on the fiber thread; called through the fiber-flavored
/// `WaitScope`.
pub(crate) fn fiber_wait<T: Send + 'static>(
    node: Box<dyn PromiseNode<T>>,
    ctx: &Arc<FiberWaitCtx>,
) -> Result<T> {
    let root: Arc<StdMutex<Box<dyn PromiseNode<T>>>> = Arc::new(StdMutex::new(node));
    {
        let mut n = root.lock().expect("lock poisoned");
        n.set_chain_slot(Arc::downgrade(&root));
        n.on_ready(Some(ctx.event.clone()));
    }
    {
        let mut guard = ctx.control.sync.lock();
        guard.phase = Phase::Waiting;
        guard.turn = Turn::Loop;
        ctx.control.condvar.notify_all();
        while guard.turn != Turn::Fiber {
            ctx.control.condvar.wait(&mut guard);
        }
        if guard.cancel {
            drop(guard);
            // Dropping the awaited subtree is its cancellation.
            drop(root);
            resume_unwind(Box::new(FiberCancelToken));
        }
        guard.phase = Phase::Running;
    }
    let mut cell = ResultCell::empty();
    root.lock().expect("lock poisoned").get(&mut cell);
    cell.into_result()
}

impl<T: Send + 'static> PromiseNode<T> for FiberNode<T> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        self.shared
            .result
            .lock()
            .expect("lock poisoned")
            .on_ready
            .init(event);
    }

    fn get(&mut self, output: &mut ResultCell<T>) {
        let mut result = self.shared.result.lock().expect("lock poisoned");
        *output = result.cell.take().expect("fiber result not ready");
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        trace.push("fiber", None);
    }
}

impl<T: Send + 'static> Drop for FiberNode<T> {
    fn drop(&mut self) {
        let mut guard = self.control.sync.lock();
        match guard.phase {
            Phase::Finished | Phase::Canceled => {}
            Phase::Running => {
                panic!("fiber node destroyed while the fiber is running");
            }
            Phase::Waiting => {
                guard.cancel = true;
                guard.turn = Turn::Fiber;
                self.control.condvar.notify_all();
                // Resume the fiber one last time so its stack unwinds.
                while guard.turn != Turn::Loop
                    || !matches!(guard.phase, Phase::Finished | Phase::Canceled)
                {
                    self.control.condvar.wait(&mut guard);
                }
            }
        }
    }
}

fn start_fiber_impl<T, F>(body: F, dispatch: impl FnOnce(FiberJob)) -> Promise<T>
where
    T: Send + 'static,
    F: FnOnce(&mut WaitScope) -> Result<T> + Send + 'static,
{
    let handle = crate::event_loop::current_loop();
    let control = Arc::new(FiberControl::new());
    let shared = Arc::new(FiberShared {
        result: StdMutex::new(FiberResult {
            cell: None,
            on_ready: OnReadyEvent::default(),
        }),
    });
    let event = {
        let control = control.clone();
        let weak = Arc::downgrade(&shared);
        Event::new(&handle, "fiber", move || fire::<T>(&control, &weak))
    };
    let job: FiberJob = {
        let control = control.clone();
        let weak = Arc::downgrade(&shared);
        let handle = handle.clone();
        let event = event.clone();
        Box::new(move || run_fiber(body, control, weak, handle, event))
    };
    dispatch(job);
    // Start: the first fire begins executing the body.
    event.arm(ArmKind::DepthFirst);
    Promise::from_node(Box::new(FiberNode {
        shared,
        control,
        _event: event,
    }))
}

/// Starts a fiber on a fresh thread with the given stack size. The
/// returned promise resolves to the body's return value; dropping it
/// cancels the fiber, unwinding its stack.
#[must_use]
pub fn start_fiber<T, F>(stack_size: usize, body: F) -> Promise<T>
where
    T: Send + 'static,
    F: FnOnce(&mut WaitScope) -> Result<T> + Send + 'static,
{
    start_fiber_impl(body, move |job| {
        thread::Builder::new()
            .name("eventide-fiber".into())
            .stack_size(stack_size)
            .spawn(job)
            .expect("failed to spawn fiber thread");
    })
}

/// Configuration for a [`FiberPool`].
#[derive(Debug, Clone)]
pub struct FiberPoolConfig {
    /// Stack size for fiber threads.
    pub stack_size: usize,
    /// How many idle fiber threads to keep parked for reuse.
    pub max_idle: usize,
}

impl Default for FiberPoolConfig {
    fn default() -> Self {
        Self {
            stack_size: 1024 * 1024,
            max_idle: 8,
        }
    }
}

impl FiberPoolConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.stack_size == 0 {
            self.stack_size = 1024 * 1024;
        }
    }
}

struct PoolInner {
    config: FiberPoolConfig,
    idle: StdMutex<Vec<mpsc::Sender<FiberJob>>>,
}

/// Reuses fiber threads (and thus their stacks) across fibers.
pub struct FiberPool {
    inner: Arc<PoolInner>,
}

impl FiberPool {
    /// Creates a pool whose fibers get the given stack size.
    #[must_use]
    pub fn new(stack_size: usize) -> Self {
        Self::with_config(FiberPoolConfig {
            stack_size,
            ..FiberPoolConfig::default()
        })
    }

    /// Creates a pool from a full configuration.
    #[must_use]
    pub fn with_config(mut config: FiberPoolConfig) -> Self {
        config.normalize();
        Self {
            inner: Arc::new(PoolInner {
                config,
                idle: StdMutex::new(Vec::new()),
            }),
        }
    }

    /// Starts a fiber on a pooled thread, spawning one if none is idle.
    #[must_use]
    pub fn start_fiber<T, F>(&self, body: F) -> Promise<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut WaitScope) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        start_fiber_impl(body, move |job| dispatch(&inner, job))
    }
}

fn dispatch(inner: &Arc<PoolInner>, job: FiberJob) {
    let idle = inner.idle.lock().expect("lock poisoned").pop();
    let job = match idle {
        Some(sender) => match sender.send(job) {
            Ok(()) => return,
            // The worker exited between parking and reuse; fall through.
            Err(mpsc::SendError(job)) => job,
        },
        None => job,
    };
    spawn_worker(inner, job);
}

fn spawn_worker(inner: &Arc<PoolInner>, job: FiberJob) {
    let pool = Arc::downgrade(inner);
    thread::Builder::new()
        .name("eventide-fiber".into())
        .stack_size(inner.config.stack_size)
        .spawn(move || {
            job();
            loop {
                let Some(pool) = pool.upgrade() else { break };
                // Park for reuse: a fresh channel per cycle, with the
                // sender held only by the pool, so dropping the pool
                // releases the thread.
                let (sender, receiver) = mpsc::channel::<FiberJob>();
                {
                    let mut idle = pool.idle.lock().expect("lock poisoned");
                    if idle.len() >= pool.config.max_idle {
                        break;
                    }
                    idle.push(sender);
                }
                drop(pool);
                match receiver.recv() {
                    Ok(job) => job(),
                    Err(_) => break,
                }
            }
        })
        .expect("failed to spawn fiber thread");
}
