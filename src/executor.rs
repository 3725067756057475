//! Cross-thread execution: calling into a remote loop, sync or async.
//!
//! Each in-flight call is one event object living on both sides at once:
//! an event in the target loop and a node in the requesting loop. Its
//! lifecycle, with every transition made while holding the target
//! executor's lock:
//!
//! | State | Meaning |
//! |---|---|
//! | `UNUSED` | Never enqueued. |
//! | `QUEUED` | In the target's incoming list; the requester may unlink to cancel. |
//! | `EXECUTING` | The target dequeued it; cancellation needs the target's help. |
//! | `CANCELING` | The requester asked to cancel; the target will finish and mark `DONE`. |
//! | `DONE` | The target will never touch the object again; the requester owns it. |
//!
//! `DONE` is published with release ordering, so a requester that
//! observes it may skip locking entirely. When a target loop dies, every
//! event it still owes is synthetically completed with a
//! `Disconnected`-kind error.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::cell::ResultCell;
use crate::error::{Error, Result};
use crate::event::{ArmKind, Event, EventHandle};
use crate::event_loop::{current_loop, LoopCore, LoopHandle};
use crate::node::{OnReadyEvent, PromiseNode, TraceBuilder};
use crate::promise::{IntoPromise, Promise};

const PHASE_UNUSED: u8 = 0;
const PHASE_QUEUED: u8 = 1;
const PHASE_EXECUTING: u8 = 2;
const PHASE_CANCELING: u8 = 3;
const PHASE_DONE: u8 = 4;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(0);

/// Target-side view of a cross-thread event.
pub(crate) trait CrossThreadEvent: Send + Sync {
    fn id(&self) -> u64;
    /// Marks the event `EXECUTING`. Called under the executor lock.
    fn mark_executing(&self);
    /// Creates and arms the target-side loop event.
    fn begin(self: Arc<Self>, handle: &LoopHandle);
    /// Requester asked to cancel while executing: drop the work, finish.
    fn cancel_now(&self);
    /// The target loop is gone: complete with a disconnection error.
    fn disconnect(self: Arc<Self>);
}

struct ExecutorState {
    alive: bool,
    queued: VecDeque<Arc<dyn CrossThreadEvent>>,
    executing: Vec<Arc<dyn CrossThreadEvent>>,
    cancelling: Vec<Arc<dyn CrossThreadEvent>>,
}

pub(crate) struct ExecutorCore {
    target: Weak<LoopCore>,
    state: Mutex<ExecutorState>,
}

/// Handle for sending work to another thread's loop. Cloneable and
/// stable for the lifetime of its loop; calls made after the loop died
/// fail with a `Disconnected`-kind error.
#[derive(Clone)]
pub struct Executor {
    core: Arc<ExecutorCore>,
}

struct XSync<T: Send + 'static> {
    func: Option<Box<dyn FnOnce() -> Promise<T> + Send>>,
    /// Target side: the in-progress promise node, when `func` returned
    /// deferred work.
    inner: Option<Box<dyn PromiseNode<T>>>,
    target_event: Option<EventHandle>,
    result: Option<ResultCell<T>>,
    reply_to: Option<Weak<LoopCore>>,
    /// Requester side.
    on_ready: OnReadyEvent,
}

struct XThreadShared<T: Send + 'static> {
    id: u64,
    phase: AtomicU8,
    exec: Arc<ExecutorCore>,
    sync: Mutex<XSync<T>>,
    done_cv: Condvar,
}

impl<T: Send + 'static> XThreadShared<T> {
    fn new(
        exec: Arc<ExecutorCore>,
        func: Box<dyn FnOnce() -> Promise<T> + Send>,
        reply_to: Option<Weak<LoopCore>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            phase: AtomicU8::new(PHASE_UNUSED),
            exec,
            sync: Mutex::new(XSync {
                func: Some(func),
                inner: None,
                target_event: None,
                result: None,
                reply_to,
                on_ready: OnReadyEvent::default(),
            }),
            done_cv: Condvar::new(),
        })
    }

    /// Target-side fire. First call runs the function; if it returned
    /// deferred work, the event re-fires when that work is ready. The
    /// final call extracts, replies, and publishes `DONE`.
    fn fire(self: &Arc<Self>) {
        if self.phase.load(Ordering::Acquire) != PHASE_EXECUTING {
            return;
        }

        let func = self.sync.lock().func.take();
        if let Some(func) = func {
            let promise = match catch_unwind(AssertUnwindSafe(func)) {
                Ok(promise) => promise,
                Err(payload) => Promise::err(Error::from_panic(payload)),
            };
            let mut node = promise.into_node();
            let mut guard = self.sync.lock();
            let event = guard
                .target_event
                .clone()
                .expect("cross-thread event fired without a target event");
            node.on_ready(Some(event));
            guard.inner = Some(node);
            return;
        }

        let node = self.sync.lock().inner.take();
        let Some(mut node) = node else { return };
        let mut cell = ResultCell::empty();
        node.get(&mut cell);
        drop(node);

        let reply_to = {
            let mut guard = self.sync.lock();
            guard.result = Some(cell);
            guard.target_event = None;
            guard.reply_to.take()
        };
        self.complete(reply_to);
    }

    fn complete(self: &Arc<Self>, reply_to: Option<Weak<LoopCore>>) {
        if let Some(reply) = reply_to.and_then(|weak| weak.upgrade()) {
            let event = self.clone();
            reply.push_reply(Box::new(move || event.deliver_reply()));
        }
        self.set_done();
    }

    /// Runs on the requesting loop when the reply arrives.
    fn deliver_reply(&self) {
        self.sync.lock().on_ready.arm_breadth_first();
    }

    fn set_done(&self) {
        {
            let mut state = self.exec.state.lock();
            let id = self.id;
            state.queued.retain(|e| e.id() != id);
            state.executing.retain(|e| e.id() != id);
            state.cancelling.retain(|e| e.id() != id);
        }
        self.phase.store(PHASE_DONE, Ordering::Release);
        // Pair the store with the lock so a condvar waiter cannot miss it.
        drop(self.sync.lock());
        self.done_cv.notify_all();
    }

    fn wait_done(&self) {
        let mut guard = self.sync.lock();
        while self.phase.load(Ordering::Acquire) != PHASE_DONE {
            self.done_cv.wait(&mut guard);
        }
    }

    fn take_result(&self) -> Result<T> {
        self.sync
            .lock()
            .result
            .take()
            .expect("cross-thread result missing")
            .into_result()
    }

    /// Requester-side teardown: make sure the target is finished with
    /// the object before the requester frees it.
    fn ensure_done_or_canceled(self: &Arc<Self>) {
        if self.phase.load(Ordering::Acquire) == PHASE_DONE {
            return;
        }
        let mut state = self.exec.state.lock();
        match self.phase.load(Ordering::Acquire) {
            PHASE_UNUSED | PHASE_QUEUED => {
                let id = self.id;
                state.queued.retain(|e| e.id() != id);
                drop(state);
                self.phase.store(PHASE_DONE, Ordering::Release);
            }
            PHASE_EXECUTING => {
                tracing::debug!(id = self.id, "cancelling cross-thread event");
                let event: Arc<dyn CrossThreadEvent> = self.clone();
                state.cancelling.push(event);
                self.phase.store(PHASE_CANCELING, Ordering::Release);
                drop(state);
                if let Some(target) = self.exec.target.upgrade() {
                    target.wake();
                }
                self.wait_done();
            }
            _ => {
                drop(state);
                self.wait_done();
            }
        }
    }
}

impl<T: Send + 'static> CrossThreadEvent for XThreadShared<T> {
    fn id(&self) -> u64 {
        self.id
    }

    fn mark_executing(&self) {
        self.phase.store(PHASE_EXECUTING, Ordering::Release);
    }

    fn begin(self: Arc<Self>, handle: &LoopHandle) {
        let event = {
            let weak = Arc::downgrade(&self);
            Event::new(handle, "xthread", move || {
                if let Some(shared) = weak.upgrade() {
                    shared.fire();
                }
            })
        };
        self.sync.lock().target_event = Some(event.clone());
        event.arm(ArmKind::BreadthFirst);
    }

    fn cancel_now(&self) {
        if self.phase.load(Ordering::Acquire) == PHASE_DONE {
            return;
        }
        let (func, inner) = {
            let mut guard = self.sync.lock();
            guard.target_event = None;
            (guard.func.take(), guard.inner.take())
        };
        // Dropping the work is the cancellation.
        drop(func);
        drop(inner);
        self.set_done();
    }

    fn disconnect(self: Arc<Self>) {
        if self.phase.load(Ordering::Acquire) == PHASE_DONE {
            return;
        }
        tracing::debug!(id = self.id, "completing cross-thread event as disconnected");
        let (func, inner, reply_to) = {
            let mut guard = self.sync.lock();
            guard.target_event = None;
            guard.result = Some(ResultCell::from_error(Error::disconnected(
                "target event loop exited before completing the call",
            )));
            (guard.func.take(), guard.inner.take(), guard.reply_to.take())
        };
        drop(func);
        drop(inner);
        if let Some(reply) = reply_to.and_then(|weak| weak.upgrade()) {
            let event = self.clone();
            reply.push_reply(Box::new(move || event.deliver_reply()));
        }
        self.set_done();
    }
}

/// Requester-side node for `execute_async`.
struct XThreadNode<T: Send + 'static> {
    shared: Arc<XThreadShared<T>>,
}

impl<T: Send + 'static> PromiseNode<T> for XThreadNode<T> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        self.shared.sync.lock().on_ready.init(event);
    }

    fn get(&mut self, output: &mut ResultCell<T>) {
        *output = self
            .shared
            .sync
            .lock()
            .result
            .take()
            .expect("cross-thread result missing");
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        trace.push("cross-thread", None);
    }
}

impl<T: Send + 'static> Drop for XThreadNode<T> {
    fn drop(&mut self) {
        self.shared.ensure_done_or_canceled();
    }
}

impl Executor {
    /// Runs `f` on the executor's loop and blocks the calling thread
    /// until the result (or error) is back. `f` may return a plain
    /// `Result` or a promise for further deferred work.
    pub fn execute_sync<T, R, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        R: IntoPromise<T>,
        F: FnOnce() -> R + Send + 'static,
    {
        let shared = XThreadShared::new(
            self.core.clone(),
            Box::new(move || f().into_promise()),
            None,
        );
        if !self.send(shared.clone()) {
            return Err(Error::disconnected("target event loop is gone"));
        }
        shared.wait_done();
        shared.take_result()
    }

    /// Runs `f` on the executor's loop and returns a promise for its
    /// result on the calling thread's loop. Requires an entered loop on
    /// the calling thread (the reply destination).
    #[must_use]
    pub fn execute_async<T, R, F>(&self, f: F) -> Promise<T>
    where
        T: Send + 'static,
        R: IntoPromise<T>,
        F: FnOnce() -> R + Send + 'static,
    {
        let reply = current_loop();
        let shared = XThreadShared::new(
            self.core.clone(),
            Box::new(move || f().into_promise()),
            Some(Arc::downgrade(&reply.core)),
        );
        if !self.send(shared.clone()) {
            return Promise::err(Error::disconnected("target event loop is gone"));
        }
        Promise::from_node(Box::new(XThreadNode { shared }))
    }

    fn send<T: Send + 'static>(&self, shared: Arc<XThreadShared<T>>) -> bool {
        let mut state = self.core.state.lock();
        if !state.alive {
            return false;
        }
        shared.phase.store(PHASE_QUEUED, Ordering::Release);
        tracing::debug!(id = shared.id, "sending cross-thread event");
        state.queued.push_back(shared);
        drop(state);
        if let Some(target) = self.core.target.upgrade() {
            target.wake();
        }
        true
    }
}

/// Returns the executor for `core`, creating it on first use.
pub(crate) fn executor_for(core: &Arc<LoopCore>) -> Executor {
    let mut slot = core.executor_slot().lock().expect("lock poisoned");
    if let Some(existing) = slot.as_ref() {
        return Executor {
            core: existing.clone(),
        };
    }
    let exec = Arc::new(ExecutorCore {
        target: Arc::downgrade(core),
        state: Mutex::new(ExecutorState {
            alive: true,
            queued: VecDeque::new(),
            executing: Vec::new(),
            cancelling: Vec::new(),
        }),
    });
    *slot = Some(exec.clone());
    Executor { core: exec }
}

/// Target-loop side: admit queued events and serve cancellation
/// requests. Called at the top of every loop turn.
pub(crate) fn drain_incoming(core: &Arc<ExecutorCore>, handle: &LoopHandle) {
    loop {
        let cancel = core.state.lock().cancelling.pop();
        if let Some(event) = cancel {
            event.cancel_now();
            continue;
        }
        let next = {
            let mut state = core.state.lock();
            match state.queued.pop_front() {
                Some(event) => {
                    event.mark_executing();
                    state.executing.push(event.clone());
                    Some(event)
                }
                None => None,
            }
        };
        match next {
            Some(event) => event.begin(handle),
            None => break,
        }
    }
}

/// Loop teardown: fail everything still owed by this executor.
pub(crate) fn shutdown(core: &Arc<ExecutorCore>) {
    let events: Vec<Arc<dyn CrossThreadEvent>> = {
        let mut state = core.state.lock();
        state.alive = false;
        let mut all: Vec<Arc<dyn CrossThreadEvent>> = state.queued.drain(..).collect();
        all.append(&mut state.executing);
        all.append(&mut state.cancelling);
        all
    };
    for event in events {
        event.disconnect();
    }
}
