//! The event loop: three scheduling tiers and the drain discipline.
//!
//! A loop owns three FIFO queues. One drain step (a "turn") removes the
//! head event of the first non-empty queue, in this order, and fires it:
//!
//! 1. **depth-first**: continuations extending a just-completed
//!    computation. Events armed depth-first while another event is firing
//!    are inserted at the queue front in arm order, so a causal chain
//!    runs to completion before older work resumes.
//! 2. **breadth-first**: yielded work, appended at the tail.
//! 3. **last**: book-keeping that must not delay user work.
//!
//! When every queue is empty the loop parks on its [`EventPort`], the
//! idle hook through which I/O layers and cross-thread senders wake it.
//!
//! Each loop is strictly single-threaded and cooperative. Entering a loop
//! on a thread happens by creating a [`WaitScope`], the capability that
//! `Promise::wait` and `Promise::poll` require. Depth-first starvation is
//! the caller's responsibility; long chains must yield through
//! [`eval_later`](crate::eval_later).

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};

use crate::cell::ResultCell;
use crate::error::Result;
use crate::event::{ArmKind, Event};
use crate::node::PromiseNode;

/// The idle hook a loop parks on when all queues are empty.
///
/// Hosts integrating I/O implement this to multiplex readiness; the
/// default [`ThreadPort`] is a plain condition variable, sufficient for
/// cross-thread wake-ups.
pub trait EventPort: Send + Sync {
    /// Blocks until [`wake`](Self::wake) is called. A wake that arrives
    /// before the wait must not be lost.
    fn wait(&self);

    /// Non-blocking variant: consumes a pending wake if one arrived.
    /// Returns true if external activity was delivered.
    fn poll(&self) -> bool;

    /// Signals the port from any thread.
    fn wake(&self);
}

/// Condition-variable port used when no I/O layer is attached.
#[derive(Default)]
pub struct ThreadPort {
    signalled: Mutex<bool>,
    condvar: Condvar,
}

impl ThreadPort {
    /// Creates a new port with no pending signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventPort for ThreadPort {
    fn wait(&self) {
        let mut signalled = self.signalled.lock();
        while !*signalled {
            self.condvar.wait(&mut signalled);
        }
        *signalled = false;
    }

    fn poll(&self) -> bool {
        let mut signalled = self.signalled.lock();
        std::mem::take(&mut *signalled)
    }

    fn wake(&self) {
        let mut signalled = self.signalled.lock();
        *signalled = true;
        self.condvar.notify_one();
    }
}

struct Queues {
    depth: VecDeque<Weak<Event>>,
    breadth: VecDeque<Weak<Event>>,
    last: VecDeque<Weak<Event>>,
    /// Insert position for the next depth-first arm. Reset to the queue
    /// front each time an event starts firing, advanced per insert, which
    /// yields the front-in-arm-order cluster rule.
    depth_cursor: usize,
}

pub(crate) struct LoopCore {
    queues: Mutex<Queues>,
    port: Arc<dyn EventPort>,
    port_waiting: AtomicBool,
    running: AtomicBool,
    alive: AtomicBool,
    /// Completed cross-thread events addressed to this loop as the
    /// requester. FIFO per reply loop.
    replies: SegQueue<Box<dyn FnOnce() + Send>>,
    daemons: StdMutex<HashMap<u64, Box<dyn PromiseNode<()>>>>,
    daemon_next: AtomicU64,
    executor: StdMutex<Option<Arc<crate::executor::ExecutorCore>>>,
}

impl LoopCore {
    fn new(port: Arc<dyn EventPort>) -> Arc<Self> {
        Arc::new(Self {
            queues: Mutex::new(Queues {
                depth: VecDeque::new(),
                breadth: VecDeque::new(),
                last: VecDeque::new(),
                depth_cursor: 0,
            }),
            port,
            port_waiting: AtomicBool::new(false),
            running: AtomicBool::new(false),
            alive: AtomicBool::new(true),
            replies: SegQueue::new(),
            daemons: StdMutex::new(HashMap::new()),
            daemon_next: AtomicU64::new(0),
            executor: StdMutex::new(None),
        })
    }

    pub(crate) fn enqueue(&self, kind: ArmKind, event: Weak<Event>) {
        {
            let mut queues = self.queues.lock();
            match kind {
                ArmKind::DepthFirst => {
                    let at = queues.depth_cursor.min(queues.depth.len());
                    queues.depth.insert(at, event);
                    queues.depth_cursor = at + 1;
                }
                ArmKind::BreadthFirst => queues.breadth.push_back(event),
                ArmKind::Last => queues.last.push_back(event),
            }
        }
        if self.port_waiting.load(Ordering::SeqCst) {
            self.port.wake();
        }
    }

    /// Runs a single drain step. Returns false when no event fired.
    pub(crate) fn turn(self: &Arc<Self>) -> bool {
        self.drain_replies();
        self.drain_cross_thread();

        let event = {
            let mut queues = self.queues.lock();
            loop {
                let next = queues
                    .depth
                    .pop_front()
                    .or_else(|| queues.breadth.pop_front())
                    .or_else(|| queues.last.pop_front());
                let Some(weak) = next else { break None };
                if let Some(event) = weak.upgrade() {
                    if event.begin_fire() {
                        queues.depth_cursor = 0;
                        break Some(event);
                    }
                }
                // Owner dropped or disarmed; discard lazily and keep looking.
            }
        };

        match event {
            Some(event) => {
                tracing::trace!(event = event.name(), "fire");
                event.fire();
                true
            }
            None => false,
        }
    }

    fn drain_replies(&self) {
        while let Some(deliver) = self.replies.pop() {
            deliver();
        }
    }

    fn drain_cross_thread(self: &Arc<Self>) {
        let executor = self.executor.lock().expect("lock poisoned").clone();
        if let Some(executor) = executor {
            crate::executor::drain_incoming(&executor, &LoopHandle { core: self.clone() });
        }
    }

    pub(crate) fn push_reply(&self, deliver: Box<dyn FnOnce() + Send>) {
        self.replies.push(deliver);
        self.port.wake();
    }

    pub(crate) fn wake(&self) {
        self.port.wake();
    }

    fn has_pending_work(&self) -> bool {
        if !self.replies.is_empty() {
            return true;
        }
        let queues = self.queues.lock();
        !(queues.depth.is_empty() && queues.breadth.is_empty() && queues.last.is_empty())
    }

    fn idle_wait(&self) {
        self.port_waiting.store(true, Ordering::SeqCst);
        if self.has_pending_work() {
            self.port_waiting.store(false, Ordering::SeqCst);
            return;
        }
        tracing::trace!("loop idle, waiting on port");
        self.port.wait();
        self.port_waiting.store(false, Ordering::SeqCst);
    }

    fn port_poll(&self) -> bool {
        self.port.poll()
    }

    pub(crate) fn daemon_reserve_id(&self) -> u64 {
        self.daemon_next.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn daemon_insert(&self, id: u64, node: Box<dyn PromiseNode<()>>) {
        self.daemons.lock().expect("lock poisoned").insert(id, node);
    }

    pub(crate) fn daemon_remove(&self, id: u64) {
        self.daemons.lock().expect("lock poisoned").remove(&id);
    }

    pub(crate) fn executor_slot(&self) -> &StdMutex<Option<Arc<crate::executor::ExecutorCore>>> {
        &self.executor
    }
}

/// A cloneable, thread-safe reference to an event loop.
///
/// Handles do not keep the loop running; they merely address it. They are
/// what node-internal events bind to and what
/// [`Promise::detach`](crate::Promise::detach) and fibers carry across
/// threads.
#[derive(Clone)]
pub struct LoopHandle {
    pub(crate) core: Arc<LoopCore>,
}

/// A single-threaded cooperative event loop.
///
/// Dropping the loop cancels its daemon tasks and synthetically completes
/// any in-flight cross-thread work with a disconnection error.
pub struct EventLoop {
    core: Arc<LoopCore>,
}

impl EventLoop {
    /// Creates a loop with the default condition-variable port.
    #[must_use]
    pub fn new() -> Self {
        Self::with_port(Arc::new(ThreadPort::new()))
    }

    /// Creates a loop driven by a host-provided idle hook.
    #[must_use]
    pub fn with_port(port: Arc<dyn EventPort>) -> Self {
        Self {
            core: LoopCore::new(port),
        }
    }

    /// Returns a cloneable handle to this loop.
    #[must_use]
    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            core: self.core.clone(),
        }
    }

    /// Enters the loop on the current thread, returning the capability
    /// required to block on promises.
    #[must_use]
    pub fn wait_scope(&self) -> WaitScope {
        WaitScope::new(self.handle())
    }

    /// Returns the cross-thread executor for this loop, creating it on
    /// first use. The executor stays valid for the lifetime of the loop;
    /// calls made after the loop is dropped fail with a disconnection
    /// error.
    #[must_use]
    pub fn executor(&self) -> crate::executor::Executor {
        crate::executor::executor_for(&self.core)
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.core.alive.store(false, Ordering::Release);
        // Daemon tasks die with the loop; dropping their nodes is the
        // cancellation.
        self.core.daemons.lock().expect("lock poisoned").clear();
        let executor = self.core.executor.lock().expect("lock poisoned").take();
        if let Some(executor) = executor {
            crate::executor::shutdown(&executor);
        }
    }
}

thread_local! {
    static CURRENT_LOOP: RefCell<Vec<LoopHandle>> = const { RefCell::new(Vec::new()) };
}

/// Returns the loop entered on this thread.
///
/// # Panics
///
/// Panics if no `WaitScope` (or fiber scope) is active on this thread.
pub(crate) fn current_loop() -> LoopHandle {
    CURRENT_LOOP.with(|stack| {
        stack
            .borrow()
            .last()
            .cloned()
            .expect("no event loop has been entered on this thread; create a WaitScope first")
    })
}

/// RAII registration of a loop as the thread's current loop.
pub(crate) struct EnterGuard {
    _not_send: PhantomData<*const ()>,
}

pub(crate) fn enter_loop(handle: LoopHandle) -> EnterGuard {
    CURRENT_LOOP.with(|stack| stack.borrow_mut().push(handle));
    EnterGuard {
        _not_send: PhantomData,
    }
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        CURRENT_LOOP.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Capability proving the holder is on the loop's thread and may block.
///
/// Creating a `WaitScope` enters the loop on the current thread, which is
/// what allows promise combinators on this thread to bind their internal
/// events without an explicit loop argument. Fibers receive a
/// fiber-flavored scope whose `wait` suspends the fiber instead of
/// draining the loop.
pub struct WaitScope {
    handle: LoopHandle,
    fiber: Option<Arc<crate::fiber::FiberWaitCtx>>,
    _enter: EnterGuard,
    _not_send: PhantomData<*const ()>,
}

impl WaitScope {
    pub(crate) fn new(handle: LoopHandle) -> Self {
        let enter = enter_loop(handle.clone());
        Self {
            handle,
            fiber: None,
            _enter: enter,
            _not_send: PhantomData,
        }
    }

    pub(crate) fn for_fiber(handle: LoopHandle, ctx: Arc<crate::fiber::FiberWaitCtx>) -> Self {
        let enter = enter_loop(handle.clone());
        Self {
            handle,
            fiber: Some(ctx),
            _enter: enter,
            _not_send: PhantomData,
        }
    }

    /// Returns the handle of the loop this scope belongs to.
    #[must_use]
    pub fn handle(&self) -> &LoopHandle {
        &self.handle
    }

    pub(crate) fn fiber(&self) -> Option<&Arc<crate::fiber::FiberWaitCtx>> {
        self.fiber.as_ref()
    }
}

struct RunGuard<'a> {
    core: &'a LoopCore,
}

impl<'a> RunGuard<'a> {
    fn claim(core: &'a LoopCore) -> Self {
        assert!(
            !core.running.swap(true, Ordering::AcqRel),
            "event loop is already draining; wait() and poll() must not be reentered"
        );
        Self { core }
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.core.running.store(false, Ordering::Release);
    }
}

/// Drives the loop until `node` is ready, then converts its result back
/// into normal control flow. Inside a fiber this suspends the fiber
/// instead.
pub(crate) fn wait_impl<T: Send + 'static>(
    node: Box<dyn PromiseNode<T>>,
    scope: &WaitScope,
) -> Result<T> {
    if let Some(fiber) = scope.fiber() {
        return crate::fiber::fiber_wait(node, fiber);
    }

    let core = scope.handle.core.clone();
    let _run = RunGuard::claim(&core);

    let fired = Arc::new(AtomicBool::new(false));
    // A queued (not direct) event: readiness of an already-resolved
    // promise still goes through the queue, so waiting on yielded work
    // drains everything queued ahead of it.
    let done = {
        let fired = fired.clone();
        Event::new(&scope.handle, "wait.done", move || {
            fired.store(true, Ordering::SeqCst);
        })
    };

    // The root lives in a shared slot so a chain node installed here can
    // collapse itself when it unwraps its inner promise.
    let root: Arc<StdMutex<Box<dyn PromiseNode<T>>>> = Arc::new(StdMutex::new(node));
    {
        let mut n = root.lock().expect("lock poisoned");
        n.set_chain_slot(Arc::downgrade(&root));
        n.on_ready(Some(done.clone()));
    }

    while !fired.load(Ordering::SeqCst) {
        if !core.turn() {
            if fired.load(Ordering::SeqCst) {
                break;
            }
            core.idle_wait();
        }
    }

    let mut cell = ResultCell::empty();
    root.lock().expect("lock poisoned").get(&mut cell);
    cell.into_result()
}

/// Drains the loop until `node` is ready or no non-I/O work remains.
/// Returns readiness. Never blocks on the idle hook.
pub(crate) fn poll_impl<T: Send + 'static>(
    node: &mut Box<dyn PromiseNode<T>>,
    scope: &WaitScope,
) -> bool {
    assert!(
        scope.fiber().is_none(),
        "poll() is not supported inside fibers"
    );
    let core = scope.handle.core.clone();
    let _run = RunGuard::claim(&core);

    let fired = Arc::new(AtomicBool::new(false));
    let done = {
        let fired = fired.clone();
        Event::new(&scope.handle, "poll.done", move || {
            fired.store(true, Ordering::SeqCst);
        })
    };
    node.on_ready(Some(done.clone()));

    while !fired.load(Ordering::SeqCst) {
        if !core.turn() {
            if fired.load(Ordering::SeqCst) {
                break;
            }
            if !core.port_poll() {
                break;
            }
        }
    }

    if fired.load(Ordering::SeqCst) {
        true
    } else {
        node.on_ready(None);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder() -> (Arc<StdMutex<Vec<u32>>>, impl Fn(u32) + Clone) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let push = {
            let log = log.clone();
            move |id: u32| log.lock().expect("lock poisoned").push(id)
        };
        (log, push)
    }

    fn drain(core: &Arc<LoopCore>) {
        while core.turn() {}
    }

    #[test]
    fn breadth_first_is_fifo() {
        let lp = EventLoop::new();
        let (log, push) = recorder();
        let events: Vec<_> = (0..3)
            .map(|i| {
                let push = push.clone();
                Event::new(&lp.handle(), "test", move || push(i))
            })
            .collect();
        for event in &events {
            event.arm(ArmKind::BreadthFirst);
        }
        drain(&lp.core);
        assert_eq!(*log.lock().expect("lock poisoned"), vec![0, 1, 2]);
    }

    #[test]
    fn last_tier_runs_after_breadth() {
        let lp = EventLoop::new();
        let (log, push) = recorder();
        let last = {
            let push = push.clone();
            Event::new(&lp.handle(), "last", move || push(99))
        };
        let breadth = {
            let push = push.clone();
            Event::new(&lp.handle(), "breadth", move || push(1))
        };
        last.arm(ArmKind::Last);
        breadth.arm(ArmKind::BreadthFirst);
        drain(&lp.core);
        assert_eq!(*log.lock().expect("lock poisoned"), vec![1, 99]);
    }

    #[test]
    fn depth_first_cluster_runs_before_older_work() {
        // Property: an event armed depth-first during a fire runs before
        // depth-first events armed prior to that fire and before any
        // breadth-first event. Events armed during one fire keep their
        // arm order.
        let lp = EventLoop::new();
        let handle = lp.handle();
        let (log, push) = recorder();

        let x = {
            let push = push.clone();
            Event::new(&handle, "x", move || push(4))
        };
        let a = {
            let push = push.clone();
            Event::new(&handle, "a", move || push(3))
        };
        let p = {
            let push = push.clone();
            let a = a.clone();
            Event::new(&handle, "p", move || {
                push(2);
                a.arm(ArmKind::DepthFirst);
            })
        };
        let e1 = {
            let push = push.clone();
            let p = p.clone();
            let x = x.clone();
            Event::new(&handle, "e1", move || {
                push(1);
                p.arm(ArmKind::DepthFirst);
                x.arm(ArmKind::DepthFirst);
            })
        };
        let e2 = {
            let push = push.clone();
            Event::new(&handle, "e2", move || push(5))
        };

        e1.arm(ArmKind::BreadthFirst);
        e2.arm(ArmKind::BreadthFirst);
        drain(&lp.core);
        assert_eq!(*log.lock().expect("lock poisoned"), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn disarm_cancels_a_pending_event() {
        let lp = EventLoop::new();
        let (log, push) = recorder();
        let event = Event::new(&lp.handle(), "test", move || push(1));
        event.arm(ArmKind::BreadthFirst);
        event.disarm();
        drain(&lp.core);
        assert!(log.lock().expect("lock poisoned").is_empty());
    }

    #[test]
    fn dropping_the_owner_cancels_a_pending_event() {
        let lp = EventLoop::new();
        let (log, push) = recorder();
        let event = Event::new(&lp.handle(), "test", move || push(1));
        event.arm(ArmKind::BreadthFirst);
        drop(event);
        drain(&lp.core);
        assert!(log.lock().expect("lock poisoned").is_empty());
    }

    #[test]
    fn rearming_a_queued_event_is_idempotent() {
        let lp = EventLoop::new();
        let (log, push) = recorder();
        let event = Event::new(&lp.handle(), "test", move || push(1));
        event.arm(ArmKind::BreadthFirst);
        event.arm(ArmKind::BreadthFirst);
        drain(&lp.core);
        assert_eq!(*log.lock().expect("lock poisoned"), vec![1]);
    }
}
