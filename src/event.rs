//! Loop-schedulable events.
//!
//! An [`Event`] is a callback that the loop fires at most once per arming.
//! Events belong to one loop for their whole lifetime; the loop queues
//! hold only weak references, so an event owned by a node dies with the
//! node and simply never fires again. This is the cancellation story for
//! queued work.
//!
//! Two flavors exist:
//!
//! - queue-backed events, placed on one of the loop's three tiers by
//!   [`Event::arm`]
//! - direct events, which fire synchronously when armed; these back the
//!   std `Waker` bridge and the wait driver's done flag, where queueing a
//!   turn would add nothing

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Wake, Waker};

use crate::event_loop::{LoopCore, LoopHandle};

/// The scheduling tier an event is armed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArmKind {
    /// Continuations of a just-completed computation. Events armed
    /// depth-first during a fire land at the queue front in arm order,
    /// clustering a causal chain.
    DepthFirst,
    /// Yielded work; always appended.
    BreadthFirst,
    /// Runs only once there is nothing else to do.
    Last,
}

enum Backend {
    Queue(Weak<LoopCore>),
    Direct,
}

/// A loop-resident callback with a single `fire` entry point.
pub(crate) struct Event {
    name: &'static str,
    armed: AtomicBool,
    backend: Backend,
    fire: Box<dyn Fn() + Send + Sync>,
}

/// Shared handle to an event. Owners hold it strongly; queues weakly.
pub(crate) type EventHandle = Arc<Event>;

impl Event {
    /// Creates a queue-backed event bound to `handle`'s loop.
    pub(crate) fn new(
        handle: &LoopHandle,
        name: &'static str,
        fire: impl Fn() + Send + Sync + 'static,
    ) -> EventHandle {
        Arc::new(Self {
            name,
            armed: AtomicBool::new(false),
            backend: Backend::Queue(Arc::downgrade(&handle.core)),
            fire: Box::new(fire),
        })
    }

    /// Creates a direct event: arming fires it immediately on the arming
    /// thread. Used where the callback only flips a flag or wakes a
    /// `Waker`, never where it runs user code.
    pub(crate) fn direct(
        name: &'static str,
        fire: impl Fn() + Send + Sync + 'static,
    ) -> EventHandle {
        Arc::new(Self {
            name,
            armed: AtomicBool::new(false),
            backend: Backend::Direct,
            fire: Box::new(fire),
        })
    }

    /// Enqueues the event on the given tier. Idempotent while queued:
    /// re-arming an already-armed event is a no-op, which lets wakers
    /// fire redundantly without double-scheduling.
    pub(crate) fn arm(self: &Arc<Self>, kind: ArmKind) {
        match &self.backend {
            Backend::Direct => (self.fire)(),
            Backend::Queue(core) => {
                let Some(core) = core.upgrade() else {
                    // The loop is gone; arming is moot.
                    return;
                };
                if self.armed.swap(true, Ordering::AcqRel) {
                    return;
                }
                core.enqueue(kind, Arc::downgrade(self));
            }
        }
    }

    /// Cancels a pending arming without firing. The queue entry is
    /// removed lazily when the loop reaches it.
    pub(crate) fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    /// Called by the loop when popping this event. Clears the armed flag
    /// and reports whether the event was still live.
    pub(crate) fn begin_fire(&self) -> bool {
        self.armed.swap(false, Ordering::AcqRel)
    }

    /// Invokes the callback. The loop holds a strong handle for the
    /// duration, so an event whose owner disappears mid-fire is dropped
    /// only after the callback returns.
    pub(crate) fn fire(&self) {
        (self.fire)();
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }
}

struct EventWaker {
    event: Weak<Event>,
}

impl Wake for EventWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        if let Some(event) = self.event.upgrade() {
            event.arm(ArmKind::BreadthFirst);
        }
    }
}

/// Builds a std `Waker` that arms `event` breadth-first when woken.
/// Safe to invoke from any thread.
pub(crate) fn waker_for(event: &EventHandle) -> Waker {
    Waker::from(Arc::new(EventWaker {
        event: Arc::downgrade(event),
    }))
}
