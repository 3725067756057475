//! Bridge between promises and std futures, in both directions.
//!
//! [`Promise::from_future`] drives any future on the loop: the node is
//! also an event, and the future's waker re-arms that event, from any
//! thread, whenever progress is possible.
//!
//! `Promise<T>` itself implements [`Future`]: each poll registers a
//! direct consumer event that records readiness and wakes the caller's
//! waker. This is what lets async blocks await promises, the stackless
//! counterpart to a fiber's synchronous `wait`.
//!
//! Dropping either side during suspension is clean: the node state and
//! the waker reference each other only weakly, so neither keeps the
//! other alive.

use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};
use std::task::{Context, Poll};

use crate::cell::ResultCell;
use crate::error::{Error, Result};
use crate::event::{waker_for, ArmKind, Event, EventHandle};
use crate::event_loop::{current_loop, LoopHandle};
use crate::node::{OnReadyEvent, PromiseNode, TraceBuilder};
use crate::promise::Promise;

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

struct FutState<T: Send + 'static> {
    future: Option<BoxFuture<T>>,
    result: Option<ResultCell<T>>,
    on_ready: OnReadyEvent,
}

/// A node that polls a future from the loop. The future starts
/// immediately (the event is armed at construction) and its result is
/// settled before the future is dropped.
struct FutureNode<T: Send + 'static> {
    state: Arc<StdMutex<FutState<T>>>,
    _event: EventHandle,
}

impl<T: Send + 'static> FutureNode<T> {
    fn new(future: BoxFuture<T>, handle: &LoopHandle) -> Self {
        let state = Arc::new(StdMutex::new(FutState {
            future: Some(future),
            result: None,
            on_ready: OnReadyEvent::default(),
        }));
        let event_slot: Arc<OnceLock<Weak<Event>>> = Arc::new(OnceLock::new());
        let event = {
            let weak = Arc::downgrade(&state);
            let slot = event_slot.clone();
            Event::new(handle, "future", move || Self::fire(&weak, &slot))
        };
        let _ = event_slot.set(Arc::downgrade(&event));
        event.arm(ArmKind::BreadthFirst);
        Self {
            state,
            _event: event,
        }
    }

    fn fire(weak: &Weak<StdMutex<FutState<T>>>, slot: &OnceLock<Weak<Event>>) {
        let Some(state) = weak.upgrade() else {
            return;
        };
        let Some(event) = slot.get().and_then(Weak::upgrade) else {
            return;
        };
        let mut st = state.lock().expect("lock poisoned");
        let Some(future) = st.future.as_mut() else {
            return;
        };
        let waker = waker_for(&event);
        let mut cx = Context::from_waker(&waker);
        match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => {}
            Ok(Poll::Ready(result)) => {
                st.result = Some(ResultCell::from_result(result));
                st.future = None;
                st.on_ready.arm();
            }
            // A panic inside the polled future rejects the promise; the
            // frame is settled before it is dropped.
            Err(payload) => {
                st.result = Some(ResultCell::from_error(Error::from_panic(payload)));
                st.future = None;
                st.on_ready.arm();
            }
        }
    }
}

impl<T: Send + 'static> PromiseNode<T> for FutureNode<T> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        self.state
            .lock()
            .expect("lock poisoned")
            .on_ready
            .init(event);
    }

    fn get(&mut self, output: &mut ResultCell<T>) {
        let mut st = self.state.lock().expect("lock poisoned");
        *output = st.result.take().expect("future result not ready");
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        trace.push("future", None);
    }
}

impl<T: Send + 'static> Promise<T> {
    /// Lifts a future into a promise driven by the current thread's
    /// loop. The future starts running without waiting for a consumer.
    #[must_use]
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Promise::from_node(Box::new(FutureNode::new(
            Box::pin(future),
            &current_loop(),
        )))
    }
}

impl<T: Send + 'static> Future for Promise<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let fired = Arc::new(AtomicBool::new(false));
        let event = {
            let fired = fired.clone();
            let waker = cx.waker().clone();
            Event::direct("promise.await", move || {
                fired.store(true, Ordering::SeqCst);
                waker.wake_by_ref();
            })
        };
        // Re-registering on every poll replaces the previous waker, as
        // the consumer-registration contract allows. If the node is
        // already ready the registration fires synchronously.
        this.node_mut().on_ready(Some(event));
        if fired.load(Ordering::SeqCst) {
            let mut cell = ResultCell::empty();
            this.node_mut().get(&mut cell);
            Poll::Ready(cell.into_result())
        } else {
            Poll::Pending
        }
    }
}
