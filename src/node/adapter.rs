//! Adapter nodes: promises fulfilled from outside the graph.
//!
//! An adapter node owns an application-supplied adapter object and hands
//! it a [`Fulfiller`]. The first of `fulfill` or `reject` makes the node
//! ready and arms its consumer breadth-first; later calls are ignored.
//! Dropping the node synchronously drops the adapter, whose destructor is
//! the cancellation signal.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use crate::cell::ResultCell;
use crate::error::{run_catching, Error, Result};
use crate::event::EventHandle;
use crate::node::{OnReadyEvent, PromiseNode, TraceBuilder};

pub(crate) struct AdapterState<T: Send + 'static> {
    result: Option<ResultCell<T>>,
    waiting: bool,
    on_ready: OnReadyEvent,
}

/// The external driver of an adapter node.
///
/// Holds only a weak reference: a fulfiller outliving its promise becomes
/// inert rather than keeping the computation alive.
pub struct Fulfiller<T: Send + 'static> {
    state: Weak<StdMutex<AdapterState<T>>>,
}

impl<T: Send + 'static> Clone for Fulfiller<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T: Send + 'static> Fulfiller<T> {
    /// Resolves the promise with a value. Ignored if already resolved or
    /// if the promise was dropped.
    pub fn fulfill(&self, value: T) {
        self.resolve(ResultCell::from_value(value));
    }

    /// Rejects the promise with an error. Ignored if already resolved or
    /// if the promise was dropped.
    pub fn reject(&self, error: Error) {
        self.resolve(ResultCell::from_error(error));
    }

    /// Returns true while the promise is still unresolved and alive.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        match self.state.upgrade() {
            Some(state) => state.lock().expect("lock poisoned").waiting,
            None => false,
        }
    }

    /// Runs `f`, rejecting the promise if it returns an error or panics.
    /// Returns true if `f` completed cleanly.
    pub fn reject_if_throws(&self, f: impl FnOnce() -> Result<()>) -> bool {
        match run_catching(f) {
            Ok(()) => true,
            Err(error) => {
                self.reject(error);
                false
            }
        }
    }

    fn resolve(&self, cell: ResultCell<T>) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut st = state.lock().expect("lock poisoned");
        if !st.waiting {
            return;
        }
        st.waiting = false;
        st.result = Some(cell);
        st.on_ready.arm_breadth_first();
    }
}

/// A node driven by an application adapter. The state is declared before
/// the adapter so the adapter observes a dead fulfiller in its own drop.
pub(crate) struct AdapterNode<T: Send + 'static, A> {
    state: Arc<StdMutex<AdapterState<T>>>,
    _adapter: A,
}

impl<T: Send + 'static, A: Send + 'static> AdapterNode<T, A> {
    pub(crate) fn new(build: impl FnOnce(Fulfiller<T>) -> A) -> Self {
        let state = Arc::new(StdMutex::new(AdapterState {
            result: None,
            waiting: true,
            on_ready: OnReadyEvent::default(),
        }));
        let fulfiller = Fulfiller {
            state: Arc::downgrade(&state),
        };
        let adapter = build(fulfiller);
        Self {
            state,
            _adapter: adapter,
        }
    }
}

impl<T: Send + 'static, A: Send + 'static> PromiseNode<T> for AdapterNode<T, A> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        self.state
            .lock()
            .expect("lock poisoned")
            .on_ready
            .init(event);
    }

    fn get(&mut self, output: &mut ResultCell<T>) {
        let mut st = self.state.lock().expect("lock poisoned");
        assert!(!st.waiting, "adapter node extracted while still waiting");
        *output = st.result.take().expect("adapter result already taken");
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        trace.push("adapter", None);
    }
}

/// Detachable fulfiller handle returned by
/// [`new_promise_and_fulfiller`](crate::new_promise_and_fulfiller).
///
/// Dropping the handle while the promise is still waiting rejects it
/// with a `Cancelled`-kind error, so an abandoned promise fails instead
/// of leaking. The promise side and the handle side each hold one
/// reference; whichever drops last releases the shared state.
pub struct PromiseFulfiller<T: Send + 'static> {
    inner: Fulfiller<T>,
}

impl<T: Send + 'static> PromiseFulfiller<T> {
    pub(crate) fn new(inner: Fulfiller<T>) -> Self {
        Self { inner }
    }

    /// Resolves the promise with a value.
    pub fn fulfill(&self, value: T) {
        self.inner.fulfill(value);
    }

    /// Rejects the promise with an error.
    pub fn reject(&self, error: Error) {
        self.inner.reject(error);
    }

    /// Returns true while the promise is still unresolved and alive.
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.inner.is_waiting()
    }

    /// Runs `f`, rejecting the promise if it returns an error or panics.
    pub fn reject_if_throws(&self, f: impl FnOnce() -> Result<()>) -> bool {
        self.inner.reject_if_throws(f)
    }
}

impl<T: Send + 'static> Drop for PromiseFulfiller<T> {
    fn drop(&mut self) {
        if self.inner.is_waiting() {
            self.inner.reject(Error::cancelled(
                "promise fulfiller was dropped without resolving the promise",
            ));
        }
    }
}
