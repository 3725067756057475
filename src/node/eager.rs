//! Eager evaluation: drive a computation that has no consumer yet.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use crate::cell::ResultCell;
use crate::event::{Event, EventHandle};
use crate::event_loop::LoopHandle;
use crate::node::{OnReadyEvent, PromiseNode, TraceBuilder};

struct EagerState<T: Send + 'static> {
    dependency: Option<Box<dyn PromiseNode<T>>>,
    result: Option<ResultCell<T>>,
    on_ready: OnReadyEvent,
}

/// Registers itself as the dependency's consumer at construction, so the
/// wrapped computation progresses even while nobody is subscribed. The
/// extracted result parks in the node's own cell until a consumer shows
/// up.
pub(crate) struct EagerNode<T: Send + 'static> {
    state: Arc<StdMutex<EagerState<T>>>,
    _event: EventHandle,
}

impl<T: Send + 'static> EagerNode<T> {
    pub(crate) fn new(dependency: Box<dyn PromiseNode<T>>, handle: &LoopHandle) -> Self {
        let state = Arc::new(StdMutex::new(EagerState {
            dependency: Some(dependency),
            result: None,
            on_ready: OnReadyEvent::default(),
        }));
        let event = {
            let weak = Arc::downgrade(&state);
            Event::new(handle, "eager", move || Self::fire(&weak))
        };
        state
            .lock()
            .expect("lock poisoned")
            .dependency
            .as_mut()
            .expect("eager node has no dependency")
            .on_ready(Some(event.clone()));
        Self {
            state,
            _event: event,
        }
    }

    fn fire(weak: &Weak<StdMutex<EagerState<T>>>) {
        let Some(state) = weak.upgrade() else {
            return;
        };
        let mut st = state.lock().expect("lock poisoned");
        if st.result.is_some() {
            return;
        }
        let mut cell = ResultCell::empty();
        st.dependency
            .as_mut()
            .expect("eager node fired without dependency")
            .get(&mut cell);
        st.result = Some(cell);
        st.on_ready.arm();
    }
}

impl<T: Send + 'static> PromiseNode<T> for EagerNode<T> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        self.state
            .lock()
            .expect("lock poisoned")
            .on_ready
            .init(event);
    }

    fn get(&mut self, output: &mut ResultCell<T>) {
        let mut st = self.state.lock().expect("lock poisoned");
        *output = st.result.take().expect("eager result not ready");
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        trace.push("eager", None);
    }
}
