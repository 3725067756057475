//! Fork hub and branches: multi-consumer broadcast of one result.

use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};

use smallvec::SmallVec;

use crate::cell::ResultCell;
use crate::event::{Event, EventHandle};
use crate::event_loop::LoopHandle;
use crate::node::{OnReadyEvent, PromiseNode, TraceBuilder};

/// Per-branch consumer registration. The seat is all the hub needs to
/// notify a branch, so it carries no value type.
pub(crate) struct BranchSeat {
    on_ready: OnReadyEvent,
}

struct HubState<T: Send + 'static> {
    inner: Option<Box<dyn PromiseNode<T>>>,
    result: Option<ResultCell<T>>,
    branches: SmallVec<[Weak<StdMutex<BranchSeat>>; 2]>,
    ready: bool,
}

/// The fan-out point of a fork. Reference counted: the forked promise
/// handle and every branch hold a reference; the hub (and the inner node
/// it owns) dies when the last one goes.
///
/// The hub is itself a loop event: when the inner node becomes ready it
/// extracts once into its own cell, then arms each registered branch and
/// clears the branch list. Branches added afterwards arm immediately.
pub(crate) struct HubCore<T: Send + 'static> {
    state: StdMutex<HubState<T>>,
    event: OnceLock<EventHandle>,
}

impl<T: Send + 'static> HubCore<T> {
    pub(crate) fn new(inner: Box<dyn PromiseNode<T>>, handle: &LoopHandle) -> Arc<Self> {
        let core = Arc::new(Self {
            state: StdMutex::new(HubState {
                inner: Some(inner),
                result: None,
                branches: SmallVec::new(),
                ready: false,
            }),
            event: OnceLock::new(),
        });
        let event = {
            let weak = Arc::downgrade(&core);
            Event::new(handle, "fork.hub", move || Self::fire(&weak))
        };
        let _ = core.event.set(event.clone());
        core.state
            .lock()
            .expect("lock poisoned")
            .inner
            .as_mut()
            .expect("fork hub has no inner")
            .on_ready(Some(event));
        core
    }

    fn fire(weak: &Weak<Self>) {
        let Some(core) = weak.upgrade() else {
            return;
        };
        let seats: Vec<Arc<StdMutex<BranchSeat>>> = {
            let mut st = core.state.lock().expect("lock poisoned");
            if st.ready {
                return;
            }
            let mut cell = ResultCell::empty();
            st.inner
                .as_mut()
                .expect("fork hub fired without inner")
                .get(&mut cell);
            st.result = Some(cell);
            st.ready = true;
            st.branches.drain(..).filter_map(|w| w.upgrade()).collect()
        };
        // Arm outside the hub lock; each branch visited exactly once.
        for seat in seats {
            seat.lock().expect("lock poisoned").on_ready.arm();
        }
    }

    fn register_seat(self: &Arc<Self>) -> Arc<StdMutex<BranchSeat>> {
        let seat = Arc::new(StdMutex::new(BranchSeat {
            on_ready: OnReadyEvent::default(),
        }));
        let mut st = self.state.lock().expect("lock poisoned");
        if st.ready {
            seat.lock().expect("lock poisoned").on_ready.arm();
        } else {
            st.branches.push(Arc::downgrade(&seat));
        }
        seat
    }
}

/// One consumer of a fork: reads the hub's cell by copy on extract.
pub(crate) struct ForkBranch<T: Send + 'static> {
    hub: Option<Arc<HubCore<T>>>,
    seat: Arc<StdMutex<BranchSeat>>,
}

impl<T: Send + 'static> ForkBranch<T> {
    pub(crate) fn new(hub: &Arc<HubCore<T>>) -> Self {
        Self {
            hub: Some(hub.clone()),
            seat: hub.register_seat(),
        }
    }
}

impl<T: Clone + Send + 'static> PromiseNode<T> for ForkBranch<T> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        self.seat.lock().expect("lock poisoned").on_ready.init(event);
    }

    fn get(&mut self, output: &mut ResultCell<T>) {
        // Taking the hub reference releases it once the result is out.
        let hub = self.hub.take().expect("fork branch extracted twice");
        let st = hub.state.lock().expect("lock poisoned");
        let cell = st.result.as_ref().expect("fork hub result missing");
        *output = cell.clone_parts();
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        trace.push("fork.branch", None);
    }
}

/// One branch of a tuple split: moves its own element out of the hub's
/// cell. Exactly one branch exists per element, so each element is
/// produced exactly once.
pub(crate) struct SplitBranch<Tup: Send + 'static, E> {
    hub: Option<Arc<HubCore<Tup>>>,
    seat: Arc<StdMutex<BranchSeat>>,
    pick: fn(&mut Tup) -> Option<E>,
}

impl<Tup: Send + 'static, E> SplitBranch<Tup, E> {
    pub(crate) fn new(hub: &Arc<HubCore<Tup>>, pick: fn(&mut Tup) -> Option<E>) -> Self {
        Self {
            hub: Some(hub.clone()),
            seat: hub.register_seat(),
            pick,
        }
    }
}

impl<Tup: Send + 'static, E: Send + 'static> PromiseNode<E> for SplitBranch<Tup, E> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        self.seat.lock().expect("lock poisoned").on_ready.init(event);
    }

    fn get(&mut self, output: &mut ResultCell<E>) {
        let hub = self.hub.take().expect("split branch extracted twice");
        let mut st = hub.state.lock().expect("lock poisoned");
        let cell = st.result.as_mut().expect("fork hub result missing");
        if let Some(error) = cell.error().cloned() {
            output.add_error(error);
        }
        if let Some(tuple) = cell.value_mut() {
            let element = (self.pick)(tuple).expect("tuple element extracted twice");
            output.set_value(element);
        }
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        trace.push("fork.split", None);
    }
}
