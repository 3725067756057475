//! Join nodes: first-of-two selection and N-way aggregation.

use core::panic::Location;
use std::mem;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use crate::cell::ResultCell;
use crate::event::{Event, EventHandle};
use crate::event_loop::LoopHandle;
use crate::node::{OnReadyEvent, PromiseNode, TraceBuilder};

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

struct ExclusiveState<T: Send + 'static> {
    left: Option<Box<dyn PromiseNode<T>>>,
    right: Option<Box<dyn PromiseNode<T>>>,
    left_event: Option<EventHandle>,
    right_event: Option<EventHandle>,
    result: Option<ResultCell<T>>,
    on_ready: OnReadyEvent,
    origin: &'static Location<'static>,
}

/// First-of-two selector. The first child to become ready extracts into
/// the join's cell; the loser is disarmed and deregistered, never
/// extracted, and its subtree is discarded when the join drops.
pub(crate) struct ExclusiveJoinNode<T: Send + 'static> {
    state: Arc<StdMutex<ExclusiveState<T>>>,
}

impl<T: Send + 'static> ExclusiveJoinNode<T> {
    pub(crate) fn new(
        left: Box<dyn PromiseNode<T>>,
        right: Box<dyn PromiseNode<T>>,
        handle: &LoopHandle,
        origin: &'static Location<'static>,
    ) -> Self {
        let state = Arc::new(StdMutex::new(ExclusiveState {
            left: Some(left),
            right: Some(right),
            left_event: None,
            right_event: None,
            result: None,
            on_ready: OnReadyEvent::default(),
            origin,
        }));
        let left_event = {
            let weak = Arc::downgrade(&state);
            Event::new(handle, "join.left", move || Self::fire(&weak, Side::Left))
        };
        let right_event = {
            let weak = Arc::downgrade(&state);
            Event::new(handle, "join.right", move || Self::fire(&weak, Side::Right))
        };
        {
            let mut st = state.lock().expect("lock poisoned");
            st.left
                .as_mut()
                .expect("join has no left child")
                .on_ready(Some(left_event.clone()));
            st.right
                .as_mut()
                .expect("join has no right child")
                .on_ready(Some(right_event.clone()));
            st.left_event = Some(left_event);
            st.right_event = Some(right_event);
        }
        Self { state }
    }

    fn fire(weak: &Weak<StdMutex<ExclusiveState<T>>>, side: Side) {
        let Some(state) = weak.upgrade() else {
            return;
        };
        let mut st = state.lock().expect("lock poisoned");
        if st.result.is_some() {
            return;
        }
        let mut cell = ResultCell::empty();
        match side {
            Side::Left => {
                st.left
                    .as_mut()
                    .expect("join winner already taken")
                    .get(&mut cell);
                if let Some(event) = st.right_event.take() {
                    event.disarm();
                }
                if let Some(loser) = st.right.as_mut() {
                    loser.on_ready(None);
                }
            }
            Side::Right => {
                st.right
                    .as_mut()
                    .expect("join winner already taken")
                    .get(&mut cell);
                if let Some(event) = st.left_event.take() {
                    event.disarm();
                }
                if let Some(loser) = st.left.as_mut() {
                    loser.on_ready(None);
                }
            }
        }
        st.result = Some(cell);
        st.on_ready.arm();
    }
}

impl<T: Send + 'static> PromiseNode<T> for ExclusiveJoinNode<T> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        self.state
            .lock()
            .expect("lock poisoned")
            .on_ready
            .init(event);
    }

    fn get(&mut self, output: &mut ResultCell<T>) {
        let mut st = self.state.lock().expect("lock poisoned");
        *output = st.result.take().expect("exclusive join result missing");
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        let st = self.state.lock().expect("lock poisoned");
        trace.push("exclusive-join", Some(st.origin));
    }
}

struct JoinSlot<T: Send + 'static> {
    node: Option<Box<dyn PromiseNode<T>>>,
    cell: ResultCell<T>,
}

struct ArrayState<T: Send + 'static> {
    slots: Vec<JoinSlot<T>>,
    /// Branch events, kept alive for the life of the join.
    events: Vec<EventHandle>,
    remaining: usize,
    on_ready: OnReadyEvent,
    origin: &'static Location<'static>,
}

/// N-way all-of collector. Each dependency settles into its own cell;
/// the consumer is armed exactly when all of them have settled, success
/// or failure, with no early abort. On extract, the first error in index
/// order wins; otherwise the values aggregate in order.
pub(crate) struct ArrayJoinNode<T: Send + 'static> {
    state: Arc<StdMutex<ArrayState<T>>>,
}

impl<T: Send + 'static> ArrayJoinNode<T> {
    pub(crate) fn new(
        nodes: Vec<Box<dyn PromiseNode<T>>>,
        handle: &LoopHandle,
        origin: &'static Location<'static>,
    ) -> Self {
        let count = nodes.len();
        let state = Arc::new(StdMutex::new(ArrayState {
            slots: nodes
                .into_iter()
                .map(|node| JoinSlot {
                    node: Some(node),
                    cell: ResultCell::empty(),
                })
                .collect(),
            events: Vec::with_capacity(count),
            remaining: count,
            on_ready: OnReadyEvent::default(),
            origin,
        }));
        {
            let mut st = state.lock().expect("lock poisoned");
            if count == 0 {
                st.on_ready.arm();
            }
            for index in 0..count {
                let event = {
                    let weak = Arc::downgrade(&state);
                    Event::new(handle, "join.branch", move || Self::fire(&weak, index))
                };
                st.slots[index]
                    .node
                    .as_mut()
                    .expect("join slot has no node")
                    .on_ready(Some(event.clone()));
                st.events.push(event);
            }
        }
        Self { state }
    }

    fn fire(weak: &Weak<StdMutex<ArrayState<T>>>, index: usize) {
        let Some(state) = weak.upgrade() else {
            return;
        };
        let mut st = state.lock().expect("lock poisoned");
        let Some(mut node) = st.slots[index].node.take() else {
            return;
        };
        node.get(&mut st.slots[index].cell);
        // The spent dependency stays owned until the join drops.
        st.slots[index].node = Some(node);
        st.remaining -= 1;
        if st.remaining == 0 {
            st.on_ready.arm();
        }
    }
}

impl<T: Send + 'static> PromiseNode<Vec<T>> for ArrayJoinNode<T> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        self.state
            .lock()
            .expect("lock poisoned")
            .on_ready
            .init(event);
    }

    fn get(&mut self, output: &mut ResultCell<Vec<T>>) {
        let mut st = self.state.lock().expect("lock poisoned");
        if let Some(pos) = st.slots.iter().position(|slot| slot.cell.has_error()) {
            let (_, error) = mem::take(&mut st.slots[pos].cell).split();
            output.add_error(error.expect("error vanished"));
            return;
        }
        let values = st
            .slots
            .iter_mut()
            .map(|slot| {
                mem::take(&mut slot.cell)
                    .split()
                    .0
                    .expect("join branch settled with neither value nor error")
            })
            .collect();
        output.set_value(values);
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        let st = self.state.lock().expect("lock poisoned");
        trace.push("array-join", Some(st.origin));
    }
}
