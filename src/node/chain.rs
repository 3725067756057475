//! The chain node: flattens a promise whose value is another promise.

use core::panic::Location;
use std::mem;
use std::sync::{Arc, Mutex as StdMutex, Weak};

use crate::cell::ResultCell;
use crate::event::{Event, EventHandle};
use crate::event_loop::LoopHandle;
use crate::node::immediate::ImmediateNode;
use crate::node::{ChainSlot, PromiseNode, TraceBuilder};
use crate::promise::Promise;

enum Step<T: Send + 'static> {
    /// Owns a node whose eventual value is another promise.
    One(Box<dyn PromiseNode<Promise<T>>>),
    /// Owns the unwrapped inner node, kept in a shared slot so that a
    /// nested chain can splice itself out of the ownership path.
    Two(Arc<StdMutex<Box<dyn PromiseNode<T>>>>),
    /// Transient while the step-one fire is in progress.
    Transitioning,
}

struct ChainState<T: Send + 'static> {
    step: Step<T>,
    /// Consumer registered during step one; it moves onto the inner node
    /// at the transition and survives any collapse.
    consumer: Option<EventHandle>,
    /// The owner slot this chain occupies, when the owner is another
    /// chain or the wait driver root.
    self_slot: Option<ChainSlot<T>>,
    origin: &'static Location<'static>,
}

/// Reduces `Promise<Promise<T>>` to `Promise<T>`.
///
/// The chain registers its own event as the step-one dependency's
/// consumer at construction, so flattening proceeds without an external
/// consumer. When the inner promise arrives, the chain adopts its node;
/// if the chain itself sits in a shared owner slot, it instead replaces
/// the slot's content with that node and vanishes, which bounds memory
/// for arbitrarily deep promise-returning recursion.
pub(crate) struct ChainNode<T: Send + 'static> {
    state: Arc<StdMutex<ChainState<T>>>,
    _event: EventHandle,
}

impl<T: Send + 'static> ChainNode<T> {
    pub(crate) fn new(
        inner: Box<dyn PromiseNode<Promise<T>>>,
        handle: &LoopHandle,
        origin: &'static Location<'static>,
    ) -> Self {
        let state = Arc::new(StdMutex::new(ChainState {
            step: Step::One(inner),
            consumer: None,
            self_slot: None,
            origin,
        }));
        let event = {
            let weak = Arc::downgrade(&state);
            Event::new(handle, "chain", move || Self::fire(&weak))
        };
        {
            let mut st = state.lock().expect("lock poisoned");
            if let Step::One(inner) = &mut st.step {
                inner.on_ready(Some(event.clone()));
            }
        }
        Self {
            state,
            _event: event,
        }
    }

    fn fire(weak: &Weak<StdMutex<ChainState<T>>>) {
        let Some(state_arc) = weak.upgrade() else {
            return;
        };

        let mut inner = {
            let mut st = state_arc.lock().expect("lock poisoned");
            match mem::replace(&mut st.step, Step::Transitioning) {
                Step::One(inner) => inner,
                other => {
                    st.step = other;
                    return;
                }
            }
        };

        let mut cell = ResultCell::<Promise<T>>::empty();
        inner.get(&mut cell);
        drop(inner);

        let (value, error) = cell.split();
        let mut new_inner: Box<dyn PromiseNode<T>> = match (value, error) {
            // An error short-circuits; the value leg is discarded.
            (_, Some(error)) => Box::new(ImmediateNode::from_error(error)),
            (Some(promise), None) => promise.into_node(),
            (None, None) => panic!("chain dependency was ready with neither value nor error"),
        };

        let mut st = state_arc.lock().expect("lock poisoned");
        let consumer = st.consumer.take();

        if let Some(slot_weak) = st.self_slot.take() {
            if let Some(slot) = slot_weak.upgrade() {
                // Collapse: hand the unwrapped node to our owner's slot
                // and vanish. Replacing the slot content drops this chain
                // node; the firing event keeps the state alive until the
                // fire returns.
                new_inner.set_chain_slot(slot_weak);
                if let Some(consumer) = consumer {
                    new_inner.on_ready(Some(consumer));
                }
                drop(st);
                *slot.lock().expect("lock poisoned") = new_inner;
                return;
            }
        }

        let slot = Arc::new(StdMutex::new(new_inner));
        {
            let mut guard = slot.lock().expect("lock poisoned");
            guard.set_chain_slot(Arc::downgrade(&slot));
            if let Some(consumer) = consumer {
                guard.on_ready(Some(consumer));
            }
        }
        st.step = Step::Two(slot);
    }
}

impl<T: Send + 'static> PromiseNode<T> for ChainNode<T> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        let mut guard = self.state.lock().expect("lock poisoned");
        let st = &mut *guard;
        match &st.step {
            Step::Two(slot) => slot.lock().expect("lock poisoned").on_ready(event),
            _ => st.consumer = event,
        }
    }

    fn get(&mut self, output: &mut ResultCell<T>) {
        let st = self.state.lock().expect("lock poisoned");
        match &st.step {
            Step::Two(slot) => slot.lock().expect("lock poisoned").get(output),
            _ => panic!("chain node extracted before readiness"),
        }
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        let st = self.state.lock().expect("lock poisoned");
        trace.push("chain", Some(st.origin));
        match &st.step {
            Step::One(inner) => inner.trace_into(trace),
            Step::Two(slot) => slot.lock().expect("lock poisoned").trace_into(trace),
            Step::Transitioning => {}
        }
    }

    fn set_chain_slot(&mut self, slot: ChainSlot<T>) {
        // If the transition already happened the slot is never read; the
        // chain then stays as a plain indirection.
        self.state.lock().expect("lock poisoned").self_slot = Some(slot);
    }
}
