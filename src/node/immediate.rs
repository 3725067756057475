//! Leaf nodes with no dependencies.

use core::panic::Location;

use crate::cell::ResultCell;
use crate::error::Error;
use crate::event::{ArmKind, EventHandle};
use crate::node::{PromiseNode, TraceBuilder};

/// A node that is ready from the moment it is constructed.
///
/// Registration arms the consumer on the node's tier: breadth-first for
/// ordinary immediates (so already-resolved work still yields to queued
/// work), or the last tier for `eval_last` style scheduling.
pub(crate) struct ImmediateNode<T> {
    result: Option<ResultCell<T>>,
    tier: ArmKind,
    origin: Option<&'static Location<'static>>,
}

impl<T: Send + 'static> ImmediateNode<T> {
    pub(crate) fn from_cell(cell: ResultCell<T>, origin: &'static Location<'static>) -> Self {
        Self {
            result: Some(cell),
            tier: ArmKind::BreadthFirst,
            origin: Some(origin),
        }
    }

    pub(crate) fn from_error(error: Error) -> Self {
        Self {
            result: Some(ResultCell::from_error(error)),
            tier: ArmKind::BreadthFirst,
            origin: None,
        }
    }

    /// An immediate whose consumers run only once the loop is otherwise
    /// out of work.
    pub(crate) fn last_tier(cell: ResultCell<T>, origin: &'static Location<'static>) -> Self {
        Self {
            result: Some(cell),
            tier: ArmKind::Last,
            origin: Some(origin),
        }
    }
}

impl<T: Send + 'static> PromiseNode<T> for ImmediateNode<T> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        if let Some(event) = event {
            event.arm(self.tier);
        }
    }

    fn get(&mut self, output: &mut ResultCell<T>) {
        *output = self.result.take().expect("immediate result already taken");
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        let label = match self.tier {
            ArmKind::Last => "immediate (last tier)",
            _ => "immediate",
        };
        trace.push(label, self.origin);
    }
}

/// A node that never becomes ready. Consumers registered on it are
/// parked forever; cancellation by drop is the only way out.
pub(crate) struct NeverNode;

impl<T: Send + 'static> PromiseNode<T> for NeverNode {
    fn on_ready(&mut self, _event: Option<EventHandle>) {}

    fn get(&mut self, _output: &mut ResultCell<T>) {
        unreachable!("a never-done node cannot produce a result");
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        trace.push("never", None);
    }
}
