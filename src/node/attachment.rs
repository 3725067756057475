//! Pass-through node that keeps cargo alive for the life of the subtree.

use crate::cell::ResultCell;
use crate::event::EventHandle;
use crate::node::{PromiseNode, TraceBuilder};

/// Forwards everything to the dependency while owning an arbitrary cargo
/// object. Field order matters: the dependency is declared first so it is
/// torn down before the cargo in every destruction path, because the
/// dependency may still borrow the cargo (e.g. a buffer used by the
/// computation).
pub(crate) struct AttachmentNode<T: Send + 'static, A> {
    dependency: Box<dyn PromiseNode<T>>,
    _cargo: A,
}

impl<T: Send + 'static, A: Send + 'static> AttachmentNode<T, A> {
    pub(crate) fn new(dependency: Box<dyn PromiseNode<T>>, cargo: A) -> Self {
        Self {
            dependency,
            _cargo: cargo,
        }
    }
}

impl<T: Send + 'static, A: Send + 'static> PromiseNode<T> for AttachmentNode<T, A> {
    fn on_ready(&mut self, event: Option<EventHandle>) {
        self.dependency.on_ready(event);
    }

    fn get(&mut self, output: &mut ResultCell<T>) {
        self.dependency.get(output);
    }

    fn trace_into(&self, trace: &mut TraceBuilder) {
        trace.push("attachment", None);
        self.dependency.trace_into(trace);
    }
}
