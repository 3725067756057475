//! The node graph behind promises.
//!
//! A promise owns a tree of nodes; combinators wrap nodes into deeper
//! nodes; the loop drives the tree through consumer events. Nodes are
//! passive: they never call into the loop except to arm a registered
//! consumer, and they produce their result exactly once, into a
//! caller-provided [`ResultCell`], only after signalling readiness.
//!
//! Ownership is strict: every node has exactly one owner, either the
//! user-facing promise handle or a parent node. Dropping the owner drops
//! the subtree, which is the sole cancellation mechanism.

use core::fmt;
use core::panic::Location;
use std::mem;
use std::sync::{Mutex as StdMutex, Weak};

use smallvec::SmallVec;

use crate::cell::ResultCell;
use crate::event::{ArmKind, EventHandle};

pub(crate) mod adapter;
pub(crate) mod attachment;
pub(crate) mod chain;
pub(crate) mod eager;
pub(crate) mod fork;
pub(crate) mod immediate;
pub(crate) mod join;
pub(crate) mod transform;

/// A shared owner slot, used by chain nodes to collapse themselves.
pub(crate) type ChainSlot<T> = Weak<StdMutex<Box<dyn PromiseNode<T>>>>;

/// The uniform node contract.
pub(crate) trait PromiseNode<T: Send + 'static>: Send {
    /// Registers `event` to be armed when this node becomes ready.
    ///
    /// Re-registering replaces the previous event; the old one is
    /// silently orphaned. `None` clears the slot. If the node is already
    /// ready, the registration arms `event` immediately (breadth-first).
    fn on_ready(&mut self, event: Option<EventHandle>);

    /// Moves the result into `output`.
    ///
    /// Called by the loop, at most once, after readiness was signalled,
    /// with no application frames on the stack. If the dependency settled
    /// with both a value and an error, both are forwarded.
    fn get(&mut self, output: &mut ResultCell<T>);

    /// Appends this node's origin to a trace of the promise graph.
    fn trace_into(&self, trace: &mut TraceBuilder);

    /// Informs the node of the shared slot that owns it. Only chain
    /// nodes react; they use the slot to splice themselves out.
    fn set_chain_slot(&mut self, _slot: ChainSlot<T>) {}
}

/// Helper implementing the consumer-registration half of the node
/// contract: one optional event pointer plus a latched ready bit.
#[derive(Default)]
pub(crate) enum OnReadyEvent {
    /// No consumer registered, not ready.
    #[default]
    Idle,
    /// A consumer is registered and waiting.
    Waiting(EventHandle),
    /// Readiness was signalled; late registrations arm immediately.
    Ready,
}

impl OnReadyEvent {
    /// Implements `on_ready` for the owning node.
    pub(crate) fn init(&mut self, event: Option<EventHandle>) {
        if matches!(self, Self::Ready) {
            if let Some(event) = event {
                event.arm(ArmKind::BreadthFirst);
            }
            return;
        }
        *self = match event {
            Some(event) => Self::Waiting(event),
            None => Self::Idle,
        };
    }

    /// Signals readiness, arming any registered consumer depth-first.
    pub(crate) fn arm(&mut self) {
        self.fire(ArmKind::DepthFirst);
    }

    /// Signals readiness, arming any registered consumer breadth-first.
    pub(crate) fn arm_breadth_first(&mut self) {
        self.fire(ArmKind::BreadthFirst);
    }

    fn fire(&mut self, kind: ArmKind) {
        if let Self::Waiting(event) = mem::replace(self, Self::Ready) {
            event.arm(kind);
        }
    }
}

/// One frame of a promise trace: a node label plus the user call site
/// that created it, when one was captured.
pub(crate) struct TraceFrame {
    label: &'static str,
    origin: Option<&'static Location<'static>>,
}

/// Accumulates the chain of nodes behind a promise for debugging.
#[derive(Default)]
pub struct TraceBuilder {
    frames: SmallVec<[TraceFrame; 8]>,
}

impl TraceBuilder {
    pub(crate) fn push(&mut self, label: &'static str, origin: Option<&'static Location<'static>>) {
        self.frames.push(TraceFrame { label, origin });
    }
}

impl fmt::Display for TraceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            match frame.origin {
                Some(origin) => {
                    writeln!(f, "{} @ {}:{}", frame.label, origin.file(), origin.line())?;
                }
                None => writeln!(f, "{}", frame.label)?,
            }
        }
        Ok(())
    }
}
