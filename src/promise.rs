//! The user-facing promise handle and its combinators.
//!
//! A `Promise<T>` owns the root of a node tree. Combinators consume the
//! promise and hand back a deeper one; dropping a promise drops the tree,
//! which cancels all work it owned. Combinators that allocate an internal
//! loop event (`then`, `fork`, joins, `eagerly_evaluate`, fibers) must run
//! on a thread that has entered a loop, i.e. while a
//! [`WaitScope`](crate::WaitScope) exists; value-only combinators such as
//! [`map`](Promise::map) work anywhere.

use core::panic::Location;
use std::sync::Arc;

use crate::cell::ResultCell;
use crate::error::{run_catching, Error, Result};
use crate::event_loop::{current_loop, poll_impl, wait_impl, WaitScope};
use crate::node::adapter::{AdapterNode, Fulfiller, PromiseFulfiller};
use crate::node::attachment::AttachmentNode;
use crate::node::chain::ChainNode;
use crate::node::eager::EagerNode;
use crate::node::fork::{ForkBranch, HubCore, SplitBranch};
use crate::node::immediate::{ImmediateNode, NeverNode};
use crate::node::join::{ArrayJoinNode, ExclusiveJoinNode};
use crate::node::transform::TransformNode;
use crate::node::{PromiseNode, TraceBuilder};

/// A deferred value-or-error.
pub struct Promise<T: Send + 'static> {
    node: Box<dyn PromiseNode<T>>,
}

impl<T: Send + 'static> Promise<T> {
    pub(crate) fn from_node(node: Box<dyn PromiseNode<T>>) -> Self {
        Self { node }
    }

    pub(crate) fn into_node(self) -> Box<dyn PromiseNode<T>> {
        self.node
    }

    pub(crate) fn node_mut(&mut self) -> &mut Box<dyn PromiseNode<T>> {
        &mut self.node
    }

    /// A promise already resolved to `value`.
    #[must_use]
    #[track_caller]
    pub fn ok(value: T) -> Self {
        Self::from_node(Box::new(ImmediateNode::from_cell(
            ResultCell::from_value(value),
            Location::caller(),
        )))
    }

    /// A promise already rejected with `error`.
    #[must_use]
    #[track_caller]
    pub fn err(error: Error) -> Self {
        Self::from_node(Box::new(ImmediateNode::from_cell(
            ResultCell::from_error(error),
            Location::caller(),
        )))
    }

    /// Transforms the eventual value with `f`. Errors pass through; a
    /// panic in `f` becomes the error leg of the result.
    #[must_use]
    #[track_caller]
    pub fn map<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.try_map(move |value| Ok(f(value)))
    }

    /// Like [`map`](Self::map) but the continuation may fail.
    #[must_use]
    #[track_caller]
    pub fn try_map<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U> + Send + 'static,
    {
        Promise::from_node(Box::new(TransformNode::new(
            self.node,
            Box::new(f),
            Box::new(|error| Err(error)),
            Location::caller(),
        )))
    }

    /// Handles the eventual error with `e`, which may recover by
    /// returning `Ok` or propagate by returning `Err`. Values pass
    /// through untouched.
    #[must_use]
    #[track_caller]
    pub fn catch_<E>(self, e: E) -> Promise<T>
    where
        E: FnOnce(Error) -> Result<T> + Send + 'static,
    {
        Promise::from_node(Box::new(TransformNode::new(
            self.node,
            Box::new(|value| Ok(value)),
            Box::new(e),
            Location::caller(),
        )))
    }

    /// Chains a promise-returning continuation, flattening the result.
    #[must_use]
    #[track_caller]
    pub fn then<U, F>(self, f: F) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
    {
        self.then_catch(f, |error| Promise::err(error))
    }

    /// The full two-leg form: `f` consumes the value, `e` consumes the
    /// error, both returning promises that are flattened into the result.
    /// If the dependency settled with a value and a recoverable error,
    /// the error leg runs.
    #[must_use]
    #[track_caller]
    pub fn then_catch<U, F, E>(self, f: F, e: E) -> Promise<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Promise<U> + Send + 'static,
        E: FnOnce(Error) -> Promise<U> + Send + 'static,
    {
        let origin = Location::caller();
        let intermediate = TransformNode::new(
            self.node,
            Box::new(move |value| Ok(f(value))),
            Box::new(move |error| Ok(e(error))),
            origin,
        );
        Promise::from_node(Box::new(ChainNode::new(
            Box::new(intermediate),
            &current_loop(),
            origin,
        )))
    }

    /// Drives the loop until this promise settles, then returns the
    /// value or error. Inside a fiber this suspends the fiber instead of
    /// draining the loop.
    pub fn wait(self, scope: &mut WaitScope) -> Result<T> {
        wait_impl(self.node, scope)
    }

    /// Drains the loop until this promise is ready or there is no
    /// non-I/O work left. Returns readiness without consuming the
    /// promise. Never blocks on the idle hook.
    pub fn poll(&mut self, scope: &mut WaitScope) -> bool {
        poll_impl(&mut self.node, scope)
    }

    /// Converts this promise into a shareable hub from which branches
    /// can be spawned.
    #[must_use]
    #[track_caller]
    pub fn fork(self) -> ForkedPromise<T>
    where
        T: Clone,
    {
        ForkedPromise {
            hub: HubCore::new(self.node, &current_loop()),
        }
    }

    /// Resolves to whichever of the two promises settles first; the
    /// loser is disarmed and its result discarded.
    #[must_use]
    #[track_caller]
    pub fn exclusive_join(self, other: Promise<T>) -> Promise<T> {
        Promise::from_node(Box::new(ExclusiveJoinNode::new(
            self.node,
            other.node,
            &current_loop(),
            Location::caller(),
        )))
    }

    /// Keeps `cargo` alive until this promise's subtree is torn down.
    /// The subtree is destroyed before the cargo.
    #[must_use]
    pub fn attach<A: Send + 'static>(self, cargo: A) -> Promise<T> {
        Promise::from_node(Box::new(AttachmentNode::new(self.node, cargo)))
    }

    /// Starts evaluating immediately, even before a consumer subscribes.
    /// Pair with [`catch_`](Self::catch_) to observe failures of a
    /// side-effecting chain.
    #[must_use]
    #[track_caller]
    pub fn eagerly_evaluate(self) -> Promise<T> {
        Promise::from_node(Box::new(EagerNode::new(self.node, &current_loop())))
    }

    /// Hands the promise to the loop's daemon set with an error-handler
    /// tail, so an unobserved failure is never silent. The daemon is
    /// cancelled when the loop is dropped.
    #[track_caller]
    pub fn detach<H>(self, handler: H)
    where
        H: FnOnce(Error) + Send + 'static,
    {
        let handle = current_loop();
        let id = handle.core.daemon_reserve_id();
        let core = Arc::downgrade(&handle.core);
        let tail = self
            .then_catch(
                |_value| Promise::ok(()),
                move |error| {
                    handler(error);
                    Promise::ok(())
                },
            )
            .map(move |()| {
                if let Some(core) = core.upgrade() {
                    core.daemon_remove(id);
                }
            });
        let node: Box<dyn PromiseNode<()>> = Box::new(EagerNode::new(tail.node, &handle));
        handle.core.daemon_insert(id, node);
    }

    /// Renders the chain of nodes behind this promise, with the user
    /// call sites that created them.
    #[must_use]
    pub fn trace(&self) -> String {
        let mut builder = TraceBuilder::default();
        self.node.trace_into(&mut builder);
        builder.to_string()
    }
}

impl<T: Send + 'static> From<Result<T>> for Promise<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Self::ok(value),
            Err(error) => Self::err(error),
        }
    }
}

/// Conversion into a promise; implemented for promises themselves and
/// for `Result`, so APIs like
/// [`Executor::execute_sync`](crate::Executor::execute_sync) accept
/// either a plain outcome or further deferred work.
pub trait IntoPromise<T: Send + 'static> {
    /// Converts `self` into a promise.
    fn into_promise(self) -> Promise<T>;
}

impl<T: Send + 'static> IntoPromise<T> for Promise<T> {
    fn into_promise(self) -> Promise<T> {
        self
    }
}

impl<T: Send + 'static> IntoPromise<T> for Result<T> {
    fn into_promise(self) -> Promise<T> {
        Promise::from(self)
    }
}

impl<A: Send + 'static, B: Send + 'static> Promise<(A, B)> {
    /// Splits a pair-valued promise into one promise per element. Each
    /// element is moved out exactly once; an error reaches both halves.
    #[must_use]
    #[track_caller]
    pub fn split(self) -> (Promise<A>, Promise<B>) {
        let staged = self.map(|(a, b)| (Some(a), Some(b)));
        let hub = HubCore::new(staged.node, &current_loop());
        let first = SplitBranch::new(&hub, |t: &mut (Option<A>, Option<B>)| t.0.take());
        let second = SplitBranch::new(&hub, |t: &mut (Option<A>, Option<B>)| t.1.take());
        (
            Promise::from_node(Box::new(first)),
            Promise::from_node(Box::new(second)),
        )
    }
}

impl<A: Send + 'static, B: Send + 'static, C: Send + 'static> Promise<(A, B, C)> {
    /// Splits a triple-valued promise into one promise per element.
    #[must_use]
    #[track_caller]
    pub fn split(self) -> (Promise<A>, Promise<B>, Promise<C>) {
        type Staged<A, B, C> = (Option<A>, Option<B>, Option<C>);
        let staged = self.map(|(a, b, c)| (Some(a), Some(b), Some(c)));
        let hub = HubCore::new(staged.node, &current_loop());
        let first = SplitBranch::new(&hub, |t: &mut Staged<A, B, C>| t.0.take());
        let second = SplitBranch::new(&hub, |t: &mut Staged<A, B, C>| t.1.take());
        let third = SplitBranch::new(&hub, |t: &mut Staged<A, B, C>| t.2.take());
        (
            Promise::from_node(Box::new(first)),
            Promise::from_node(Box::new(second)),
            Promise::from_node(Box::new(third)),
        )
    }
}

/// The hub handle produced by [`Promise::fork`]. Cheap to clone; each
/// branch yields the shared result by copy.
pub struct ForkedPromise<T: Send + 'static> {
    hub: Arc<HubCore<T>>,
}

impl<T: Send + 'static> Clone for ForkedPromise<T> {
    fn clone(&self) -> Self {
        Self {
            hub: self.hub.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> ForkedPromise<T> {
    /// Spawns a new consumer of the shared result. Branches added after
    /// the hub settled resolve immediately.
    #[must_use]
    pub fn add_branch(&self) -> Promise<T> {
        Promise::from_node(Box::new(ForkBranch::new(&self.hub)))
    }
}

/// A promise that never resolves. Useful as a neutral element for
/// [`Promise::exclusive_join`] and for parking a loop that serves
/// cross-thread callers.
#[must_use]
pub fn never_done<T: Send + 'static>() -> Promise<T> {
    Promise::from_node(Box::new(NeverNode))
}

fn yielded(origin: &'static Location<'static>) -> Promise<()> {
    Promise::from_node(Box::new(ImmediateNode::from_cell(
        ResultCell::from_value(()),
        origin,
    )))
}

/// Evaluates `f` on a later loop turn (breadth-first), lifting its
/// result into a promise. The canonical way for long computations to
/// yield.
#[must_use]
#[track_caller]
pub fn eval_later<T, F>(f: F) -> Promise<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let origin = Location::caller();
    yielded(origin).try_map(|_| f())
}

/// Evaluates `f` only once the loop has nothing else to do.
#[must_use]
#[track_caller]
pub fn eval_last<T, F>(f: F) -> Promise<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let origin = Location::caller();
    Promise::from_node(Box::new(ImmediateNode::last_tier(
        ResultCell::from_value(()),
        origin,
    )))
    .try_map(|_| f())
}

/// Evaluates `f` synchronously, lifting its result (or its panic) into
/// an already-settled promise.
#[must_use]
#[track_caller]
pub fn eval_now<T, F>(f: F) -> Promise<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T>,
{
    Promise::from(run_catching(f))
}

/// Calls `f` and, if its promise fails with a `Disconnected`-kind error,
/// calls it once more. Any other error, and any error from the second
/// attempt, surfaces as-is.
#[must_use]
#[track_caller]
pub fn retry_on_disconnect<T, F>(mut f: F) -> Promise<T>
where
    T: Send + 'static,
    F: FnMut() -> Promise<T> + Send + 'static,
{
    eval_later(|| Ok(())).then(move |()| {
        let first = f();
        first.then_catch(Promise::ok, move |error| {
            if error.is_disconnected() {
                f()
            } else {
                Promise::err(error)
            }
        })
    })
}

/// Joins N promises into one that yields every value in order. The
/// result settles only when all branches have settled; the first error
/// in index order wins.
#[must_use]
#[track_caller]
pub fn join_promises<T: Send + 'static>(promises: Vec<Promise<T>>) -> Promise<Vec<T>> {
    let origin = Location::caller();
    let nodes = promises.into_iter().map(Promise::into_node).collect();
    Promise::from_node(Box::new(ArrayJoinNode::new(
        nodes,
        &current_loop(),
        origin,
    )))
}

/// Creates a promise together with a detachable fulfiller driving it.
/// Dropping the fulfiller without resolving rejects the promise with a
/// `Cancelled`-kind error.
#[must_use]
pub fn new_promise_and_fulfiller<T: Send + 'static>() -> (Promise<T>, PromiseFulfiller<T>) {
    let mut captured = None;
    let node = AdapterNode::new(|fulfiller| {
        captured = Some(fulfiller);
    });
    let fulfiller = PromiseFulfiller::new(captured.expect("adapter constructor did not run"));
    (Promise::from_node(Box::new(node)), fulfiller)
}

/// Creates a promise driven by an application-supplied adapter. `build`
/// receives the fulfiller and returns the adapter object, which the node
/// owns; dropping the promise drops the adapter, which is the
/// cancellation signal.
#[must_use]
pub fn new_adapted_promise<T, A, F>(build: F) -> Promise<T>
where
    T: Send + 'static,
    A: Send + 'static,
    F: FnOnce(Fulfiller<T>) -> A,
{
    Promise::from_node(Box::new(AdapterNode::new(build)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_now_runs_synchronously_without_a_loop() {
        let promise = eval_now(|| Ok(21));
        // No loop exists; only the construction is under test here.
        assert!(promise.trace().contains("immediate"));
    }

    #[test]
    fn eval_now_captures_panics() {
        let promise: Promise<u32> = eval_now(|| panic!("sync boom"));
        assert!(promise.trace().contains("immediate"));
    }

    #[test]
    fn trace_lists_nodes_with_origins() {
        let promise = Promise::ok(1).map(|x| x + 1);
        let trace = promise.trace();
        assert!(trace.contains("transform"), "{trace}");
        assert!(trace.contains("promise.rs"), "{trace}");
    }
}
