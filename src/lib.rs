//! Eventide: a single-threaded, cooperative promise event loop.
//!
//! A [`Promise<T>`] is a deferred value-or-error. Promises compose into
//! graphs of dependent computations; an [`EventLoop`] drains those
//! graphs through three scheduling tiers (depth-first continuations,
//! breadth-first yields, and last-resort book-keeping). The runtime also
//! provides structured cross-thread hand-off ([`Executor`]), externally
//! fulfilled promises ([`new_promise_and_fulfiller`]), stackful fibers
//! that can synchronously block on promises ([`start_fiber`]), and a
//! std-`Future` adapter ([`Promise::from_future`]).
//!
//! # Core guarantees
//!
//! - **Single ownership**: every node is owned by exactly one promise
//!   handle or parent node; dropping the owner cancels the subtree.
//! - **Exactly-once delivery**: a node produces its result once, only
//!   after signalling readiness, with no user frames on the stack.
//! - **Ordered scheduling**: depth-first events armed during a fire run
//!   before older work; breadth-first events run in FIFO order; the last
//!   tier runs only when nothing else can.
//! - **Explicit loops**: there is no global runtime. Entering a loop on
//!   a thread (by creating a [`WaitScope`]) is what lets combinators on
//!   that thread bind their internal events.
//!
//! # Example
//!
//! ```
//! use eventide::{EventLoop, Promise};
//!
//! let lp = EventLoop::new();
//! let mut ws = lp.wait_scope();
//! let value = Promise::ok(7)
//!     .map(|x| x + 1)
//!     .map(|x| x * 2)
//!     .wait(&mut ws)
//!     .unwrap();
//! assert_eq!(value, 16);
//! ```
//!
//! # Module structure
//!
//! - [`error`]: error kind taxonomy and origin capture
//! - [`cell`]: the value-or-error result cell
//! - [`event_loop`]: the loop, its queues, ports, and wait scopes
//! - [`promise`]: the promise handle, combinators, and free functions
//! - [`fiber`]: stackful fibers and the fiber pool
//! - [`executor`]: the cross-thread event protocol

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod cell;
pub mod error;
mod event;
pub mod event_loop;
pub mod executor;
pub mod fiber;
mod future;
mod node;
pub mod promise;

pub use cell::ResultCell;
pub use error::{Error, ErrorKind, Result};
pub use event_loop::{EventLoop, EventPort, LoopHandle, ThreadPort, WaitScope};
pub use executor::Executor;
pub use fiber::{start_fiber, FiberPool, FiberPoolConfig};
pub use node::adapter::{Fulfiller, PromiseFulfiller};
pub use promise::{
    eval_last, eval_later, eval_now, join_promises, never_done, new_adapted_promise,
    new_promise_and_fulfiller, retry_on_disconnect, ForkedPromise, IntoPromise, Promise,
};
