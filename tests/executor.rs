//! Cross-thread execution: sync calls, async replies, cancellation, and
//! loop-exit disconnection.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use common::*;
use eventide::{
    never_done, new_promise_and_fulfiller, retry_on_disconnect, Error, ErrorKind, EventLoop,
    Executor, Promise, PromiseFulfiller,
};

/// Spins up a loop on its own thread that serves cross-thread calls
/// until told to exit through the returned fulfiller.
fn remote_loop() -> (Executor, PromiseFulfiller<()>, thread::JoinHandle<()>) {
    let (send, recv) = mpsc::channel();
    let join = thread::spawn(move || {
        let lp = EventLoop::new();
        let mut ws = lp.wait_scope();
        let (exit, exit_fulfiller) = new_promise_and_fulfiller::<()>();
        send.send((lp.executor(), exit_fulfiller))
            .expect("handshake failed");
        exit.wait(&mut ws).expect("remote loop wait failed");
    });
    let (executor, exit) = recv.recv().expect("handshake failed");
    (executor, exit, join)
}

fn stop_remote(executor: &Executor, exit: PromiseFulfiller<()>, join: thread::JoinHandle<()>) {
    executor
        .execute_sync(move || {
            exit.fulfill(());
            Ok(())
        })
        .expect("exit call failed");
    join.join().expect("remote thread panicked");
}

#[test]
fn execute_sync_returns_the_value() {
    init_logging();
    let (executor, exit, join) = remote_loop();

    let value = executor
        .execute_sync(|| Ok(123))
        .expect("execute_sync failed");
    assert_eq!(value, 123);

    stop_remote(&executor, exit, join);
}

#[test]
fn execute_sync_propagates_errors() {
    init_logging();
    let (executor, exit, join) = remote_loop();

    let error = executor
        .execute_sync(|| Err::<u32, _>(Error::failed("remote failure")))
        .expect_err("expected error");
    assert_eq!(error.kind(), ErrorKind::Failed);
    assert_eq!(error.message(), "remote failure");

    stop_remote(&executor, exit, join);
}

#[test]
fn execute_sync_runs_deferred_work_on_the_target() {
    init_logging();
    let (executor, exit, join) = remote_loop();

    let value = executor
        .execute_sync(|| eventide::eval_later(|| Ok(6 * 7)))
        .expect("deferred call failed");
    assert_eq!(value, 42);

    stop_remote(&executor, exit, join);
}

#[test]
fn execute_async_replies_on_the_requesting_loop() {
    init_logging();
    let (executor, exit, join) = remote_loop();

    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();
    let promise = executor.execute_async(|| Ok("reply".to_string()));
    assert_eq!(promise.wait(&mut ws).expect("async call failed"), "reply");

    stop_remote(&executor, exit, join);
}

#[test]
fn cancelling_an_executing_call_completes_cleanly() {
    init_logging();
    let (executor, exit, join) = remote_loop();

    let lp = EventLoop::new();
    let _ws = lp.wait_scope();

    // Deferred work that never finishes on its own.
    let hung = executor.execute_async(|| never_done::<u32>());
    // A sync round-trip guarantees the target has dequeued the async
    // call and is executing it.
    executor
        .execute_sync(|| Ok(()))
        .expect("round trip failed");

    // Dropping the promise walks EXECUTING -> CANCELING -> DONE.
    drop(hung);

    let value = executor
        .execute_sync(|| Ok(5))
        .expect("post-cancel call failed");
    assert_eq!(value, 5);

    stop_remote(&executor, exit, join);
}

#[test]
fn dead_loop_disconnects_new_calls() {
    init_logging();
    let (executor, exit, join) = remote_loop();
    stop_remote(&executor, exit, join);

    let error = executor
        .execute_sync(|| Ok(1))
        .expect_err("expected disconnection");
    assert_eq!(error.kind(), ErrorKind::Disconnected);
}

#[test]
fn retry_on_disconnect_retries_exactly_once() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let calls = Arc::new(AtomicUsize::new(0));
    let value = retry_on_disconnect({
        let calls = calls.clone();
        move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Promise::err(Error::disconnected("first attempt"))
            } else {
                Promise::ok("ok")
            }
        }
    })
    .wait(&mut ws)
    .expect("retry failed");
    assert_eq!(value, "ok");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn retry_on_disconnect_surfaces_a_second_disconnect() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let calls = Arc::new(AtomicUsize::new(0));
    let error = retry_on_disconnect({
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Promise::<u32>::err(Error::disconnected("still gone"))
        }
    })
    .wait(&mut ws)
    .expect_err("expected disconnection");
    assert_eq!(error.kind(), ErrorKind::Disconnected);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn retry_on_disconnect_does_not_retry_other_errors() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let calls = Arc::new(AtomicUsize::new(0));
    let error = retry_on_disconnect({
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Promise::<u32>::err(Error::failed("not a disconnect"))
        }
    })
    .wait(&mut ws)
    .expect_err("expected failure");
    assert_eq!(error.kind(), ErrorKind::Failed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
