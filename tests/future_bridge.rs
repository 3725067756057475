//! Bridging between promises and std futures.

mod common;

use common::*;
use eventide::{eval_later, new_promise_and_fulfiller, Error, ErrorKind, EventLoop, Promise};

#[test]
fn a_future_becomes_a_promise() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let promise = Promise::from_future(async { Ok(5) });
    assert_eq!(promise.wait(&mut ws).expect("future failed"), 5);
}

#[test]
fn futures_can_await_promises() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let (promise, fulfiller) = new_promise_and_fulfiller::<u32>();
    let bridged = Promise::from_future(async move {
        let value = promise.await?;
        Ok(value * 2)
    });
    fulfiller.fulfill(10);
    assert_eq!(bridged.wait(&mut ws).expect("bridge failed"), 20);
}

#[test]
fn futures_can_await_deferred_chains() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let bridged = Promise::from_future(async {
        let a = eval_later(|| Ok(2)).await?;
        let b = eval_later(move || Ok(a + 3)).await?;
        Ok(a * b)
    });
    assert_eq!(bridged.wait(&mut ws).expect("bridge failed"), 10);
}

#[test]
fn future_errors_propagate() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let promise: Promise<u32> =
        Promise::from_future(async { Err(Error::disconnected("async failure")) });
    let error = promise.wait(&mut ws).expect_err("expected error");
    assert_eq!(error.kind(), ErrorKind::Disconnected);
}

#[test]
fn dropping_the_promise_drops_the_suspended_future() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();
    let log = effect_log();

    let (never, _keep) = new_promise_and_fulfiller::<u32>();
    let bridged = Promise::from_future({
        let log = log.clone();
        async move {
            let _guard = DropProbe::new(&log, "future dropped");
            let value = never.await?;
            Ok(value)
        }
    });

    // Let the future run to its first suspension point.
    eval_later(|| Ok(())).wait(&mut ws).expect("drain failed");
    assert!(entries(&log).is_empty());

    drop(bridged);
    assert_eq!(entries(&log), vec!["future dropped"]);
}
