//! Stackful fibers: synchronous waits, cancellation, and pooling.

mod common;

use common::*;
use eventide::{
    eval_later, never_done, new_promise_and_fulfiller, start_fiber, ErrorKind, EventLoop,
    FiberPool, Promise,
};

const STACK: usize = 256 * 1024;

#[test]
fn fiber_waits_synchronously_on_a_promise() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let fiber = start_fiber(STACK, |fiber_ws| {
        let x = Promise::ok(3).wait(fiber_ws)?;
        Ok(x + 1)
    });
    assert_eq!(fiber.wait(&mut ws).expect("fiber failed"), 4);
}

#[test]
fn fiber_waits_on_deferred_work() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let (promise, fulfiller) = new_promise_and_fulfiller::<u32>();
    let fiber = start_fiber(STACK, move |fiber_ws| {
        let base = promise.wait(fiber_ws)?;
        let doubled = eval_later(move || Ok(base * 2)).wait(fiber_ws)?;
        Ok(doubled)
    });
    fulfiller.fulfill(21);
    assert_eq!(fiber.wait(&mut ws).expect("fiber failed"), 42);
}

#[test]
fn fiber_errors_propagate_to_the_outer_wait() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let fiber = start_fiber(STACK, |fiber_ws| {
        Promise::<u32>::err(eventide::Error::disconnected("inner failure")).wait(fiber_ws)
    });
    let error = fiber.wait(&mut ws).expect_err("expected error");
    assert_eq!(error.kind(), ErrorKind::Disconnected);
}

#[test]
fn fiber_panics_become_errors() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let fiber: Promise<u32> = start_fiber(STACK, |_fiber_ws| panic!("fiber blew up"));
    let error = fiber.wait(&mut ws).expect_err("expected error");
    assert_eq!(error.kind(), ErrorKind::Failed);
    assert!(error.message().contains("fiber blew up"));
}

#[test]
fn cancelled_fiber_unwinds_its_stack() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();
    let log = effect_log();

    let fiber = start_fiber(STACK, {
        let log = log.clone();
        move |fiber_ws| {
            let _guard = DropProbe::new(&log, "stack unwound");
            never_done::<u32>().wait(fiber_ws)
        }
    });

    // Let the fiber start and park on the never-done promise.
    eval_later(|| Ok(())).wait(&mut ws).expect("drain failed");
    assert!(entries(&log).is_empty());

    drop(fiber);
    assert_eq!(entries(&log), vec!["stack unwound"]);
}

#[test]
fn pooled_fibers_run_sequentially() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();
    let pool = FiberPool::new(STACK);

    let first = pool.start_fiber(|fiber_ws| Promise::ok(1).wait(fiber_ws));
    assert_eq!(first.wait(&mut ws).expect("first fiber failed"), 1);

    let second = pool.start_fiber(|fiber_ws| Promise::ok(2).wait(fiber_ws));
    assert_eq!(second.wait(&mut ws).expect("second fiber failed"), 2);
}

#[test]
fn fiber_results_survive_until_consumed() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let fiber = start_fiber(STACK, |_fiber_ws| Ok("done".to_string()));
    // Give the fiber time to finish before anyone waits on it.
    eval_later(|| Ok(())).wait(&mut ws).expect("drain failed");
    assert_eq!(fiber.wait(&mut ws).expect("fiber failed"), "done");
}
