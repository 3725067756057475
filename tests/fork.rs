//! Fork hubs, branches, and tuple splits.

mod common;

use std::sync::Arc;

use common::*;
use eventide::{new_promise_and_fulfiller, Error, ErrorKind, EventLoop, Promise};

#[test]
fn fork_broadcasts_to_every_branch_exactly_once() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let (promise, fulfiller) = new_promise_and_fulfiller::<u32>();
    let forked = promise.fork();
    let first = forked.add_branch();
    let second = forked.add_branch();

    fulfiller.fulfill(9);

    assert_eq!(first.wait(&mut ws).expect("first branch failed"), 9);
    assert_eq!(second.wait(&mut ws).expect("second branch failed"), 9);
}

#[test]
fn branches_added_after_readiness_resolve_immediately() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let (promise, fulfiller) = new_promise_and_fulfiller::<u32>();
    let forked = promise.fork();
    fulfiller.fulfill(7);

    let early = forked.add_branch();
    assert_eq!(early.wait(&mut ws).expect("early branch failed"), 7);

    let late = forked.add_branch();
    assert_eq!(late.wait(&mut ws).expect("late branch failed"), 7);
}

#[test]
fn fork_shares_reference_counted_values() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let payload = Arc::new("shared".to_string());
    let forked = Promise::ok(payload.clone()).fork();
    let a = forked.add_branch();
    let b = forked.add_branch();

    let got_a = a.wait(&mut ws).expect("branch a failed");
    let got_b = b.wait(&mut ws).expect("branch b failed");
    assert!(Arc::ptr_eq(&got_a, &got_b));
    assert!(Arc::ptr_eq(&got_a, &payload));
}

#[test]
fn fork_propagates_errors_to_all_branches() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let (promise, fulfiller) = new_promise_and_fulfiller::<u32>();
    let forked = promise.fork();
    let a = forked.add_branch();
    let b = forked.add_branch();

    fulfiller.reject(Error::disconnected("gone"));

    assert_eq!(
        a.wait(&mut ws).expect_err("branch a should fail").kind(),
        ErrorKind::Disconnected
    );
    assert_eq!(
        b.wait(&mut ws).expect_err("branch b should fail").kind(),
        ErrorKind::Disconnected
    );
}

#[test]
fn split_moves_each_tuple_element_once() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let (numbers, text) = Promise::ok((41u32, "answer".to_string())).split();
    assert_eq!(numbers.wait(&mut ws).expect("first element failed"), 41);
    assert_eq!(text.wait(&mut ws).expect("second element failed"), "answer");
}

#[test]
fn split_of_a_triple() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let (a, b, c) = Promise::ok((1u8, 2u16, 3u32)).split();
    assert_eq!(a.wait(&mut ws).expect("a failed"), 1);
    assert_eq!(b.wait(&mut ws).expect("b failed"), 2);
    assert_eq!(c.wait(&mut ws).expect("c failed"), 3);
}

#[test]
fn dropping_all_branches_cancels_the_source() {
    init_logging();
    let lp = EventLoop::new();
    let _ws = lp.wait_scope();
    let log = effect_log();

    let (promise, fulfiller) = new_promise_and_fulfiller::<u32>();
    let forked = promise.attach(DropProbe::new(&log, "source dropped")).fork();
    let branch = forked.add_branch();

    drop(branch);
    assert!(entries(&log).is_empty());
    drop(forked);
    assert_eq!(entries(&log), vec!["source dropped"]);
    assert!(!fulfiller.is_waiting());
}
