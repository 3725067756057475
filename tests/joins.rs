//! Exclusive join and array join semantics.

mod common;

use common::*;
use eventide::{
    join_promises, new_promise_and_fulfiller, Error, ErrorKind, EventLoop, Promise,
};
use proptest::prelude::*;

#[test]
fn exclusive_join_first_fulfilled_wins() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let (a, fulfill_a) = new_promise_and_fulfiller::<String>();
    let (b, fulfill_b) = new_promise_and_fulfiller::<String>();
    let joined = a.exclusive_join(b);

    fulfill_b.fulfill("b".to_string());
    fulfill_a.fulfill("a".to_string());

    assert_eq!(joined.wait(&mut ws).expect("join failed"), "b");
}

#[test]
fn exclusive_join_forwards_a_winning_error() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let (a, fulfill_a) = new_promise_and_fulfiller::<u32>();
    let (b, _keep_b) = new_promise_and_fulfiller::<u32>();
    let joined = a.exclusive_join(b);

    fulfill_a.reject(Error::disconnected("peer gone"));
    let error = joined.wait(&mut ws).expect_err("expected error");
    assert_eq!(error.kind(), ErrorKind::Disconnected);
}

#[test]
fn array_join_reports_first_error_in_index_order() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let (t0, f0) = new_promise_and_fulfiller::<u32>();
    let (t1, f1) = new_promise_and_fulfiller::<u32>();
    let (t2, f2) = new_promise_and_fulfiller::<u32>();
    let joined = join_promises(vec![t0, t1, t2]);

    f0.fulfill(1);
    f1.reject(Error::failed("x"));
    f2.fulfill(3);

    let error = joined.wait(&mut ws).expect_err("expected error");
    assert_eq!(error.message(), "x");
}

#[test]
fn array_join_waits_for_every_branch() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let (t0, f0) = new_promise_and_fulfiller::<u32>();
    let (t1, f1) = new_promise_and_fulfiller::<u32>();
    let mut joined = join_promises(vec![t0, t1]);

    // An early failure must not settle the join while t0 is pending.
    f1.reject(Error::failed("early failure"));
    assert!(!joined.poll(&mut ws));

    f0.fulfill(1);
    let error = joined.wait(&mut ws).expect_err("expected error");
    assert_eq!(error.message(), "early failure");
}

#[test]
fn array_join_aggregates_values_in_order() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();

    let (t0, f0) = new_promise_and_fulfiller::<u32>();
    let (t1, f1) = new_promise_and_fulfiller::<u32>();
    let (t2, f2) = new_promise_and_fulfiller::<u32>();
    let joined = join_promises(vec![t0, t1, t2]);

    // Completion order differs from index order.
    f2.fulfill(30);
    f0.fulfill(10);
    f1.fulfill(20);

    let values = joined.wait(&mut ws).expect("join failed");
    assert_eq!(values, vec![10, 20, 30]);
}

#[test]
fn empty_join_resolves_immediately() {
    init_logging();
    let lp = EventLoop::new();
    let mut ws = lp.wait_scope();
    let values = join_promises(Vec::<Promise<u32>>::new())
        .wait(&mut ws)
        .expect("empty join failed");
    assert!(values.is_empty());
}

proptest! {
    /// The join settles with the first error by index, regardless of how
    /// branches interleave success and failure, or with all values when
    /// every branch succeeds.
    #[test]
    fn array_join_error_selection(specs in prop::collection::vec(prop::option::of(0u32..100), 0..8)) {
        let lp = EventLoop::new();
        let mut ws = lp.wait_scope();

        let promises: Vec<Promise<u32>> = specs
            .iter()
            .enumerate()
            .map(|(index, spec)| match spec {
                Some(value) => Promise::ok(*value),
                None => Promise::err(Error::failed(format!("branch {index}"))),
            })
            .collect();

        let outcome = join_promises(promises).wait(&mut ws);
        match specs.iter().position(Option::is_none) {
            Some(first_error) => {
                let error = outcome.expect_err("expected first error by index");
                prop_assert_eq!(error.message(), format!("branch {first_error}"));
            }
            None => {
                let values = outcome.expect("expected all values");
                let expected: Vec<u32> = specs.into_iter().map(Option::unwrap).collect();
                prop_assert_eq!(values, expected);
            }
        }
    }
}
