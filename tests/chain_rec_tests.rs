//! Behavioural tests for tail-recursive chaining.
//!
//! Tests cover:
//! - Stack safety over a large number of synchronous iterations
//! - Alternating synchronous and asynchronous steps
//! - Failure propagation out of a step mid-loop
//! - Cancellation of an in-flight recursion

use deferred::{Deferred, Outcome, Teardown};
use rstest::rstest;
use std::cell::{Cell, RefCell};
use std::ops::ControlFlow;
use std::rc::Rc;
use std::time::Duration;
use tokio::task::LocalSet;
use tokio::time::Instant;

fn settled<E, A>(computation: Deferred<E, A>) -> Outcome<E, A>
where
    E: Clone + std::fmt::Debug + 'static,
    A: Clone + std::fmt::Debug + 'static,
{
    let slot = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&slot);
    let _subscription = computation.fork(move |outcome| {
        *sink.borrow_mut() = Some(outcome);
    });
    let outcome = slot.borrow_mut().take();
    outcome.expect("computation should settle synchronously")
}

// =============================================================================
// Iteration
// =============================================================================

#[rstest]
fn test_chain_rec_counts_to_the_break() {
    let outcome = settled(Deferred::<String, u32>::chain_rec(0_u32, |n| {
        if n < 10 {
            Deferred::resolve(ControlFlow::Continue(n + 1))
        } else {
            Deferred::resolve(ControlFlow::Break(n))
        }
    }));
    assert_eq!(outcome, Outcome::Resolved(10));
}

#[rstest]
fn test_chain_rec_is_stack_safe_over_many_synchronous_steps() {
    let outcome = settled(Deferred::<String, u32>::chain_rec(0_u32, |n| {
        if n < 100_000 {
            Deferred::resolve(ControlFlow::Continue(n + 1))
        } else {
            Deferred::resolve(ControlFlow::Break(n))
        }
    }));
    assert_eq!(outcome, Outcome::Resolved(100_000));
}

#[rstest]
fn test_chain_rec_breaking_immediately_skips_iteration() {
    let steps = Rc::new(Cell::new(0));
    let observer = Rc::clone(&steps);
    let outcome = settled(Deferred::<String, &str>::chain_rec("seed", move |s| {
        observer.set(observer.get() + 1);
        Deferred::resolve(ControlFlow::Break(s))
    }));
    assert_eq!(outcome, Outcome::Resolved("seed"));
    assert_eq!(steps.get(), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_chain_rec_interleaves_synchronous_and_timed_steps() {
    LocalSet::new()
        .run_until(async {
            let before = Instant::now();
            let outcome = Deferred::<String, u32>::chain_rec(0_u32, |n| {
                if n >= 6 {
                    Deferred::resolve(ControlFlow::Break(n))
                } else if n % 2 == 0 {
                    // Every other step waits on the clock.
                    Deferred::after(Duration::from_millis(10), ControlFlow::Continue(n + 1))
                } else {
                    Deferred::resolve(ControlFlow::Continue(n + 1))
                }
            })
            .run()
            .await;

            assert_eq!(outcome, Ok(6));
            assert_eq!(before.elapsed(), Duration::from_millis(30));
        })
        .await;
}

// =============================================================================
// Failure and Cancellation
// =============================================================================

#[rstest]
fn test_chain_rec_propagates_a_mid_loop_rejection() {
    let outcome = settled(Deferred::<String, u32>::chain_rec(0_u32, |n| {
        if n == 3 {
            Deferred::reject("stuck at 3".into())
        } else {
            Deferred::resolve(ControlFlow::Continue(n + 1))
        }
    }));
    assert_eq!(outcome, Outcome::Rejected("stuck at 3".into()));
}

#[rstest]
fn test_chain_rec_crashes_when_a_step_panics() {
    let outcome = settled(Deferred::<String, u32>::chain_rec(0_u32, |n| {
        if n == 2 {
            panic!("bad step");
        }
        Deferred::resolve(ControlFlow::Continue(n + 1))
    }));
    assert!(outcome.is_crashed());
}

#[rstest]
fn test_cancelling_chain_rec_cancels_the_pending_step() {
    let cancellations = Rc::new(Cell::new(0));
    let counter = Rc::clone(&cancellations);
    let recursion = Deferred::<String, u32>::chain_rec(0_u32, move |_| {
        let counter = Rc::clone(&counter);
        Deferred::new(move |_completer| {
            let counter = Rc::clone(&counter);
            Teardown::of(move || counter.set(counter.get() + 1))
        })
    });

    let subscription = recursion.fork(|_| {});
    subscription.cancel();
    assert_eq!(cancellations.get(), 1);
}
