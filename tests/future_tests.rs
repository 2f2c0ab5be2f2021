//! Behavioural tests for the boundary with Rust futures and the clock.
//!
//! Tests cover:
//! - `after` and `reject_after` settling on the paused clock
//! - Timer cancellation before the deadline
//! - `from_future` adoption and its one-shot contract
//! - `run` as a future, including cancel-on-drop

use deferred::{CrashKind, Deferred, Failure, Outcome, Teardown};
use rstest::rstest;
use std::cell::{Cell, RefCell};
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
// Timers
// =============================================================================

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_after_resolves_at_the_deadline() {
    LocalSet::new()
        .run_until(async {
            let before = Instant::now();
            let outcome = Deferred::<String, i32>::after(Duration::from_millis(25), 9)
                .run()
                .await;

            assert_eq!(outcome, Ok(9));
            assert_eq!(before.elapsed(), Duration::from_millis(25));
        })
        .await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_reject_after_rejects_at_the_deadline() {
    LocalSet::new()
        .run_until(async {
            let before = Instant::now();
            let outcome = Deferred::<String, i32>::reject_after(
                Duration::from_millis(15),
                "late failure".into(),
            )
            .run()
            .await;

            assert_eq!(outcome, Err(Failure::Rejected("late failure".to_string())));
            assert_eq!(before.elapsed(), Duration::from_millis(15));
        })
        .await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_cancelled_timer_never_delivers() {
    LocalSet::new()
        .run_until(async {
            let delivered = Rc::new(Cell::new(false));
            let observer = Rc::clone(&delivered);

            let subscription = Deferred::<String, i32>::after(Duration::from_millis(10), 1)
                .fork(move |_| observer.set(true));
            subscription.cancel();

            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(!delivered.get());
        })
        .await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_timers_compose_sequentially() {
    LocalSet::new()
        .run_until(async {
            let before = Instant::now();
            let outcome = Deferred::<String, i32>::after(Duration::from_millis(10), 1)
                .chain(|n| Deferred::after(Duration::from_millis(10), n + 1))
                .run()
                .await;

            assert_eq!(outcome, Ok(2));
            assert_eq!(before.elapsed(), Duration::from_millis(20));
        })
        .await;
}

// =============================================================================
// Future Adoption
// =============================================================================

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_from_future_resolves_with_the_future_output() {
    LocalSet::new()
        .run_until(async {
            let outcome = Deferred::<String, i32>::from_future(async {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(3)
            })
            .run()
            .await;

            assert_eq!(outcome, Ok(3));
        })
        .await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_from_future_rejects_with_the_future_error() {
    LocalSet::new()
        .run_until(async {
            let outcome =
                Deferred::<String, i32>::from_future(async { Err("async failure".into()) })
                    .run()
                    .await;

            assert_eq!(outcome, Err(Failure::Rejected("async failure".to_string())));
        })
        .await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_from_future_crashes_on_a_second_interpretation() {
    LocalSet::new()
        .run_until(async {
            let adopted = Deferred::<String, i32>::from_future(async { Ok(1) });

            assert_eq!(adopted.clone().run().await, Ok(1));
            match adopted.run().await {
                Err(Failure::Crashed(crash)) => {
                    assert_eq!(crash.kind(), CrashKind::Contract);
                }
                other => panic!("expected a contract crash, got {other:?}"),
            }
        })
        .await;
}

// =============================================================================
// Run
// =============================================================================

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_dropping_run_cancels_the_subscription() {
    LocalSet::new()
        .run_until(async {
            let cancellations = Rc::new(Cell::new(0));
            let counter = Rc::clone(&cancellations);
            let pending = Deferred::<String, i32>::new(move |_completer| {
                let counter = Rc::clone(&counter);
                Teardown::of(move || counter.set(counter.get() + 1))
            });

            // Nothing is forked until the future is first polled.
            let unpolled = pending.run();
            drop(unpolled);
            assert_eq!(cancellations.get(), 0);

            let counter = Rc::clone(&cancellations);
            let pending = Deferred::<String, i32>::new(move |_completer| {
                let counter = Rc::clone(&counter);
                Teardown::of(move || counter.set(counter.get() + 1))
            });

            let mut polled = Box::pin(pending.run());
            assert!(futures::poll!(polled.as_mut()).is_pending());
            drop(polled);
            assert_eq!(cancellations.get(), 1);
        })
        .await;
}

#[rstest]
fn test_value_delivers_the_resolution() {
    let seen = Rc::new(Cell::new(0));
    let observer = Rc::clone(&seen);
    let _subscription =
        Deferred::<String, i32>::resolve(21).value(move |n| observer.set(n * 2));
    assert_eq!(seen.get(), 42);
}

#[rstest]
#[should_panic(expected = "unhandled rejection")]
fn test_value_panics_on_rejection() {
    let _subscription = Deferred::<String, i32>::reject("oops".into()).value(|_| {});
}

#[rstest]
fn test_extract_unsafe_returns_the_synchronous_resolution() {
    assert_eq!(
        Deferred::<String, i32>::resolve(5).map(|n| n + 1).extract_unsafe(),
        6
    );
}

#[rstest]
#[should_panic(expected = "did not settle synchronously")]
fn test_extract_unsafe_panics_on_a_suspension() {
    let _ = Deferred::<String, i32>::never().extract_unsafe();
}

// =============================================================================
// Mixed Settlement
// =============================================================================

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_synchronous_transformations_apply_to_timed_settlements() {
    LocalSet::new()
        .run_until(async {
            let outcome = Deferred::<String, i32>::after(Duration::from_millis(10), 20)
                .map(|n| n + 1)
                .chain(|n| Deferred::resolve(n * 2))
                .run()
                .await;

            assert_eq!(outcome, Ok(42));
        })
        .await;
}

#[rstest]
fn test_synchronous_settlement_is_observed_before_fork_returns() {
    let outcome = settled(
        Deferred::<String, i32>::resolve(1)
            .map(|n| n + 1)
            .alt(Deferred::never()),
    );
    assert_eq!(outcome, Outcome::Resolved(2));
}
