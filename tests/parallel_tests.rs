//! Behavioural tests for bounded fan-out.
//!
//! Tests cover:
//! - Input-order results regardless of settlement order
//! - The concurrency limit as an exact upper bound on in-flight work
//! - Fail-fast rejection with cancellation of the other members
//! - Degenerate inputs: empty member list and a zero limit
//! - Stack safety over a large synchronous member list

use deferred::{Crash, CrashKind, Deferred, Failure, Outcome, Teardown};
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
// Ordering and Limits
// =============================================================================

#[rstest]
fn test_parallel_collects_synchronous_members_in_input_order() {
    let members = (0..5)
        .map(|n| Deferred::<String, i32>::resolve(n))
        .collect();
    let outcome = settled(Deferred::parallel(2, members));
    assert_eq!(outcome, Outcome::Resolved(vec![0, 1, 2, 3, 4]));
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_parallel_results_keep_input_order_under_reordered_settlement() {
    LocalSet::new()
        .run_until(async {
            let members = vec![
                Deferred::<String, &str>::after(Duration::from_millis(30), "slow"),
                Deferred::after(Duration::from_millis(10), "fast"),
                Deferred::after(Duration::from_millis(20), "middle"),
            ];

            let outcome = Deferred::parallel(3, members).run().await;
            assert_eq!(outcome, Ok(vec!["slow", "fast", "middle"]));
        })
        .await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_parallel_limit_bounds_concurrency() {
    LocalSet::new()
        .run_until(async {
            // Three 20/20/10ms members at limit 2: the third member may
            // only start once a slot frees at 10ms... it does not; the
            // first slot frees at 20ms, so the whole batch takes 30ms.
            let members = vec![
                Deferred::<String, i32>::after(Duration::from_millis(20), 1),
                Deferred::after(Duration::from_millis(20), 2),
                Deferred::after(Duration::from_millis(10), 3),
            ];

            let before = Instant::now();
            let outcome = Deferred::parallel(2, members).run().await;
            assert_eq!(outcome, Ok(vec![1, 2, 3]));
            assert_eq!(before.elapsed(), Duration::from_millis(30));
        })
        .await;
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_parallel_limit_one_runs_members_back_to_back() {
    LocalSet::new()
        .run_until(async {
            let members = (0..3)
                .map(|n| Deferred::<String, i32>::after(Duration::from_millis(10), n))
                .collect();

            let before = Instant::now();
            let outcome = Deferred::parallel(1, members).run().await;
            assert_eq!(outcome, Ok(vec![0, 1, 2]));
            assert_eq!(before.elapsed(), Duration::from_millis(30));
        })
        .await;
}

#[rstest]
fn test_parallel_tracks_the_peak_number_in_flight() {
    let in_flight = Rc::new(Cell::new(0_u32));
    let peak = Rc::new(Cell::new(0_u32));

    let members = (0..6)
        .map(|n| {
            let in_flight = Rc::clone(&in_flight);
            let peak = Rc::clone(&peak);
            Deferred::<String, i32>::new(move |completer| {
                in_flight.set(in_flight.get() + 1);
                peak.set(peak.get().max(in_flight.get()));
                completer.resolve(n);
                in_flight.set(in_flight.get() - 1);
                Teardown::noop()
            })
        })
        .collect();

    let outcome = settled(Deferred::parallel(2, members));
    assert_eq!(outcome, Outcome::Resolved(vec![0, 1, 2, 3, 4, 5]));
    assert!(peak.get() <= 2);
}

// =============================================================================
// Failure and Cancellation
// =============================================================================

#[rstest]
#[tokio::test(start_paused = true)]
async fn test_parallel_rejection_cancels_the_running_members() {
    LocalSet::new()
        .run_until(async {
            let cancellations = Rc::new(Cell::new(0));
            let counter = Rc::clone(&cancellations);
            let pending = Deferred::<String, i32>::new(move |_completer| {
                let counter = Rc::clone(&counter);
                Teardown::of(move || counter.set(counter.get() + 1))
            });

            let members = vec![
                pending,
                Deferred::reject_after(Duration::from_millis(10), "broken".into()),
            ];

            let before = Instant::now();
            let outcome = Deferred::parallel(2, members).run().await;
            assert_eq!(outcome, Err(Failure::Rejected("broken".to_string())));
            assert_eq!(before.elapsed(), Duration::from_millis(10));
            assert_eq!(cancellations.get(), 1);
        })
        .await;
}

#[rstest]
fn test_parallel_rejection_stops_later_members_from_starting() {
    let started = Rc::new(Cell::new(0));
    let observer = Rc::clone(&started);
    let members = vec![
        Deferred::<String, i32>::reject("first".into()),
        Deferred::attempt(move || {
            observer.set(observer.get() + 1);
            Ok(2)
        }),
    ];

    let outcome = settled(Deferred::parallel(1, members));
    assert_eq!(outcome, Outcome::Rejected("first".into()));
    assert_eq!(started.get(), 0);
}

#[rstest]
fn test_parallel_crash_of_a_member_crashes_the_batch() {
    let members = vec![
        Deferred::<String, i32>::resolve(1),
        Deferred::crashed(Crash::new("defect")),
    ];
    let outcome = settled(Deferred::parallel(2, members));
    assert!(outcome.is_crashed());
}

#[rstest]
fn test_cancelling_parallel_cancels_every_running_member() {
    let cancellations = Rc::new(Cell::new(0));
    let members = (0..2)
        .map(|_| {
            let counter = Rc::clone(&cancellations);
            Deferred::<String, i32>::new(move |_completer| {
                let counter = Rc::clone(&counter);
                Teardown::of(move || counter.set(counter.get() + 1))
            })
        })
        .collect();

    let subscription = Deferred::parallel(4, members).fork(|_| {});
    subscription.cancel();
    assert_eq!(cancellations.get(), 2);
}

// =============================================================================
// Degenerate Inputs
// =============================================================================

#[rstest]
fn test_parallel_of_no_members_resolves_with_an_empty_vec() {
    let outcome = settled(Deferred::<String, i32>::parallel(8, Vec::new()));
    assert_eq!(outcome, Outcome::Resolved(Vec::new()));
}

#[rstest]
fn test_parallel_with_a_zero_limit_crashes() {
    let members = vec![Deferred::<String, i32>::resolve(1)];
    let outcome = settled(Deferred::parallel(0, members));
    match outcome {
        Outcome::Crashed(crash) => assert_eq!(crash.kind(), CrashKind::Contract),
        other => panic!("expected a contract crash, got {other:?}"),
    }
}

#[rstest]
fn test_parallel_survives_a_large_synchronous_batch() {
    let members = (0..50_000)
        .map(|n| Deferred::<String, u32>::resolve(n))
        .collect();
    let outcome = settled(Deferred::parallel(16, members));
    match outcome {
        Outcome::Resolved(values) => {
            assert_eq!(values.len(), 50_000);
            assert_eq!(values[49_999], 49_999);
        }
        other => panic!("expected a resolution, got {other:?}"),
    }
}
