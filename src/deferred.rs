//! The typed computation surface.
//!
//! [`Deferred`] is a phantom-typed handle over the erased engine graph.
//! Composing combinators is pure and never starts work; interpretation
//! begins only at [`Deferred::fork`] (or one of its wrappers) and every
//! fork of a clone starts the work over.
//!
//! Values cross the engine boundary type-erased, which is why most
//! combinators ask for `Clone` on the value they consume: a value can be
//! delivered to several observers (a cached computation, for instance,
//! hands the same settlement to every subscriber) and the claiming side
//! clones when it is not the sole owner.

use std::convert::Infallible;
use std::marker::PhantomData;
use std::ops::ControlFlow;
use std::rc::Rc;
use std::time::Duration;

use futures::FutureExt;
use futures::channel::oneshot;

use crate::engine::concurrent::{Join, Or, Race};
use crate::engine::transform::{Alt, And, Apply, Bimap, Chain, ChainRej, Fold, Lastly, Map, MapRej, Swap};
use crate::engine::{Cancel, Dynamic, ForkOptions, Graph, Handler, Signal, claim, seal};
use crate::leaf::cache::Cache;
use crate::leaf::chain_rec::ChainRec;
use crate::leaf::hook::Hook;
use crate::leaf::parallel::Parallel;
use crate::leaf::{Attempt, FutureAdapter, Never, Resolver, Setup, Timer};
use crate::outcome::{Crash, Failure, Outcome};

// =============================================================================
// Construction helpers
// =============================================================================

/// Settles a computation built with [`Deferred::new`].
///
/// Only the first settlement counts; later calls are ignored, as are
/// calls made after the subscription was cancelled.
pub struct Completer<E, A> {
    resolver: Resolver,
    marker: PhantomData<fn(E, A)>,
}

impl<E, A> Clone for Completer<E, A> {
    fn clone(&self) -> Self {
        Self {
            resolver: self.resolver.clone(),
            marker: PhantomData,
        }
    }
}

impl<E: 'static, A: 'static> Completer<E, A> {
    /// Settles the computation through the resolution channel.
    pub fn resolve(&self, value: A) {
        self.resolver.signal(Signal::Resolve(seal(value)));
    }

    /// Settles the computation through the rejection channel.
    pub fn reject(&self, reason: E) {
        self.resolver.signal(Signal::Reject(seal(reason)));
    }

    /// Settles the computation through the crash channel.
    pub fn crash(&self, crash: Crash) {
        self.resolver.signal(Signal::Crash(crash));
    }
}

/// Cleanup returned by a [`Deferred::new`] setup function; runs only if
/// the subscription is cancelled while the settlement is still pending.
pub struct Teardown {
    action: Option<Box<dyn FnOnce()>>,
}

impl Teardown {
    /// No cleanup to run on cancellation.
    #[must_use]
    pub const fn noop() -> Self {
        Self { action: None }
    }

    /// Runs `action` when the subscription is cancelled early.
    #[must_use]
    pub fn of(action: impl FnOnce() + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    fn into_cancel(self) -> Option<Cancel> {
        self.action
    }
}

/// A handle on one running interpretation.
///
/// Dropping the handle detaches it: the computation keeps running.
/// [`Subscription::cancel`] stops the computation, cancelling every
/// started branch; a cancelled interpretation delivers nothing.
pub struct Subscription {
    cancel: Option<Cancel>,
}

impl Subscription {
    /// Stops the interpretation. Nothing is delivered afterwards.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

// =============================================================================
// Deferred
// =============================================================================

/// A lazy, cancellable computation that eventually settles with a
/// resolution of type `A`, a rejection of type `E`, or a crash.
///
/// Building a `Deferred` performs no work; combinators return new values
/// and never mutate what they compose onto. Interpretation starts at
/// [`fork`](Self::fork) and can be stopped through the returned
/// [`Subscription`].
///
/// # Examples
///
/// ```rust
/// use deferred::{Deferred, Outcome};
///
/// let answer = Deferred::<String, i32>::resolve(7)
///     .map(|n| n * 6)
///     .chain(|n| Deferred::resolve(n.to_string()));
///
/// answer.fork(|outcome| assert_eq!(outcome, Outcome::Resolved("42".into())));
/// ```
pub struct Deferred<E, A> {
    graph: Graph,
    marker: PhantomData<fn() -> (E, A)>,
}

impl<E, A> Clone for Deferred<E, A> {
    fn clone(&self) -> Self {
        Self {
            graph: self.graph.clone(),
            marker: PhantomData,
        }
    }
}

fn wrap<E, A>(graph: Graph) -> Deferred<E, A> {
    Deferred {
        graph,
        marker: PhantomData,
    }
}

fn claim_value<T: Clone + 'static>(
    value: Dynamic,
    at: &'static str,
    consume: impl FnOnce(T) -> Result<Dynamic, Crash>,
) -> Result<Dynamic, Crash> {
    claim::<T>(value, at).and_then(consume)
}

impl<E: 'static, A: 'static> Deferred<E, A> {
    // -------------------------------------------------------------------------
    // Constructors
    // -------------------------------------------------------------------------

    /// A computation that settles immediately with `value`.
    #[must_use]
    pub fn resolve(value: A) -> Self {
        wrap(Graph::resolve(seal(value)))
    }

    /// A computation that settles immediately with the rejection
    /// `reason`.
    #[must_use]
    pub fn reject(reason: E) -> Self {
        wrap(Graph::reject(seal(reason)))
    }

    /// A computation that crashes immediately.
    #[must_use]
    pub fn crashed(crash: Crash) -> Self {
        wrap(Graph::crashed(crash))
    }

    /// A computation that never settles. Cancellation is the only way to
    /// be rid of it.
    #[must_use]
    pub fn never() -> Self {
        wrap(Graph::single(Rc::new(Never)))
    }

    /// Resolves with `value` once `delay` has elapsed.
    ///
    /// Must be forked from within a [`tokio::task::LocalSet`].
    #[must_use]
    pub fn after(delay: Duration, value: A) -> Self {
        wrap(Graph::single(Rc::new(Timer::new(
            delay,
            Signal::Resolve(seal(value)),
        ))))
    }

    /// Rejects with `reason` once `delay` has elapsed.
    ///
    /// Must be forked from within a [`tokio::task::LocalSet`].
    #[must_use]
    pub fn reject_after(delay: Duration, reason: E) -> Self {
        wrap(Graph::single(Rc::new(Timer::new(
            delay,
            Signal::Reject(seal(reason)),
        ))))
    }

    /// The general constructor: `setup` runs once per fork, receives a
    /// [`Completer`], and returns the [`Teardown`] to run should the
    /// subscription be cancelled before the computation settles.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use deferred::{Deferred, Outcome, Teardown};
    ///
    /// let answer = Deferred::<String, i32>::new(|completer| {
    ///     completer.resolve(42);
    ///     Teardown::noop()
    /// });
    /// answer.fork(|outcome| assert_eq!(outcome, Outcome::Resolved(42)));
    /// ```
    #[must_use]
    pub fn new(setup: impl Fn(Completer<E, A>) -> Teardown + 'static) -> Self {
        let erased = Rc::new(move |resolver: Resolver| {
            let completer = Completer {
                resolver,
                marker: PhantomData,
            };
            setup(completer).into_cancel()
        });
        wrap(Graph::single(Rc::new(Setup::new(erased))))
    }

    /// Adapts a callback-taking function: `setup` runs once per fork and
    /// is handed a one-shot callback to call with the eventual result.
    /// There is no teardown; cancellation merely discards the eventual
    /// callback invocation.
    #[must_use]
    pub fn from_callback(setup: impl Fn(Box<dyn FnOnce(Result<A, E>)>) + 'static) -> Self {
        Self::new(move |completer| {
            setup(Box::new(move |result| match result {
                Ok(value) => completer.resolve(value),
                Err(reason) => completer.reject(reason),
            }));
            Teardown::noop()
        })
    }

    /// Adapts an existing [`Future`](std::future::Future).
    ///
    /// The future is single-use, so unlike every other constructor the
    /// resulting computation may only be forked once; a second fork
    /// crashes with a contract violation. Must be forked from within a
    /// [`tokio::task::LocalSet`].
    #[must_use]
    pub fn from_future(future: impl Future<Output = Result<A, E>> + 'static) -> Self {
        let adapted = async move {
            match future.await {
                Ok(value) => Signal::Resolve(seal(value)),
                Err(reason) => Signal::Reject(seal(reason)),
            }
        }
        .boxed_local();
        wrap(Graph::single(Rc::new(FutureAdapter::new(adapted))))
    }

    /// Runs a synchronous fallible closure at fork time, settling with
    /// its result.
    #[must_use]
    pub fn attempt(run: impl Fn() -> Result<A, E> + 'static) -> Self {
        let erased = Rc::new(move || match run() {
            Ok(value) => Signal::Resolve(seal(value)),
            Err(reason) => Signal::Reject(seal(reason)),
        });
        wrap(Graph::single(Rc::new(Attempt::new(erased))))
    }

    /// Acquires a resource, consumes it, and disposes of it afterwards,
    /// no matter how consumption ends.
    ///
    /// `dispose` runs exactly once: after consumption settles or after
    /// the subscription is cancelled mid-consumption. Disposal is not
    /// cancellable, and a disposal that rejects crashes the computation.
    pub fn hook<R, B>(
        acquire: Deferred<E, R>,
        dispose: impl Fn(R) -> Deferred<E, B> + 'static,
        consume: impl Fn(R) -> Self + 'static,
    ) -> Self
    where
        R: Clone + 'static,
        B: 'static,
    {
        let dispose = Rc::new(move |resource: Dynamic| {
            claim::<R>(resource, "hook").map(|resource| dispose(resource).graph)
        });
        let consume = Rc::new(move |resource: Dynamic| {
            claim::<R>(resource, "hook").map(|resource| consume(resource).graph)
        });
        wrap(Graph::single(Rc::new(Hook::new(
            acquire.graph,
            dispose,
            consume,
        ))))
    }

    /// Interprets `members` with at most `limit` in flight at once,
    /// resolving with every member's resolution in input order.
    ///
    /// The first rejection or crash settles the whole fan-out and
    /// cancels every other in-flight member; members that have not
    /// started never start. An empty input resolves with an empty `Vec`
    /// immediately. A `limit` of zero is a contract violation.
    pub fn parallel(limit: usize, members: Vec<Self>) -> Deferred<E, Vec<A>>
    where
        A: Clone,
    {
        let graphs = members.into_iter().map(|member| member.graph).collect();
        let finish = Rc::new(|values: Vec<Dynamic>| {
            values
                .into_iter()
                .map(|value| claim::<A>(value, "parallel"))
                .collect::<Result<Vec<A>, Crash>>()
                .map(seal)
        });
        wrap(Graph::single(Rc::new(Parallel::new(limit, graphs, finish))))
    }

    /// Drives `step` from seed to seed until it breaks with a result,
    /// in constant stack space regardless of how many steps settle
    /// synchronously.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::ops::ControlFlow;
    /// use deferred::{Deferred, Outcome};
    ///
    /// let count = Deferred::<String, u32>::chain_rec(0_u32, |n| {
    ///     if n < 100_000 {
    ///         Deferred::resolve(ControlFlow::Continue(n + 1))
    ///     } else {
    ///         Deferred::resolve(ControlFlow::Break(n))
    ///     }
    /// });
    /// count.fork(|outcome| assert_eq!(outcome, Outcome::Resolved(100_000)));
    /// ```
    pub fn chain_rec<S>(seed: S, step: impl Fn(S) -> Deferred<E, ControlFlow<A, S>> + 'static) -> Self
    where
        S: Clone + 'static,
        A: Clone,
    {
        let step = Rc::new(move |seed: Dynamic| {
            claim::<S>(seed, "chain_rec").map(|seed| step(seed).graph)
        });
        let decode = Rc::new(|value: Dynamic| {
            claim::<ControlFlow<A, S>>(value, "chain_rec").map(|flow| match flow {
                ControlFlow::Continue(next) => ControlFlow::Continue(seal(next)),
                ControlFlow::Break(result) => ControlFlow::Break(seal(result)),
            })
        });
        wrap(Graph::single(Rc::new(ChainRec::new(step, decode, seal(seed)))))
    }

    // -------------------------------------------------------------------------
    // Sequential combinators
    // -------------------------------------------------------------------------

    /// Applies `function` to the resolution value.
    #[must_use]
    pub fn map<B: 'static>(self, function: impl Fn(A) -> B + 'static) -> Deferred<E, B>
    where
        A: Clone,
    {
        let function = Rc::new(move |value: Dynamic| {
            claim_value::<A>(value, "map", |value| Ok(seal(function(value))))
        });
        wrap(self.graph.transform(Rc::new(Map { function })))
    }

    /// Applies `function` to the rejection reason.
    #[must_use]
    pub fn map_rej<F: 'static>(self, function: impl Fn(E) -> F + 'static) -> Deferred<F, A>
    where
        E: Clone,
    {
        let function = Rc::new(move |reason: Dynamic| {
            claim_value::<E>(reason, "map_rej", |reason| Ok(seal(function(reason))))
        });
        wrap(self.graph.transform(Rc::new(MapRej { function })))
    }

    /// Applies `left` to a rejection reason or `right` to a resolution
    /// value, each settlement keeping its channel.
    #[must_use]
    pub fn bimap<F: 'static, B: 'static>(
        self,
        left: impl Fn(E) -> F + 'static,
        right: impl Fn(A) -> B + 'static,
    ) -> Deferred<F, B>
    where
        E: Clone,
        A: Clone,
    {
        let on_reject = Rc::new(move |reason: Dynamic| {
            claim_value::<E>(reason, "bimap", |reason| Ok(seal(left(reason))))
        });
        let on_resolve = Rc::new(move |value: Dynamic| {
            claim_value::<A>(value, "bimap", |value| Ok(seal(right(value))))
        });
        wrap(self.graph.transform(Rc::new(Bimap {
            on_reject,
            on_resolve,
        })))
    }

    /// Continues with the computation `function` builds from the
    /// resolution value.
    #[must_use]
    pub fn chain<B: 'static>(self, function: impl Fn(A) -> Deferred<E, B> + 'static) -> Deferred<E, B>
    where
        A: Clone,
    {
        let function = Rc::new(move |value: Dynamic| {
            claim::<A>(value, "chain").map(|value| function(value).graph)
        });
        wrap(self.graph.transform(Rc::new(Chain { function })))
    }

    /// Continues with the computation `function` builds from the
    /// rejection reason.
    #[must_use]
    pub fn chain_rej<F: 'static>(
        self,
        function: impl Fn(E) -> Deferred<F, A> + 'static,
    ) -> Deferred<F, A>
    where
        E: Clone,
    {
        let function = Rc::new(move |reason: Dynamic| {
            claim::<E>(reason, "chain_rej").map(|reason| function(reason).graph)
        });
        wrap(self.graph.transform(Rc::new(ChainRej { function })))
    }

    /// Coalesces both channels into a resolution.
    #[must_use]
    pub fn fold<B: 'static>(
        self,
        left: impl Fn(E) -> B + 'static,
        right: impl Fn(A) -> B + 'static,
    ) -> Deferred<Infallible, B>
    where
        E: Clone,
        A: Clone,
    {
        let on_reject = Rc::new(move |reason: Dynamic| {
            claim_value::<E>(reason, "fold", |reason| Ok(seal(left(reason))))
        });
        let on_resolve = Rc::new(move |value: Dynamic| {
            claim_value::<A>(value, "fold", |value| Ok(seal(right(value))))
        });
        wrap(self.graph.transform(Rc::new(Fold {
            on_reject,
            on_resolve,
        })))
    }

    /// Exchanges the rejection and resolution channels.
    #[must_use]
    pub fn swap(self) -> Deferred<A, E> {
        wrap(self.graph.transform(Rc::new(Swap)))
    }

    /// Discards the resolution value and continues with `next`. A
    /// rejection short-circuits; `next` never starts.
    #[must_use]
    pub fn and<B: 'static>(self, next: Deferred<E, B>) -> Deferred<E, B> {
        wrap(self.graph.transform(Rc::new(And { next: next.graph })))
    }

    /// Discards the rejection reason and continues with `fallback`. A
    /// resolution short-circuits; `fallback` never starts.
    #[must_use]
    pub fn alt(self, fallback: Self) -> Self {
        wrap(self.graph.transform(Rc::new(Alt {
            fallback: fallback.graph,
        })))
    }

    /// Applies the function `function` resolves with to the value `self`
    /// resolves with, running `self` first.
    #[must_use]
    pub fn apply<B: 'static, F>(self, function: Deferred<E, F>) -> Deferred<E, B>
    where
        F: Fn(A) -> B + Clone + 'static,
        A: Clone,
    {
        let combine = apply_combine::<A, B, F>();
        wrap(self.graph.transform(Rc::new(Apply {
            function: function.graph,
            combine,
        })))
    }

    /// Runs `cleanup` after `self` settles through either channel, then
    /// restores the settlement of `self`. A rejection of `cleanup` wins
    /// over the restored settlement. `cleanup` does not run when the
    /// subscription is cancelled; use [`hook`](Self::hook) for that.
    #[must_use]
    pub fn lastly<B: 'static>(self, cleanup: Deferred<E, B>) -> Self {
        wrap(self.graph.transform(Rc::new(Lastly {
            cleanup: cleanup.graph,
        })))
    }

    // -------------------------------------------------------------------------
    // Concurrent combinators
    // -------------------------------------------------------------------------

    /// Settles with whichever of `self` and `contender` settles first,
    /// cancelling the loser. When both could settle in the same
    /// synchronous moment, `self` wins.
    #[must_use]
    pub fn race(self, contender: Self) -> Self {
        wrap(self.graph.transform(Rc::new(Race {
            operand: contender.graph,
        })))
    }

    /// Runs both computations and resolves with both resolutions as a
    /// pair. A rejection or crash of either side settles the pair
    /// immediately and cancels the other side.
    #[must_use]
    pub fn pair<B>(self, other: Deferred<E, B>) -> Deferred<E, (A, B)>
    where
        A: Clone,
        B: Clone + 'static,
    {
        let combine = Rc::new(|first: Dynamic, second: Dynamic| {
            let first = claim::<A>(first, "pair")?;
            let second = claim::<B>(second, "pair")?;
            Ok(seal((first, second)))
        });
        wrap(self.graph.transform(Rc::new(Join {
            label: "pair",
            operand: other.graph,
            combine,
        })))
    }

    /// The concurrent form of [`apply`](Self::apply): `self` and
    /// `function` run at the same time.
    #[must_use]
    pub fn apply_concurrent<B: 'static, F>(self, function: Deferred<E, F>) -> Deferred<E, B>
    where
        F: Fn(A) -> B + Clone + 'static,
        A: Clone,
    {
        let combine = apply_combine::<A, B, F>();
        wrap(self.graph.transform(Rc::new(Join {
            label: "ap_concurrent",
            operand: function.graph,
            combine,
        })))
    }

    /// Runs both computations with preference for `self`: a resolution
    /// of `self` wins outright, while a rejection of `self` is discarded
    /// and `favourite` decides the outcome alone.
    #[must_use]
    pub fn or(self, favourite: Self) -> Self {
        wrap(self.graph.transform(Rc::new(Or {
            operand: favourite.graph,
        })))
    }

    // -------------------------------------------------------------------------
    // Memoization
    // -------------------------------------------------------------------------

    /// Memoizes the settlement: the source is interpreted at most once
    /// per warm-up and its settlement is shared by every subscriber.
    ///
    /// While the source is pending, subscribers queue; should every
    /// queued subscriber cancel, the source interpretation is cancelled
    /// and the cache goes cold again, starting the source over for the
    /// next subscriber. A settlement is terminal and delivered to later
    /// subscribers immediately.
    #[must_use]
    pub fn cache(self) -> Self {
        wrap(Graph::single(Rc::new(Cache::new(self.graph))))
    }

    // -------------------------------------------------------------------------
    // Execution
    // -------------------------------------------------------------------------

    /// Starts the computation and delivers its [`Outcome`] to `handler`.
    pub fn fork(self, handler: impl FnOnce(Outcome<E, A>) + 'static) -> Subscription
    where
        E: Clone,
        A: Clone,
    {
        self.fork_with(ForkOptions::default(), handler)
    }

    /// [`fork`](Self::fork) with explicit [`ForkOptions`].
    pub fn fork_with(
        self,
        options: ForkOptions,
        handler: impl FnOnce(Outcome<E, A>) + 'static,
    ) -> Subscription
    where
        E: Clone,
        A: Clone,
    {
        let erased: Handler = Box::new(move |signal| {
            let outcome = match signal {
                Signal::Crash(crash) => Outcome::Crashed(crash),
                Signal::Reject(reason) => match claim::<E>(reason, "fork") {
                    Ok(reason) => Outcome::Rejected(reason),
                    Err(crash) => Outcome::Crashed(crash),
                },
                Signal::Resolve(value) => match claim::<A>(value, "fork") {
                    Ok(value) => Outcome::Resolved(value),
                    Err(crash) => Outcome::Crashed(crash),
                },
            };
            handler(outcome);
        });
        Subscription {
            cancel: Some(self.graph.interpret(options, erased)),
        }
    }

    /// Starts the computation for its resolution alone.
    ///
    /// # Panics
    ///
    /// Panics when the computation rejects or crashes; a failure
    /// reaching `value` is a bug in the caller.
    pub fn value(self, consumer: impl FnOnce(A) + 'static) -> Subscription
    where
        E: Clone + std::fmt::Debug,
        A: Clone,
    {
        self.fork(move |outcome| match outcome {
            Outcome::Resolved(value) => consumer(value),
            Outcome::Rejected(reason) => panic!("unhandled rejection: {reason:?}"),
            Outcome::Crashed(crash) => panic!("{crash}"),
        })
    }

    /// Extracts the resolution of a computation known to settle
    /// synchronously.
    ///
    /// # Panics
    ///
    /// Panics when the computation rejects, crashes, or suspends.
    #[must_use]
    pub fn extract_unsafe(self) -> A
    where
        E: Clone + std::fmt::Debug,
        A: Clone,
    {
        let slot = Rc::new(std::cell::RefCell::new(None));
        let sink = Rc::clone(&slot);
        let subscription = self.fork(move |outcome| {
            *sink.borrow_mut() = Some(outcome);
        });

        let settled = slot.borrow_mut().take();
        match settled {
            Some(Outcome::Resolved(value)) => value,
            Some(Outcome::Rejected(reason)) => {
                panic!("extract_unsafe on a rejected computation: {reason:?}")
            }
            Some(Outcome::Crashed(crash)) => panic!("{crash}"),
            None => {
                subscription.cancel();
                panic!("extract_unsafe on a computation that did not settle synchronously")
            }
        }
    }

    /// Exposes the computation as a [`Future`](std::future::Future).
    ///
    /// Dropping the future before it completes cancels the underlying
    /// subscription.
    pub async fn run(self) -> Result<A, Failure<E>>
    where
        E: Clone,
        A: Clone,
    {
        let (sender, receiver) = oneshot::channel();
        let subscription = self.fork(move |outcome| {
            let _ = sender.send(outcome);
        });

        let mut guard = CancelOnDrop {
            subscription: Some(subscription),
        };
        let outcome = receiver.await;
        guard.subscription = None;

        match outcome {
            Ok(Outcome::Resolved(value)) => Ok(value),
            Ok(Outcome::Rejected(reason)) => Err(Failure::Rejected(reason)),
            Ok(Outcome::Crashed(crash)) => Err(Failure::Crashed(crash)),
            Err(oneshot::Canceled) => Err(Failure::Crashed(Crash::contract(
                "computation dropped before settling",
            ))),
        }
    }
}

fn apply_combine<A, B, F>() -> Rc<dyn Fn(Dynamic, Dynamic) -> Result<Dynamic, Crash>>
where
    F: Fn(A) -> B + Clone + 'static,
    A: Clone + 'static,
    B: 'static,
{
    Rc::new(|value: Dynamic, function: Dynamic| {
        let value = claim::<A>(value, "ap")?;
        let function = claim::<F>(function, "ap")?;
        Ok(seal(function(value)))
    })
}

struct CancelOnDrop {
    subscription: Option<Subscription>,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_resolve_settles_synchronously() {
        Deferred::<String, i32>::resolve(42)
            .fork(|outcome| assert_eq!(outcome, Outcome::Resolved(42)));
    }

    #[rstest]
    fn test_building_is_pure() {
        let base = Deferred::<String, i32>::resolve(1);
        let mapped = base.clone().map(|n| n + 1);

        base.fork(|outcome| assert_eq!(outcome, Outcome::Resolved(1)));
        mapped.fork(|outcome| assert_eq!(outcome, Outcome::Resolved(2)));
    }

    #[rstest]
    fn test_extract_unsafe_returns_synchronous_resolution() {
        let value = Deferred::<String, i32>::resolve(6).map(|n| n * 7).extract_unsafe();
        assert_eq!(value, 42);
    }

    #[rstest]
    #[should_panic(expected = "did not settle synchronously")]
    fn test_extract_unsafe_panics_on_suspension() {
        let _ = Deferred::<String, i32>::never().extract_unsafe();
    }
}
