//! The interpretation engine.
//!
//! A computation is a [`Graph`]: a root [`Computation`] plus a stack of
//! pending [`Transformation`]s. Nothing runs while a graph is being
//! composed; interpretation starts only when the graph is forked.
//!
//! The engine is a trampoline. Settling the root pops the next pending
//! transformation and applies it, producing a replacement graph that is
//! spliced back in, and the drain loop keeps interpreting replacement
//! roots iteratively for as long as they settle synchronously. Chains of
//! any length therefore settle in constant stack space.
//!
//! Pending transformations live on two queues:
//!
//! - the **cold** queue holds transformations that have not started any
//!   work of their own;
//! - the **hot** queue holds transformations that were warmed up, which
//!   for the concurrent kinds (race, pair, or, concurrent apply) means
//!   their operand computation is already running.
//!
//! Cold entries are warmed left to right as soon as the current root
//! suspends. A warmed transformation receives an [`Early`] handle with
//! which it can terminate the whole chain ahead of its turn; early
//! termination cancels the in-flight root, discards the cold queue, and
//! cancels exactly the hot siblings that had already started before the
//! terminator. Branches that never started are never cancelled.
//!
//! Values inside the engine are type-erased as [`Dynamic`]; the typed
//! facade in [`crate::Deferred`] seals values in and claims them out. A
//! claim of the wrong type is a contract violation and crashes the
//! computation.

use std::any::Any;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::rc::{Rc, Weak};

use crate::leaf::Immediate;
use crate::list::List;
use crate::outcome::Crash;

pub(crate) mod concurrent;
pub(crate) mod transform;

// =============================================================================
// Erased values and signals
// =============================================================================

/// A type-erased, shareable value travelling through the engine.
pub(crate) type Dynamic = Rc<dyn Any>;

/// Wraps a typed value for transport through the engine.
pub(crate) fn seal<T: 'static>(value: T) -> Dynamic {
    Rc::new(value)
}

/// Recovers a typed value from the engine, cloning when the value is
/// shared with other observers.
pub(crate) fn claim<T: Clone + 'static>(value: Dynamic, at: &'static str) -> Result<T, Crash> {
    value
        .downcast::<T>()
        .map(|shared| Rc::try_unwrap(shared).unwrap_or_else(|kept| (*kept).clone()))
        .map_err(|_| Crash::contract(format!("value of an unexpected type reached {at}")))
}

/// A settlement travelling through the engine, one variant per channel.
#[derive(Clone)]
pub(crate) enum Signal {
    Crash(Crash),
    Reject(Dynamic),
    Resolve(Dynamic),
}

/// Receives the settlement of an interpretation. Consumed on delivery.
pub(crate) type Handler = Box<dyn FnOnce(Signal)>;

/// Undoes an in-flight interpretation. Consumed when invoked.
pub(crate) type Cancel = Box<dyn FnOnce()>;

pub(crate) fn noop_cancel() -> Cancel {
    Box::new(|| {})
}

// =============================================================================
// Configuration
// =============================================================================

/// Per-interpretation configuration, supplied through
/// [`Deferred::fork_with`](crate::Deferred::fork_with).
///
/// # Examples
///
/// ```rust
/// use deferred::ForkOptions;
///
/// let options = ForkOptions::default().with_trace_capture();
/// assert!(options.capture_trace);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForkOptions {
    /// When set, the engine records the name of every transformation it
    /// applies and attaches the record to any [`Crash`](crate::Crash)
    /// produced by this interpretation. Off by default; capture costs one
    /// push per applied transformation.
    pub capture_trace: bool,
}

impl ForkOptions {
    /// Returns a copy of these options with trace capture enabled.
    #[must_use]
    pub const fn with_trace_capture(mut self) -> Self {
        self.capture_trace = true;
        self
    }
}

// =============================================================================
// Computation and transformation
// =============================================================================

/// A leaf computation: something that can be interpreted once per
/// subscription, eventually producing a [`Signal`].
///
/// `interpret` must call `handler` at most once, must not call it after
/// the returned [`Cancel`] has run, and must return promptly; any
/// long-running work has to be scheduled on the surrounding task set.
pub(crate) trait Computation {
    fn name(&self) -> &'static str;

    fn interpret(self: Rc<Self>, options: ForkOptions, handler: Handler) -> Cancel;
}

/// A pending operation on the settlement of the computation before it.
///
/// `rejected` and `resolved` consume the transformation and return the
/// graph that continues the chain; the defaults pass the settlement
/// through untouched. `warm_up` is called when the preceding computation
/// suspends; kinds that run an operand concurrently return their hot
/// form from it, everything else stays inert. `cancel` undoes whatever
/// `warm_up` started.
pub(crate) trait Transformation {
    fn name(&self) -> &'static str;

    fn rejected(self: Rc<Self>, reason: Dynamic) -> Graph {
        Graph::reject(reason)
    }

    fn resolved(self: Rc<Self>, value: Dynamic) -> Graph {
        Graph::resolve(value)
    }

    fn warm_up(self: Rc<Self>, _early: Early) -> Option<Rc<dyn Transformation>> {
        None
    }

    fn cancel(&self) {}
}

// =============================================================================
// Graph
// =============================================================================

/// A composed computation: a root plus pending transformations.
///
/// The stack stores the newest composition at its head; interpretation
/// reverses it once into application order.
#[derive(Clone)]
pub(crate) enum Graph {
    Single(Rc<dyn Computation>),
    Sequence {
        root: Rc<dyn Computation>,
        stack: List<Rc<dyn Transformation>>,
    },
}

impl Graph {
    pub(crate) fn single(computation: Rc<dyn Computation>) -> Self {
        Self::Single(computation)
    }

    pub(crate) fn of_signal(signal: Signal) -> Self {
        Self::Single(Rc::new(Immediate::new(signal)))
    }

    pub(crate) fn resolve(value: Dynamic) -> Self {
        Self::of_signal(Signal::Resolve(value))
    }

    pub(crate) fn reject(reason: Dynamic) -> Self {
        Self::of_signal(Signal::Reject(reason))
    }

    pub(crate) fn crashed(crash: Crash) -> Self {
        Self::of_signal(Signal::Crash(crash))
    }

    /// Returns a new graph with `transformation` pending after every
    /// transformation already composed; `self` is untouched.
    pub(crate) fn transform(&self, transformation: Rc<dyn Transformation>) -> Self {
        match self {
            Self::Single(root) => Self::Sequence {
                root: Rc::clone(root),
                stack: List::singleton(transformation),
            },
            Self::Sequence { root, stack } => Self::Sequence {
                root: Rc::clone(root),
                stack: stack.cons(transformation),
            },
        }
    }

    /// Starts interpreting this graph.
    pub(crate) fn interpret(&self, options: ForkOptions, handler: Handler) -> Cancel {
        match self {
            Self::Single(root) => interpret_guarded(Rc::clone(root), options, handler),
            Self::Sequence { root, stack } => {
                Interpretation::start(Rc::clone(root), stack, options, handler)
            }
        }
    }
}

/// Interprets a leaf, converting a panic during interpretation into a
/// crash and silencing signals after cancellation.
///
/// A panic caught after the settlement was already delivered came from
/// the consumer of that settlement, not from the leaf; it has no
/// recipient left and resumes unwinding instead of being converted.
pub(crate) fn interpret_guarded(
    computation: Rc<dyn Computation>,
    options: ForkOptions,
    handler: Handler,
) -> Cancel {
    let armed: Rc<RefCell<Option<Handler>>> = Rc::new(RefCell::new(Some(handler)));
    let gate = Rc::clone(&armed);
    let guarded: Handler = Box::new(move |signal| {
        if let Some(deliver) = gate.borrow_mut().take() {
            deliver(signal);
        }
    });

    let name = computation.name();
    match catch_unwind(AssertUnwindSafe(move || {
        computation.interpret(options, guarded)
    })) {
        Ok(cancel) => Box::new(move || {
            armed.borrow_mut().take();
            cancel();
        }),
        Err(payload) => {
            let Some(deliver) = armed.borrow_mut().take() else {
                resume_unwind(payload);
            };
            deliver(Signal::Crash(Crash::from_panic(payload.as_ref(), name)));
            noop_cancel()
        }
    }
}

// =============================================================================
// Early termination
// =============================================================================

/// Handle given to a warmed transformation, with which it can settle the
/// whole chain ahead of its turn.
#[derive(Clone)]
pub(crate) struct Early {
    interpretation: Weak<Interpretation>,
    token: u64,
}

impl Early {
    /// Short-circuits the interpretation: cancels the in-flight root,
    /// discards all pending cold transformations, cancels the started
    /// siblings ahead of the caller, and continues with `continuation`.
    pub(crate) fn terminate(&self, continuation: Graph) {
        if let Some(interpretation) = self.interpretation.upgrade() {
            interpretation.early(continuation, self.token);
        }
    }

    /// The options the surrounding interpretation was started with.
    pub(crate) fn options(&self) -> ForkOptions {
        self.interpretation
            .upgrade()
            .map(|interpretation| interpretation.state.borrow().options)
            .unwrap_or_default()
    }
}

// =============================================================================
// Interpretation
// =============================================================================

struct HotEntry {
    token: u64,
    transformation: Rc<dyn Transformation>,
}

enum Window {
    /// Inside the drain loop's synchronous interpretation of the current
    /// root; a settlement only records itself and lets the loop continue.
    Sync,
    /// The current root has suspended; a settlement drives the drain loop
    /// itself.
    Async,
}

struct State {
    options: ForkOptions,
    current: Option<Rc<dyn Computation>>,
    cold: VecDeque<Rc<dyn Transformation>>,
    hot: VecDeque<HotEntry>,
    cancel: Option<Cancel>,
    handler: Option<Handler>,
    trace: Vec<&'static str>,
    window: Window,
    settled: bool,
    finished: bool,
    /// How many entries at the front of `hot` were inserted by the warm-up
    /// pass currently in progress.
    warm_inserted: usize,
    /// Tokens whose transformation early-terminated while it was still
    /// being warmed and must not be queued.
    discarded: Vec<u64>,
    token_counter: u64,
}

/// One running interpretation of a [`Graph::Sequence`].
pub(crate) struct Interpretation {
    state: RefCell<State>,
}

impl Interpretation {
    pub(crate) fn start(
        root: Rc<dyn Computation>,
        stack: &List<Rc<dyn Transformation>>,
        options: ForkOptions,
        handler: Handler,
    ) -> Cancel {
        let mut cold = VecDeque::with_capacity(stack.len());
        for transformation in stack.iter() {
            cold.push_front(Rc::clone(transformation));
        }

        let interpretation = Rc::new(Self {
            state: RefCell::new(State {
                options,
                current: Some(root),
                cold,
                hot: VecDeque::new(),
                cancel: None,
                handler: Some(handler),
                trace: Vec::new(),
                window: Window::Sync,
                settled: false,
                finished: false,
                warm_inserted: 0,
                discarded: Vec::new(),
                token_counter: 0,
            }),
        });

        interpretation.drain();
        Box::new(move || interpretation.halt())
    }

    /// Interprets roots for as long as they settle synchronously, then
    /// suspends and warms the remaining cold transformations.
    fn drain(self: &Rc<Self>) {
        loop {
            let (current, options) = {
                let mut state = self.state.borrow_mut();
                if state.finished {
                    return;
                }
                state.window = Window::Sync;
                state.settled = false;
                let Some(current) = state.current.take() else {
                    return;
                };
                (current, state.options)
            };

            let this = Rc::clone(self);
            let handler: Handler = Box::new(move |signal| this.settle(signal));
            let cancel = interpret_guarded(current, options, handler);

            let mut state = self.state.borrow_mut();
            if state.finished {
                return;
            }
            if state.settled {
                continue;
            }
            state.cancel = Some(cancel);
            state.window = Window::Async;
            drop(state);

            self.warm_up_cold();
            return;
        }
    }

    /// Applies the next pending transformation to a settlement, or
    /// delivers it when the queues are exhausted.
    fn settle(self: &Rc<Self>, signal: Signal) {
        let mut state = self.state.borrow_mut();
        if state.finished {
            return;
        }
        state.cancel = None;

        // A crash bypasses the queues and aborts every started branch.
        if let Signal::Crash(crash) = signal {
            let crash = crash.traced(std::mem::take(&mut state.trace));
            state.finished = true;
            state.cold.clear();
            let started: Vec<HotEntry> = state.hot.drain(..).collect();
            let handler = state.handler.take();
            drop(state);

            for entry in started {
                entry.transformation.cancel();
            }
            if let Some(deliver) = handler {
                deliver(Signal::Crash(crash));
            }
            return;
        }

        let next = state
            .cold
            .pop_front()
            .or_else(|| state.hot.pop_front().map(|entry| entry.transformation));

        match next {
            None => {
                state.finished = true;
                let handler = state.handler.take();
                drop(state);
                if let Some(deliver) = handler {
                    deliver(signal);
                }
            }
            Some(transformation) => {
                if state.options.capture_trace {
                    state.trace.push(transformation.name());
                }
                drop(state);

                let continuation = apply_transformation(transformation, signal);

                let mut state = self.state.borrow_mut();
                if state.finished {
                    return;
                }
                Self::install(&mut state, continuation);
                match state.window {
                    Window::Sync => state.settled = true,
                    Window::Async => {
                        drop(state);
                        self.drain();
                    }
                }
            }
        }
    }

    /// Converts cold transformations to hot ones, left to right. Entries
    /// warmed by this pass are queued ahead of entries warmed earlier:
    /// they were spliced in by a nested sequence and apply first.
    fn warm_up_cold(self: &Rc<Self>) {
        loop {
            let (transformation, token) = {
                let mut state = self.state.borrow_mut();
                if state.finished {
                    state.warm_inserted = 0;
                    return;
                }
                let Some(transformation) = state.cold.pop_front() else {
                    state.warm_inserted = 0;
                    return;
                };
                state.token_counter += 1;
                (transformation, state.token_counter)
            };

            let early = Early {
                interpretation: Rc::downgrade(self),
                token,
            };
            let hot = Rc::clone(&transformation)
                .warm_up(early)
                .unwrap_or(transformation);

            let mut state = self.state.borrow_mut();
            if state.finished {
                state.warm_inserted = 0;
                return;
            }
            if let Some(position) = state.discarded.iter().position(|discarded| *discarded == token)
            {
                state.discarded.remove(position);
                continue;
            }
            let at = state.warm_inserted.min(state.hot.len());
            state.hot.insert(
                at,
                HotEntry {
                    token,
                    transformation: hot,
                },
            );
            state.warm_inserted += 1;
        }
    }

    /// Short-circuits on behalf of the hot transformation identified by
    /// `token`; see [`Early::terminate`].
    fn early(self: &Rc<Self>, continuation: Graph, token: u64) {
        let (inflight, cancelled, resume) = {
            let mut state = self.state.borrow_mut();
            if state.finished {
                return;
            }
            let inflight = state.cancel.take();
            state.cold.clear();

            let mut cancelled = Vec::new();
            if let Some(position) = state.hot.iter().position(|entry| entry.token == token) {
                // Terminator already queued: everything queued before it
                // had started earlier. The terminator itself is removed
                // without being cancelled.
                for entry in state.hot.drain(..=position) {
                    if entry.token != token {
                        cancelled.push(entry.transformation);
                    }
                }
            } else {
                // Terminator is still being warmed: its started siblings
                // are exactly the entries the current warm-up pass queued.
                let boundary = state.warm_inserted.min(state.hot.len());
                for entry in state.hot.drain(..boundary) {
                    cancelled.push(entry.transformation);
                }
                state.discarded.push(token);
            }
            state.warm_inserted = 0;

            Self::install(&mut state, continuation);
            let resume = matches!(state.window, Window::Async);
            if !resume {
                state.settled = true;
            }
            (inflight, cancelled, resume)
        };

        if let Some(cancel) = inflight {
            cancel();
        }
        for transformation in cancelled {
            transformation.cancel();
        }
        if resume {
            self.drain();
        }
    }

    /// Splices a continuation graph into the interpretation: its root
    /// becomes the current computation and its stack is queued ahead of
    /// every cold transformation already pending.
    fn install(state: &mut State, continuation: Graph) {
        match continuation {
            Graph::Single(root) => state.current = Some(root),
            Graph::Sequence { root, stack } => {
                for transformation in stack.iter() {
                    state.cold.push_front(Rc::clone(transformation));
                }
                state.current = Some(root);
            }
        }
    }

    /// Cancels this interpretation from the outside. Silent: the handler
    /// is dropped undelivered.
    fn halt(&self) {
        let (inflight, started, _handler) = {
            let mut state = self.state.borrow_mut();
            if state.finished {
                return;
            }
            state.finished = true;
            state.current = None;
            state.cold.clear();
            let started: Vec<HotEntry> = state.hot.drain(..).collect();
            (state.cancel.take(), started, state.handler.take())
        };

        if let Some(cancel) = inflight {
            cancel();
        }
        for entry in started {
            entry.transformation.cancel();
        }
    }
}

/// Applies a transformation to a non-crash settlement, converting a
/// panic inside the transformation into a crash.
fn apply_transformation(transformation: Rc<dyn Transformation>, signal: Signal) -> Graph {
    let name = transformation.name();
    catch_unwind(AssertUnwindSafe(move || match signal {
        Signal::Resolve(value) => transformation.resolved(value),
        Signal::Reject(reason) => transformation.rejected(reason),
        Signal::Crash(crash) => Graph::crashed(crash),
    }))
    .unwrap_or_else(|payload| Graph::crashed(Crash::from_panic(payload.as_ref(), name)))
}
