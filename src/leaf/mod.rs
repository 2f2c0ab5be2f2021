//! Leaf computations: the roots a graph is built from.
//!
//! Every leaf is inert until interpreted and may be interpreted once per
//! subscription; a graph can therefore be forked any number of times and
//! each fork starts the work over. The one deliberate exception is the
//! future adapter, which wraps a single-use [`Future`] and crashes on a
//! second interpretation.
//!
//! Time-based leaves and the future adapter schedule themselves with
//! [`tokio::task::spawn_local`] and must be interpreted from within a
//! [`tokio::task::LocalSet`].

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;

use crate::engine::{Cancel, Computation, ForkOptions, Handler, Signal, noop_cancel};
use crate::outcome::Crash;

pub(crate) mod cache;
pub(crate) mod chain_rec;
pub(crate) mod hook;
pub(crate) mod parallel;

// =============================================================================
// Immediate and never
// =============================================================================

/// Settles synchronously with a fixed signal.
pub(crate) struct Immediate {
    signal: Signal,
}

impl Immediate {
    pub(crate) const fn new(signal: Signal) -> Self {
        Self { signal }
    }
}

impl Computation for Immediate {
    fn name(&self) -> &'static str {
        match self.signal {
            Signal::Crash(_) => "crash",
            Signal::Reject(_) => "reject",
            Signal::Resolve(_) => "resolve",
        }
    }

    fn interpret(self: Rc<Self>, _options: ForkOptions, handler: Handler) -> Cancel {
        handler(self.signal.clone());
        noop_cancel()
    }
}

/// Never settles. Cancellation is the only way out.
pub(crate) struct Never;

impl Computation for Never {
    fn name(&self) -> &'static str {
        "never"
    }

    fn interpret(self: Rc<Self>, _options: ForkOptions, _handler: Handler) -> Cancel {
        noop_cancel()
    }
}

// =============================================================================
// Timer
// =============================================================================

/// Settles with a fixed signal once a delay has elapsed.
pub(crate) struct Timer {
    delay: Duration,
    signal: Signal,
}

impl Timer {
    pub(crate) const fn new(delay: Duration, signal: Signal) -> Self {
        Self { delay, signal }
    }
}

impl Computation for Timer {
    fn name(&self) -> &'static str {
        "after"
    }

    fn interpret(self: Rc<Self>, _options: ForkOptions, handler: Handler) -> Cancel {
        let armed = Rc::new(RefCell::new(Some(handler)));
        let gate = Rc::clone(&armed);
        let delay = self.delay;
        let signal = self.signal.clone();
        let task = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            if let Some(deliver) = gate.borrow_mut().take() {
                deliver(signal);
            }
        });
        Box::new(move || {
            armed.borrow_mut().take();
            task.abort();
        })
    }
}

// =============================================================================
// General construction
// =============================================================================

/// Hands a settlement into a pending interpretation. Only the first
/// signal counts; later calls and calls after cancellation are ignored.
pub(crate) struct Resolver {
    armed: Rc<RefCell<Option<Handler>>>,
}

impl Clone for Resolver {
    fn clone(&self) -> Self {
        Self {
            armed: Rc::clone(&self.armed),
        }
    }
}

impl Resolver {
    pub(crate) fn signal(&self, signal: Signal) {
        if let Some(deliver) = self.armed.borrow_mut().take() {
            deliver(signal);
        }
    }
}

/// The general constructor leaf: runs a user setup function with a
/// guarded [`Resolver`] and keeps the returned teardown for cancellation.
///
/// The teardown runs only when the subscription is cancelled while the
/// settlement is still pending.
pub(crate) struct Setup {
    setup: Rc<dyn Fn(Resolver) -> Option<Cancel>>,
}

impl Setup {
    pub(crate) fn new(setup: Rc<dyn Fn(Resolver) -> Option<Cancel>>) -> Self {
        Self { setup }
    }
}

impl Computation for Setup {
    fn name(&self) -> &'static str {
        "setup"
    }

    fn interpret(self: Rc<Self>, _options: ForkOptions, handler: Handler) -> Cancel {
        let armed = Rc::new(RefCell::new(Some(handler)));
        let resolver = Resolver {
            armed: Rc::clone(&armed),
        };
        let teardown = (self.setup)(resolver);
        Box::new(move || {
            let pending = armed.borrow_mut().take().is_some();
            if pending {
                if let Some(teardown) = teardown {
                    teardown();
                }
            }
        })
    }
}

// =============================================================================
// Synchronous attempt
// =============================================================================

/// Runs a synchronous fallible closure at interpretation time.
pub(crate) struct Attempt {
    run: Rc<dyn Fn() -> Signal>,
}

impl Attempt {
    pub(crate) fn new(run: Rc<dyn Fn() -> Signal>) -> Self {
        Self { run }
    }
}

impl Computation for Attempt {
    fn name(&self) -> &'static str {
        "attempt"
    }

    fn interpret(self: Rc<Self>, _options: ForkOptions, handler: Handler) -> Cancel {
        handler((self.run)());
        noop_cancel()
    }
}

// =============================================================================
// Future adapter
// =============================================================================

/// Adapts a single-use [`Future`] into a computation.
///
/// The wrapped future is consumed by the first interpretation; a second
/// interpretation is a contract violation and crashes.
pub(crate) struct FutureAdapter {
    future: RefCell<Option<LocalBoxFuture<'static, Signal>>>,
}

impl FutureAdapter {
    pub(crate) fn new(future: LocalBoxFuture<'static, Signal>) -> Self {
        Self {
            future: RefCell::new(Some(future)),
        }
    }
}

impl Computation for FutureAdapter {
    fn name(&self) -> &'static str {
        "from_future"
    }

    fn interpret(self: Rc<Self>, _options: ForkOptions, handler: Handler) -> Cancel {
        let Some(future) = self.future.borrow_mut().take() else {
            handler(Signal::Crash(Crash::contract(
                "a future-backed computation was interpreted twice",
            )));
            return noop_cancel();
        };

        let armed = Rc::new(RefCell::new(Some(handler)));
        let gate = Rc::clone(&armed);
        let task = tokio::task::spawn_local(async move {
            let signal = future.await;
            if let Some(deliver) = gate.borrow_mut().take() {
                deliver(signal);
            }
        });
        Box::new(move || {
            armed.borrow_mut().take();
            task.abort();
        })
    }
}
