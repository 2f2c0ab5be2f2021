//! Settlement memoization.
//!
//! A cached computation interprets its source at most once per warm-up:
//! the first subscriber starts the source and later subscribers join a
//! waiter queue. Waiters leave the queue by cancelling, and when the
//! last live waiter leaves while the source is still pending, the source
//! interpretation is cancelled and the cache resets to cold, so a later
//! subscriber starts the source over from scratch.
//!
//! A settlement, crash included, is terminal: it is delivered to every
//! queued waiter and to every future subscriber immediately, forever.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::engine::{Cancel, Computation, ForkOptions, Graph, Handler, Signal, noop_cancel};

/// The memoizing leaf; see [`Deferred::cache`](crate::Deferred::cache).
pub(crate) struct Cache {
    source: Graph,
    state: RefCell<CacheState>,
    /// Bumped on every reset so that stale waiter cancels from a
    /// previous warm-up cannot touch the current queue.
    generation: Cell<u64>,
}

enum CacheState {
    Cold,
    Pending {
        waiters: Vec<Option<Handler>>,
        live: usize,
        cancel: Option<Cancel>,
    },
    Settled(Signal),
}

impl Cache {
    pub(crate) fn new(source: Graph) -> Self {
        Self {
            source,
            state: RefCell::new(CacheState::Cold),
            generation: Cell::new(0),
        }
    }

    /// Queues a waiter, returning its cancel.
    fn register(self: &Rc<Self>, handler: Handler) -> Cancel {
        let (generation, index) = {
            let mut state = self.state.borrow_mut();
            let CacheState::Pending { waiters, live, .. } = &mut *state else {
                // Settled between the caller's check and now is impossible
                // single-threaded; a cold cache never reaches here.
                return noop_cancel();
            };
            let index = waiters.len();
            waiters.push(Some(handler));
            *live += 1;
            (self.generation.get(), index)
        };

        let cache = Rc::clone(self);
        Box::new(move || cache.abandon(generation, index))
    }

    /// Removes a waiter. Resets to cold when it was the last one alive
    /// while the source was still pending.
    fn abandon(self: &Rc<Self>, generation: u64, index: usize) {
        let source_cancel = {
            let mut state = self.state.borrow_mut();
            if self.generation.get() != generation {
                return;
            }
            let CacheState::Pending {
                waiters,
                live,
                cancel,
            } = &mut *state
            else {
                return;
            };
            let Some(slot) = waiters.get_mut(index) else {
                return;
            };
            if slot.take().is_none() {
                return;
            }
            *live -= 1;
            if *live > 0 {
                return;
            }
            let source_cancel = cancel.take();
            *state = CacheState::Cold;
            self.generation.set(self.generation.get() + 1);
            source_cancel
        };
        if let Some(cancel) = source_cancel {
            cancel();
        }
    }

    /// Records the source settlement and drains the waiter queue.
    fn settled(self: &Rc<Self>, generation: u64, signal: Signal) {
        let waiters = {
            let mut state = self.state.borrow_mut();
            if self.generation.get() != generation {
                return;
            }
            let CacheState::Pending { waiters, .. } = &mut *state else {
                return;
            };
            let drained = std::mem::take(waiters);
            *state = CacheState::Settled(signal.clone());
            drained
        };
        for waiter in waiters.into_iter().flatten() {
            waiter(signal.clone());
        }
    }
}

impl Computation for Cache {
    fn name(&self) -> &'static str {
        "cache"
    }

    fn interpret(self: Rc<Self>, options: ForkOptions, handler: Handler) -> Cancel {
        let warm_up = {
            let mut state = self.state.borrow_mut();
            match &*state {
                CacheState::Settled(signal) => {
                    let signal = signal.clone();
                    drop(state);
                    handler(signal);
                    return noop_cancel();
                }
                CacheState::Pending { .. } => false,
                CacheState::Cold => {
                    *state = CacheState::Pending {
                        waiters: Vec::new(),
                        live: 0,
                        cancel: None,
                    };
                    true
                }
            }
        };

        let waiter_cancel = self.register(handler);

        if warm_up {
            let generation = self.generation.get();
            let cache = Rc::clone(&self);
            let source_cancel = self.source.interpret(
                options,
                Box::new(move |signal| cache.settled(generation, signal)),
            );

            let mut state = self.state.borrow_mut();
            if self.generation.get() == generation {
                if let CacheState::Pending { cancel, .. } = &mut *state {
                    *cancel = Some(source_cancel);
                }
            }
        }

        waiter_cancel
    }
}
