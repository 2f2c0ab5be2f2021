//! Resource bracketing.
//!
//! `hook` acquires a resource, consumes it, and guarantees that the
//! disposal step runs exactly once afterwards, whether consumption
//! resolved, rejected, or was cancelled midway. Disposal itself is not
//! cancellable; once entered it runs to completion. A disposal that
//! rejects is escalated to a crash, because the resource is now in an
//! unknown state and no rejection handler downstream can be allowed to
//! treat that as an ordinary failure.

use std::cell::RefCell;
use std::mem;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use crate::engine::{Cancel, Computation, Dynamic, ForkOptions, Graph, Handler, Signal};
use crate::outcome::Crash;

type StageFn = dyn Fn(Dynamic) -> Result<Graph, Crash>;

/// The resource bracket leaf; see [`Deferred::hook`](crate::Deferred::hook).
pub(crate) struct Hook {
    acquire: Graph,
    dispose: Rc<StageFn>,
    consume: Rc<StageFn>,
}

impl Hook {
    pub(crate) fn new(acquire: Graph, dispose: Rc<StageFn>, consume: Rc<StageFn>) -> Self {
        Self {
            acquire,
            dispose,
            consume,
        }
    }
}

impl Computation for Hook {
    fn name(&self) -> &'static str {
        "hook"
    }

    fn interpret(self: Rc<Self>, options: ForkOptions, handler: Handler) -> Cancel {
        let run = Rc::new(HookRun {
            options,
            dispose: Rc::clone(&self.dispose),
            consume: Rc::clone(&self.consume),
            handler: RefCell::new(Some(handler)),
            phase: RefCell::new(Phase::Idle),
        });
        run.start(&self.acquire);
        Box::new(move || run.halt())
    }
}

enum Phase {
    Idle,
    Acquiring {
        cancel: Option<Cancel>,
    },
    Consuming {
        resource: Dynamic,
        cancel: Option<Cancel>,
    },
    /// `settled` is the consumption settlement to restore once disposal
    /// resolves; it is `None` when the bracket was cancelled and the
    /// outcome has no recipient.
    Disposing {
        settled: Option<Signal>,
    },
    Done,
}

struct HookRun {
    options: ForkOptions,
    dispose: Rc<StageFn>,
    consume: Rc<StageFn>,
    handler: RefCell<Option<Handler>>,
    phase: RefCell<Phase>,
}

impl HookRun {
    fn start(self: &Rc<Self>, acquire: &Graph) {
        *self.phase.borrow_mut() = Phase::Acquiring { cancel: None };

        let run = Rc::clone(self);
        let cancel = acquire.interpret(
            self.options,
            Box::new(move |signal| run.acquired(signal)),
        );

        let mut phase = self.phase.borrow_mut();
        if let Phase::Acquiring { cancel: slot } = &mut *phase {
            *slot = Some(cancel);
        }
    }

    fn acquired(self: &Rc<Self>, signal: Signal) {
        match signal {
            Signal::Resolve(resource) => self.to_consuming(resource),
            failure @ (Signal::Reject(_) | Signal::Crash(_)) => self.finish(failure),
        }
    }

    fn to_consuming(self: &Rc<Self>, resource: Dynamic) {
        *self.phase.borrow_mut() = Phase::Consuming {
            resource: resource.clone(),
            cancel: None,
        };

        let consume = Rc::clone(&self.consume);
        let staged = catch_unwind(AssertUnwindSafe(|| consume(resource.clone())));
        let graph = match staged {
            Ok(Ok(graph)) => graph,
            Ok(Err(crash)) => {
                self.to_disposing(resource, Some(Signal::Crash(crash)));
                return;
            }
            Err(payload) => {
                let crash = Crash::from_panic(payload.as_ref(), "hook");
                self.to_disposing(resource, Some(Signal::Crash(crash)));
                return;
            }
        };

        let run = Rc::clone(self);
        let cancel = graph.interpret(
            self.options,
            Box::new(move |signal| run.consumed(signal)),
        );

        let mut phase = self.phase.borrow_mut();
        if let Phase::Consuming { cancel: slot, .. } = &mut *phase {
            *slot = Some(cancel);
        }
    }

    fn consumed(self: &Rc<Self>, signal: Signal) {
        let resource = {
            let mut phase = self.phase.borrow_mut();
            match mem::replace(&mut *phase, Phase::Done) {
                Phase::Consuming { resource, .. } => resource,
                other => {
                    *phase = other;
                    return;
                }
            }
        };
        self.to_disposing(resource, Some(signal));
    }

    fn to_disposing(self: &Rc<Self>, resource: Dynamic, settled: Option<Signal>) {
        *self.phase.borrow_mut() = Phase::Disposing { settled };

        let dispose = Rc::clone(&self.dispose);
        let staged = catch_unwind(AssertUnwindSafe(|| dispose(resource)));
        let graph = match staged {
            Ok(Ok(graph)) => graph,
            Ok(Err(crash)) => {
                *self.phase.borrow_mut() = Phase::Done;
                self.finish(Signal::Crash(crash));
                return;
            }
            Err(payload) => {
                *self.phase.borrow_mut() = Phase::Done;
                self.finish(Signal::Crash(Crash::from_panic(payload.as_ref(), "hook")));
                return;
            }
        };

        let run = Rc::clone(self);
        // Disposal is deliberately uncancellable: the cancel is dropped.
        let _running = graph.interpret(
            self.options,
            Box::new(move |signal| run.disposed(signal)),
        );
    }

    fn disposed(self: &Rc<Self>, signal: Signal) {
        let previous = mem::replace(&mut *self.phase.borrow_mut(), Phase::Done);
        let Phase::Disposing { settled } = previous else {
            return;
        };
        match signal {
            Signal::Resolve(_) => {
                if let Some(outcome) = settled {
                    self.finish(outcome);
                }
            }
            Signal::Reject(_) => self.finish(Signal::Crash(Crash::new(
                "hook disposal rejected; the resource may not have been released",
            ))),
            crash @ Signal::Crash(_) => self.finish(crash),
        }
    }

    fn finish(&self, signal: Signal) {
        if let Some(deliver) = self.handler.borrow_mut().take() {
            deliver(signal);
        }
    }

    fn halt(self: &Rc<Self>) {
        self.handler.borrow_mut().take();

        let action = {
            let mut phase = self.phase.borrow_mut();
            match mem::replace(&mut *phase, Phase::Done) {
                Phase::Acquiring { cancel } => Halted::Cancel(cancel),
                Phase::Consuming { resource, cancel } => Halted::Dispose(resource, cancel),
                Phase::Disposing { .. } => {
                    // Disposal keeps running; only the recipient is gone.
                    *phase = Phase::Disposing { settled: None };
                    Halted::Nothing
                }
                Phase::Idle | Phase::Done => Halted::Nothing,
            }
        };

        match action {
            Halted::Cancel(cancel) => {
                if let Some(cancel) = cancel {
                    cancel();
                }
            }
            Halted::Dispose(resource, cancel) => {
                if let Some(cancel) = cancel {
                    cancel();
                }
                self.to_disposing(resource, None);
            }
            Halted::Nothing => {}
        }
    }
}

enum Halted {
    Cancel(Option<Cancel>),
    Dispose(Dynamic, Option<Cancel>),
    Nothing,
}
