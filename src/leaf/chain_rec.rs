//! Stack-safe recursive stepping.
//!
//! `chain_rec` drives a stepper function from seed to seed until it
//! breaks with a result. The loop timing is tracked per step: a step
//! whose computation settles while the drive loop is still inside the
//! step is `Synchronous` and loops iteratively, while a step that
//! suspends marks itself `Asynchronous` and resumes the drive loop from
//! its eventual settlement. One hundred thousand synchronous steps run
//! in constant stack space.

use std::cell::RefCell;
use std::mem;
use std::ops::ControlFlow;
use std::rc::Rc;

use crate::engine::{Cancel, Computation, Dynamic, ForkOptions, Graph, Handler, Signal};
use crate::outcome::Crash;

type StepFn = dyn Fn(Dynamic) -> Result<Graph, Crash>;
type DecodeFn = dyn Fn(Dynamic) -> Result<ControlFlow<Dynamic, Dynamic>, Crash>;

/// The recursive-stepping leaf; see
/// [`Deferred::chain_rec`](crate::Deferred::chain_rec).
pub(crate) struct ChainRec {
    step: Rc<StepFn>,
    decode: Rc<DecodeFn>,
    seed: Dynamic,
}

impl ChainRec {
    pub(crate) fn new(step: Rc<StepFn>, decode: Rc<DecodeFn>, seed: Dynamic) -> Self {
        Self { step, decode, seed }
    }
}

impl Computation for ChainRec {
    fn name(&self) -> &'static str {
        "chain_rec"
    }

    fn interpret(self: Rc<Self>, options: ForkOptions, handler: Handler) -> Cancel {
        let drive = Rc::new(Drive {
            options,
            step: Rc::clone(&self.step),
            decode: Rc::clone(&self.decode),
            state: RefCell::new(DriveState {
                timing: Timing::Undetermined,
                cancel: None,
                handler: Some(handler),
                done: false,
            }),
        });
        drive.run(self.seed.clone());
        Box::new(move || drive.halt())
    }
}

enum Timing {
    Undetermined,
    Synchronous(Dynamic),
    Asynchronous,
}

struct DriveState {
    timing: Timing,
    cancel: Option<Cancel>,
    handler: Option<Handler>,
    done: bool,
}

struct Drive {
    options: ForkOptions,
    step: Rc<StepFn>,
    decode: Rc<DecodeFn>,
    state: RefCell<DriveState>,
}

impl Drive {
    fn run(self: &Rc<Self>, seed: Dynamic) {
        let mut seed = seed;
        loop {
            {
                let mut state = self.state.borrow_mut();
                if state.done {
                    return;
                }
                state.timing = Timing::Undetermined;
            }

            let graph = match (self.step)(seed) {
                Ok(graph) => graph,
                Err(crash) => {
                    self.finish(Signal::Crash(crash));
                    return;
                }
            };

            let drive = Rc::clone(self);
            let cancel = graph.interpret(
                self.options,
                Box::new(move |signal| drive.stepped(signal)),
            );

            let mut state = self.state.borrow_mut();
            if state.done {
                return;
            }
            match mem::replace(&mut state.timing, Timing::Undetermined) {
                Timing::Synchronous(next) => {
                    seed = next;
                }
                Timing::Undetermined | Timing::Asynchronous => {
                    state.timing = Timing::Asynchronous;
                    state.cancel = Some(cancel);
                    return;
                }
            }
        }
    }

    fn stepped(self: &Rc<Self>, signal: Signal) {
        let value = match signal {
            Signal::Resolve(value) => value,
            failure @ (Signal::Reject(_) | Signal::Crash(_)) => {
                self.finish(failure);
                return;
            }
        };

        match (self.decode)(value) {
            Err(crash) => self.finish(Signal::Crash(crash)),
            Ok(ControlFlow::Break(result)) => self.finish(Signal::Resolve(result)),
            Ok(ControlFlow::Continue(next)) => {
                let resume = {
                    let mut state = self.state.borrow_mut();
                    if state.done {
                        return;
                    }
                    state.cancel = None;
                    match state.timing {
                        Timing::Undetermined => {
                            state.timing = Timing::Synchronous(next.clone());
                            false
                        }
                        Timing::Synchronous(_) | Timing::Asynchronous => true,
                    }
                };
                if resume {
                    self.run(next);
                }
            }
        }
    }

    fn finish(&self, signal: Signal) {
        let handler = {
            let mut state = self.state.borrow_mut();
            if state.done {
                return;
            }
            state.done = true;
            state.cancel = None;
            state.handler.take()
        };
        if let Some(deliver) = handler {
            deliver(signal);
        }
    }

    fn halt(&self) {
        let cancel = {
            let mut state = self.state.borrow_mut();
            if state.done {
                return;
            }
            state.done = true;
            state.handler.take();
            state.cancel.take()
        };
        if let Some(cancel) = cancel {
            cancel();
        }
    }
}
