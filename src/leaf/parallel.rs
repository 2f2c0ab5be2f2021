//! Bounded fan-out.
//!
//! Interprets a list of computations with at most `limit` of them in
//! flight at once, collecting resolutions into slots by input position.
//! The first rejection or crash wins: every other in-flight member is
//! cancelled exactly once and members that never started stay cold.
//!
//! Members that settle synchronously are driven by an iterative pump: a
//! member settling while the pump is filling seats merely frees its seat
//! and lets the surrounding loop continue, so an input of any length
//! settles without growing the call stack.

use std::cell::RefCell;
use std::rc::Rc;

use crate::engine::{Cancel, Computation, Dynamic, ForkOptions, Graph, Handler, Signal, noop_cancel};
use crate::outcome::Crash;

type FinishFn = dyn Fn(Vec<Dynamic>) -> Result<Dynamic, Crash>;

/// The fan-out leaf; see [`Deferred::parallel`](crate::Deferred::parallel).
pub(crate) struct Parallel {
    limit: usize,
    members: Vec<Graph>,
    finish: Rc<FinishFn>,
}

impl Parallel {
    pub(crate) fn new(limit: usize, members: Vec<Graph>, finish: Rc<FinishFn>) -> Self {
        Self {
            limit,
            members,
            finish,
        }
    }
}

impl Computation for Parallel {
    fn name(&self) -> &'static str {
        "parallel"
    }

    fn interpret(self: Rc<Self>, options: ForkOptions, handler: Handler) -> Cancel {
        if self.limit == 0 {
            handler(Signal::Crash(Crash::contract(
                "parallel requires a concurrency limit of at least one",
            )));
            return noop_cancel();
        }
        if self.members.is_empty() {
            handler(match (self.finish)(Vec::new()) {
                Ok(value) => Signal::Resolve(value),
                Err(crash) => Signal::Crash(crash),
            });
            return noop_cancel();
        }

        let count = self.members.len();
        let run = Rc::new(ParallelRun {
            options,
            limit: self.limit,
            members: self.members.clone(),
            finish: Rc::clone(&self.finish),
            state: RefCell::new(RunState {
                cursor: 0,
                running: 0,
                remaining: count,
                cancels: (0..count).map(|_| None).collect(),
                slots: (0..count).map(|_| None).collect(),
                handler: Some(handler),
                pumping: false,
                done: false,
            }),
        });

        run.pump();
        Box::new(move || run.halt())
    }
}

struct RunState {
    cursor: usize,
    running: usize,
    remaining: usize,
    cancels: Vec<Option<Cancel>>,
    slots: Vec<Option<Dynamic>>,
    handler: Option<Handler>,
    pumping: bool,
    done: bool,
}

struct ParallelRun {
    options: ForkOptions,
    limit: usize,
    members: Vec<Graph>,
    finish: Rc<FinishFn>,
    state: RefCell<RunState>,
}

impl ParallelRun {
    /// Fills free seats until the limit, the input, or a settlement stops
    /// it. Re-entrant calls from synchronously settling members fall
    /// through; the loop that is already running picks up the freed seat.
    fn pump(self: &Rc<Self>) {
        {
            let mut state = self.state.borrow_mut();
            if state.done || state.pumping {
                return;
            }
            state.pumping = true;
        }

        loop {
            let next = {
                let mut state = self.state.borrow_mut();
                if state.done || state.cursor >= self.members.len() || state.running >= self.limit
                {
                    state.pumping = false;
                    break;
                }
                let index = state.cursor;
                state.cursor += 1;
                state.running += 1;
                index
            };

            let run = Rc::clone(self);
            let cancel = self.members[next].interpret(
                self.options,
                Box::new(move |signal| run.settled(next, signal)),
            );

            let mut state = self.state.borrow_mut();
            if !state.done && state.slots[next].is_none() {
                state.cancels[next] = Some(cancel);
            }
        }
    }

    fn settled(self: &Rc<Self>, index: usize, signal: Signal) {
        match signal {
            Signal::Resolve(value) => {
                let finished = {
                    let mut state = self.state.borrow_mut();
                    if state.done {
                        return;
                    }
                    state.slots[index] = Some(value);
                    state.cancels[index] = None;
                    state.running -= 1;
                    state.remaining -= 1;
                    state.remaining == 0
                };
                if finished {
                    self.deliver_collected();
                } else {
                    self.pump();
                }
            }
            failure @ (Signal::Reject(_) | Signal::Crash(_)) => {
                let (cancels, handler) = {
                    let mut state = self.state.borrow_mut();
                    if state.done {
                        return;
                    }
                    state.done = true;
                    state.cancels[index] = None;
                    let cancels: Vec<Cancel> =
                        state.cancels.iter_mut().filter_map(Option::take).collect();
                    (cancels, state.handler.take())
                };
                for cancel in cancels {
                    cancel();
                }
                if let Some(deliver) = handler {
                    deliver(failure);
                }
            }
        }
    }

    fn deliver_collected(self: &Rc<Self>) {
        let (collected, handler) = {
            let mut state = self.state.borrow_mut();
            if state.done {
                return;
            }
            state.done = true;
            let collected: Option<Vec<Dynamic>> =
                state.slots.iter_mut().map(Option::take).collect();
            (collected, state.handler.take())
        };
        let Some(deliver) = handler else { return };
        let signal = collected.map_or_else(
            || Signal::Crash(Crash::contract("parallel finished with an empty slot")),
            |values| match (self.finish)(values) {
                Ok(value) => Signal::Resolve(value),
                Err(crash) => Signal::Crash(crash),
            },
        );
        deliver(signal);
    }

    fn halt(self: &Rc<Self>) {
        let cancels = {
            let mut state = self.state.borrow_mut();
            if state.done {
                return;
            }
            state.done = true;
            state.handler.take();
            let cancels: Vec<Cancel> = state.cancels.iter_mut().filter_map(Option::take).collect();
            cancels
        };
        for cancel in cancels {
            cancel();
        }
    }
}
