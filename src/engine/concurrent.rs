//! Concurrent transformation kinds.
//!
//! These kinds own an operand graph. While the settlement of the chain
//! they are composed onto is still pending they can be warmed up, at
//! which point they start interpreting their operand; chain and operand
//! then race to settle first. Until warm-up the operand is completely
//! inert, and a chain that settles beforehand decides the outcome alone,
//! with the operand never starting.
//!
//! The hot forms hold the operand's cancel and at most one buffered
//! operand settlement. They short-circuit the surrounding interpretation
//! through [`Early`] when the operand's settlement decides the outcome
//! outright.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use super::{
    Cancel, Computation, Dynamic, Early, ForkOptions, Graph, Handler, Signal, Transformation,
};
use crate::outcome::Crash;

/// Combines the chain's resolution with the operand's resolution.
pub(crate) type CombineFn = dyn Fn(Dynamic, Dynamic) -> Result<Dynamic, Crash>;

fn combined_graph(combine: &CombineFn, first: Dynamic, second: Dynamic) -> Graph {
    match combine(first, second) {
        Ok(value) => Graph::resolve(value),
        Err(crash) => Graph::crashed(crash),
    }
}

// =============================================================================
// Race
// =============================================================================

/// Settles with whichever of chain and operand settles first, cancelling
/// the other.
pub(crate) struct Race {
    pub(crate) operand: Graph,
}

impl Transformation for Race {
    fn name(&self) -> &'static str {
        "race"
    }

    fn warm_up(self: Rc<Self>, early: Early) -> Option<Rc<dyn Transformation>> {
        let hot = Rc::new(RaceHot {
            cancel: RefCell::new(None),
        });
        let signal_early = early.clone();
        let handler: Handler = Box::new(move |signal| {
            signal_early.terminate(Graph::of_signal(signal));
        });
        let cancel = self.operand.interpret(early.options(), handler);
        *hot.cancel.borrow_mut() = Some(cancel);
        Some(hot)
    }
}

struct RaceHot {
    cancel: RefCell<Option<Cancel>>,
}

impl RaceHot {
    fn cancel_operand(&self) {
        if let Some(cancel) = self.cancel.borrow_mut().take() {
            cancel();
        }
    }
}

impl Transformation for RaceHot {
    fn name(&self) -> &'static str {
        "race"
    }

    fn rejected(self: Rc<Self>, reason: Dynamic) -> Graph {
        self.cancel_operand();
        Graph::reject(reason)
    }

    fn resolved(self: Rc<Self>, value: Dynamic) -> Graph {
        self.cancel_operand();
        Graph::resolve(value)
    }

    fn cancel(&self) {
        self.cancel_operand();
    }
}

// =============================================================================
// Join (pair and concurrent apply)
// =============================================================================

/// Waits for both the chain and the operand to resolve, then combines
/// the two resolutions. A rejection or crash of either side settles the
/// outcome immediately and cancels the other side.
///
/// Serves both the pairing combinator and concurrent apply; only the
/// combine step differs.
pub(crate) struct Join {
    pub(crate) label: &'static str,
    pub(crate) operand: Graph,
    pub(crate) combine: Rc<CombineFn>,
}

impl Transformation for Join {
    fn name(&self) -> &'static str {
        self.label
    }

    fn resolved(self: Rc<Self>, value: Dynamic) -> Graph {
        // Chain settled before warm-up: continue sequentially with the
        // operand and join in place.
        self.operand.transform(Rc::new(PairJoin {
            first: value,
            combine: Rc::clone(&self.combine),
        }))
    }

    fn warm_up(self: Rc<Self>, early: Early) -> Option<Rc<dyn Transformation>> {
        let hot = Rc::new(JoinHot {
            label: self.label,
            combine: Rc::clone(&self.combine),
            early: early.clone(),
            state: RefCell::new(JoinState::Waiting { cancel: None }),
        });
        let observer = Rc::clone(&hot);
        let handler: Handler = Box::new(move |signal| observer.operand_settled(signal));
        let cancel = self.operand.interpret(early.options(), handler);
        {
            let mut state = hot.state.borrow_mut();
            if let JoinState::Waiting { cancel: slot } = &mut *state {
                *slot = Some(cancel);
            }
        }
        Some(hot)
    }
}

/// Joins a remembered first resolution with the operand's resolution;
/// used when the chain settled before the operand ever started.
pub(crate) struct PairJoin {
    pub(crate) first: Dynamic,
    pub(crate) combine: Rc<CombineFn>,
}

impl Transformation for PairJoin {
    fn name(&self) -> &'static str {
        "pair_join"
    }

    fn resolved(self: Rc<Self>, second: Dynamic) -> Graph {
        combined_graph(&*self.combine, self.first.clone(), second)
    }
}

enum JoinState {
    /// Operand running, chain unsettled.
    Waiting { cancel: Option<Cancel> },
    /// Operand resolved first; resolution buffered.
    Buffered(Dynamic),
    /// Chain resolved first; the relay is waiting for the operand.
    Relaying {
        first: Dynamic,
        waiter: Option<Handler>,
        cancel: Option<Cancel>,
    },
    Finished,
}

struct JoinHot {
    label: &'static str,
    combine: Rc<CombineFn>,
    early: Early,
    state: RefCell<JoinState>,
}

impl JoinHot {
    fn operand_settled(self: Rc<Self>, signal: Signal) {
        let mut state = self.state.borrow_mut();
        match mem::replace(&mut *state, JoinState::Finished) {
            JoinState::Waiting { .. } => match signal {
                Signal::Resolve(second) => *state = JoinState::Buffered(second),
                failure @ (Signal::Reject(_) | Signal::Crash(_)) => {
                    drop(state);
                    self.early.terminate(Graph::of_signal(failure));
                }
            },
            JoinState::Relaying { first, waiter, .. } => {
                drop(state);
                let Some(deliver) = waiter else { return };
                match signal {
                    Signal::Resolve(second) => match (self.combine)(first, second) {
                        Ok(value) => deliver(Signal::Resolve(value)),
                        Err(crash) => deliver(Signal::Crash(crash)),
                    },
                    failure @ (Signal::Reject(_) | Signal::Crash(_)) => deliver(failure),
                }
            }
            finished @ (JoinState::Buffered(_) | JoinState::Finished) => *state = finished,
        }
    }
}

impl Transformation for JoinHot {
    fn name(&self) -> &'static str {
        self.label
    }

    fn rejected(self: Rc<Self>, reason: Dynamic) -> Graph {
        let mut state = self.state.borrow_mut();
        if let JoinState::Waiting { cancel } = mem::replace(&mut *state, JoinState::Finished) {
            drop(state);
            if let Some(cancel) = cancel {
                cancel();
            }
        }
        Graph::reject(reason)
    }

    fn resolved(self: Rc<Self>, first: Dynamic) -> Graph {
        let mut state = self.state.borrow_mut();
        match mem::replace(&mut *state, JoinState::Finished) {
            JoinState::Buffered(second) => {
                drop(state);
                combined_graph(&*self.combine, first, second)
            }
            JoinState::Waiting { cancel } => {
                *state = JoinState::Relaying {
                    first,
                    waiter: None,
                    cancel,
                };
                drop(state);
                Graph::single(Rc::new(JoinRelay { hot: self }))
            }
            JoinState::Relaying { .. } | JoinState::Finished => {
                Graph::crashed(Crash::contract("join settled twice"))
            }
        }
    }

    fn cancel(&self) {
        let mut state = self.state.borrow_mut();
        match mem::replace(&mut *state, JoinState::Finished) {
            JoinState::Waiting { cancel } | JoinState::Relaying { cancel, .. } => {
                drop(state);
                if let Some(cancel) = cancel {
                    cancel();
                }
            }
            JoinState::Buffered(_) | JoinState::Finished => {}
        }
    }
}

/// Stands in for the operand while the chain's resolution is buffered in
/// the hot join.
struct JoinRelay {
    hot: Rc<JoinHot>,
}

impl Computation for JoinRelay {
    fn name(&self) -> &'static str {
        "pair_join"
    }

    fn interpret(self: Rc<Self>, _options: ForkOptions, handler: Handler) -> Cancel {
        {
            let mut state = self.hot.state.borrow_mut();
            if let JoinState::Relaying { waiter, .. } = &mut *state {
                *waiter = Some(handler);
            }
        }
        let hot = Rc::clone(&self.hot);
        Box::new(move || hot.cancel())
    }
}

// =============================================================================
// Or
// =============================================================================

/// Runs the operand alongside the chain with preference for the chain:
/// the chain's resolution wins outright, while the chain's rejection is
/// discarded and the operand's settlement decides.
pub(crate) struct Or {
    pub(crate) operand: Graph,
}

impl Transformation for Or {
    fn name(&self) -> &'static str {
        "or"
    }

    fn rejected(self: Rc<Self>, _reason: Dynamic) -> Graph {
        // Chain rejected before warm-up: fall through to the operand.
        self.operand.clone()
    }

    fn warm_up(self: Rc<Self>, early: Early) -> Option<Rc<dyn Transformation>> {
        let hot = Rc::new(OrHot {
            early: early.clone(),
            state: RefCell::new(OrState::Waiting {
                cancel: None,
                buffered: None,
            }),
        });
        let observer = Rc::clone(&hot);
        let handler: Handler = Box::new(move |signal| observer.operand_settled(signal));
        let cancel = self.operand.interpret(early.options(), handler);
        {
            let mut state = hot.state.borrow_mut();
            if let OrState::Waiting { cancel: slot, .. } = &mut *state {
                *slot = Some(cancel);
            }
        }
        Some(hot)
    }
}

enum OrState {
    /// Operand running or buffered, chain unsettled.
    Waiting {
        cancel: Option<Cancel>,
        buffered: Option<Signal>,
    },
    /// Chain rejected first; the relay is waiting for the operand.
    Relaying {
        waiter: Option<Handler>,
        cancel: Option<Cancel>,
    },
    Finished,
}

struct OrHot {
    early: Early,
    state: RefCell<OrState>,
}

impl OrHot {
    fn operand_settled(self: Rc<Self>, signal: Signal) {
        let mut state = self.state.borrow_mut();
        match mem::replace(&mut *state, OrState::Finished) {
            OrState::Waiting { .. } => match signal {
                // The chain keeps its preference: buffer, do not pre-empt.
                buffered @ (Signal::Resolve(_) | Signal::Reject(_)) => {
                    *state = OrState::Waiting {
                        cancel: None,
                        buffered: Some(buffered),
                    };
                }
                crash @ Signal::Crash(_) => {
                    drop(state);
                    self.early.terminate(Graph::of_signal(crash));
                }
            },
            OrState::Relaying { waiter, .. } => {
                drop(state);
                if let Some(deliver) = waiter {
                    deliver(signal);
                }
            }
            OrState::Finished => {}
        }
    }
}

impl Transformation for OrHot {
    fn name(&self) -> &'static str {
        "or"
    }

    fn rejected(self: Rc<Self>, _reason: Dynamic) -> Graph {
        let mut state = self.state.borrow_mut();
        match mem::replace(&mut *state, OrState::Finished) {
            OrState::Waiting {
                buffered: Some(signal),
                ..
            } => {
                drop(state);
                Graph::of_signal(signal)
            }
            OrState::Waiting {
                cancel,
                buffered: None,
            } => {
                *state = OrState::Relaying {
                    waiter: None,
                    cancel,
                };
                drop(state);
                Graph::single(Rc::new(OrRelay { hot: self }))
            }
            OrState::Relaying { .. } | OrState::Finished => {
                Graph::crashed(Crash::contract("or settled twice"))
            }
        }
    }

    fn resolved(self: Rc<Self>, value: Dynamic) -> Graph {
        self.cancel();
        Graph::resolve(value)
    }

    fn cancel(&self) {
        let mut state = self.state.borrow_mut();
        match mem::replace(&mut *state, OrState::Finished) {
            OrState::Waiting { cancel, .. } | OrState::Relaying { cancel, .. } => {
                drop(state);
                if let Some(cancel) = cancel {
                    cancel();
                }
            }
            OrState::Finished => {}
        }
    }
}

/// Stands in for the operand after the chain rejected.
struct OrRelay {
    hot: Rc<OrHot>,
}

impl Computation for OrRelay {
    fn name(&self) -> &'static str {
        "or"
    }

    fn interpret(self: Rc<Self>, _options: ForkOptions, handler: Handler) -> Cancel {
        {
            let mut state = self.hot.state.borrow_mut();
            if let OrState::Relaying { waiter, .. } = &mut *state {
                *waiter = Some(handler);
            }
        }
        let hot = Rc::clone(&self.hot);
        Box::new(move || hot.cancel())
    }
}
