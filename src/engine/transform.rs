//! Sequential transformation kinds.
//!
//! Each kind stores the erased form of a user handler and reacts to one
//! or both settlement channels. None of them start work of their own, so
//! they stay inert when warmed and need no cancellation.

use std::rc::Rc;

use super::{Dynamic, Graph, Transformation};
use crate::outcome::Crash;

/// An erased unary handler producing a replacement value.
pub(crate) type ValueFn = dyn Fn(Dynamic) -> Result<Dynamic, Crash>;

/// An erased unary handler producing a replacement graph.
pub(crate) type GraphFn = dyn Fn(Dynamic) -> Result<Graph, Crash>;

fn value_graph(result: Result<Dynamic, Crash>, channel: fn(Dynamic) -> Graph) -> Graph {
    match result {
        Ok(value) => channel(value),
        Err(crash) => Graph::crashed(crash),
    }
}

fn continuation_graph(result: Result<Graph, Crash>) -> Graph {
    result.unwrap_or_else(Graph::crashed)
}

/// Applies a handler to the resolution value.
pub(crate) struct Map {
    pub(crate) function: Rc<ValueFn>,
}

impl Transformation for Map {
    fn name(&self) -> &'static str {
        "map"
    }

    fn resolved(self: Rc<Self>, value: Dynamic) -> Graph {
        value_graph((self.function)(value), Graph::resolve)
    }
}

/// Applies a handler to the rejection reason.
pub(crate) struct MapRej {
    pub(crate) function: Rc<ValueFn>,
}

impl Transformation for MapRej {
    fn name(&self) -> &'static str {
        "map_rej"
    }

    fn rejected(self: Rc<Self>, reason: Dynamic) -> Graph {
        value_graph((self.function)(reason), Graph::reject)
    }
}

/// Applies one handler per channel, each channel staying where it is.
pub(crate) struct Bimap {
    pub(crate) on_reject: Rc<ValueFn>,
    pub(crate) on_resolve: Rc<ValueFn>,
}

impl Transformation for Bimap {
    fn name(&self) -> &'static str {
        "bimap"
    }

    fn rejected(self: Rc<Self>, reason: Dynamic) -> Graph {
        value_graph((self.on_reject)(reason), Graph::reject)
    }

    fn resolved(self: Rc<Self>, value: Dynamic) -> Graph {
        value_graph((self.on_resolve)(value), Graph::resolve)
    }
}

/// Continues with the graph produced from the resolution value.
pub(crate) struct Chain {
    pub(crate) function: Rc<GraphFn>,
}

impl Transformation for Chain {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn resolved(self: Rc<Self>, value: Dynamic) -> Graph {
        continuation_graph((self.function)(value))
    }
}

/// Continues with the graph produced from the rejection reason.
pub(crate) struct ChainRej {
    pub(crate) function: Rc<GraphFn>,
}

impl Transformation for ChainRej {
    fn name(&self) -> &'static str {
        "chain_rej"
    }

    fn rejected(self: Rc<Self>, reason: Dynamic) -> Graph {
        continuation_graph((self.function)(reason))
    }
}

/// Coalesces both channels into the resolution channel.
pub(crate) struct Fold {
    pub(crate) on_reject: Rc<ValueFn>,
    pub(crate) on_resolve: Rc<ValueFn>,
}

impl Transformation for Fold {
    fn name(&self) -> &'static str {
        "fold"
    }

    fn rejected(self: Rc<Self>, reason: Dynamic) -> Graph {
        value_graph((self.on_reject)(reason), Graph::resolve)
    }

    fn resolved(self: Rc<Self>, value: Dynamic) -> Graph {
        value_graph((self.on_resolve)(value), Graph::resolve)
    }
}

/// Exchanges the rejection and resolution channels.
pub(crate) struct Swap;

impl Transformation for Swap {
    fn name(&self) -> &'static str {
        "swap"
    }

    fn rejected(self: Rc<Self>, reason: Dynamic) -> Graph {
        Graph::resolve(reason)
    }

    fn resolved(self: Rc<Self>, value: Dynamic) -> Graph {
        Graph::reject(value)
    }
}

/// Discards the resolution value and continues with the next graph.
/// Rejections short-circuit; the next graph never starts.
pub(crate) struct And {
    pub(crate) next: Graph,
}

impl Transformation for And {
    fn name(&self) -> &'static str {
        "and"
    }

    fn resolved(self: Rc<Self>, _value: Dynamic) -> Graph {
        self.next.clone()
    }
}

/// Discards the rejection reason and continues with the fallback graph.
/// Resolutions short-circuit; the fallback never starts.
pub(crate) struct Alt {
    pub(crate) fallback: Graph,
}

impl Transformation for Alt {
    fn name(&self) -> &'static str {
        "alt"
    }

    fn rejected(self: Rc<Self>, _reason: Dynamic) -> Graph {
        self.fallback.clone()
    }
}

/// Runs the value future first and feeds its resolution to the function
/// the second graph resolves with.
pub(crate) struct Apply {
    pub(crate) function: Graph,
    pub(crate) combine: Rc<dyn Fn(Dynamic, Dynamic) -> Result<Dynamic, Crash>>,
}

impl Transformation for Apply {
    fn name(&self) -> &'static str {
        "ap"
    }

    fn resolved(self: Rc<Self>, value: Dynamic) -> Graph {
        let combine = Rc::clone(&self.combine);
        self.function.transform(Rc::new(Map {
            function: Rc::new(move |function| combine(value.clone(), function)),
        }))
    }
}

/// Runs a cleanup graph after either settlement, then restores the
/// original settlement. A rejection of the cleanup graph wins over the
/// restored settlement.
pub(crate) struct Lastly {
    pub(crate) cleanup: Graph,
}

impl Transformation for Lastly {
    fn name(&self) -> &'static str {
        "lastly"
    }

    fn rejected(self: Rc<Self>, reason: Dynamic) -> Graph {
        self.cleanup.transform(Rc::new(RestoreReject { reason }))
    }

    fn resolved(self: Rc<Self>, value: Dynamic) -> Graph {
        self.cleanup.transform(Rc::new(RestoreResolve { value }))
    }
}

/// Replaces the cleanup graph's resolution with a remembered resolution.
struct RestoreResolve {
    value: Dynamic,
}

impl Transformation for RestoreResolve {
    fn name(&self) -> &'static str {
        "restore"
    }

    fn resolved(self: Rc<Self>, _cleanup_value: Dynamic) -> Graph {
        Graph::resolve(self.value.clone())
    }
}

/// Replaces the cleanup graph's resolution with a remembered rejection.
struct RestoreReject {
    reason: Dynamic,
}

impl Transformation for RestoreReject {
    fn name(&self) -> &'static str {
        "restore"
    }

    fn resolved(self: Rc<Self>, _cleanup_value: Dynamic) -> Graph {
        Graph::reject(self.reason.clone())
    }
}
