//! Settlement types for computations.
//!
//! A computation settles through exactly one of three channels:
//!
//! - **Resolution**: the expected success channel.
//! - **Rejection**: the expected, recoverable failure channel. Rejections
//!   carry the user's error type and can be mapped, folded, or recovered
//!   from with combinators.
//! - **Crash**: the unexpected failure channel. A crash means the program
//!   itself is defective (a panicking handler, a contract violation) and
//!   it aborts the whole computation, bypassing every rejection handler.
//!
//! The channels never mix: a rejection handler cannot observe a crash and
//! a crash cannot be converted back into a rejection.

use std::any::Any;
use std::rc::Rc;

// =============================================================================
// Crash
// =============================================================================

/// Classifies what produced a [`Crash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashKind {
    /// A user-supplied handler panicked while it was being evaluated.
    Panic,
    /// The computation was used in a way that violates its contract,
    /// for example interpreting a one-shot future adapter twice.
    Contract,
    /// The crash was raised deliberately, either with
    /// [`Deferred::crashed`](crate::Deferred::crashed) or by the engine
    /// escalating an unrecoverable condition such as a failed resource
    /// disposal.
    Reported,
}

#[derive(Debug, PartialEq, Eq)]
struct CrashInner {
    kind: CrashKind,
    message: String,
    trace: Vec<&'static str>,
}

/// An unexpected, unrecoverable failure of a computation.
///
/// Crashes supersede pending rejections and resolutions: once a crash
/// occurs, every started branch of the computation is cancelled and the
/// crash is delivered to the consumer as
/// [`Outcome::Crashed`].
///
/// A crash is cheap to clone; the payload is shared.
///
/// # Examples
///
/// ```rust
/// use deferred::{Crash, CrashKind};
///
/// let crash = Crash::new("subsystem entered an impossible state");
/// assert_eq!(crash.kind(), CrashKind::Reported);
/// assert_eq!(
///     format!("{crash}"),
///     "computation crashed: subsystem entered an impossible state"
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Crash {
    inner: Rc<CrashInner>,
}

impl Crash {
    fn with_kind(kind: CrashKind, message: String) -> Self {
        Self {
            inner: Rc::new(CrashInner {
                kind,
                message,
                trace: Vec::new(),
            }),
        }
    }

    /// Creates a deliberate crash carrying `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_kind(CrashKind::Reported, message.into())
    }

    /// Creates a contract-violation crash carrying `message`.
    #[must_use]
    pub fn contract(message: impl Into<String>) -> Self {
        Self::with_kind(CrashKind::Contract, message.into())
    }

    /// Creates a crash from a caught panic payload, recording where the
    /// panic surfaced.
    pub(crate) fn from_panic(payload: &(dyn Any + Send), at: &'static str) -> Self {
        let text = payload.downcast_ref::<&str>().map_or_else(
            || {
                payload
                    .downcast_ref::<String>()
                    .map_or("opaque panic payload", String::as_str)
            },
            |message| *message,
        );
        Self::with_kind(CrashKind::Panic, format!("panic in {at}: {text}"))
    }

    /// Attaches an interpretation trace unless one is already present.
    pub(crate) fn traced(self, trace: Vec<&'static str>) -> Self {
        if trace.is_empty() || !self.inner.trace.is_empty() {
            return self;
        }
        Self {
            inner: Rc::new(CrashInner {
                kind: self.inner.kind,
                message: self.inner.message.clone(),
                trace,
            }),
        }
    }

    /// Returns what produced this crash.
    #[must_use]
    pub fn kind(&self) -> CrashKind {
        self.inner.kind
    }

    /// Returns the human-readable description of the crash.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Returns the names of the transformations that had been applied
    /// when the crash occurred, oldest first.
    ///
    /// The trace is empty unless the computation was interpreted with
    /// [`ForkOptions`](crate::ForkOptions) that enable trace capture.
    #[must_use]
    pub fn trace(&self) -> &[&'static str] {
        &self.inner.trace
    }
}

impl std::fmt::Display for Crash {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "computation crashed: {}", self.inner.message)?;
        for name in &self.inner.trace {
            write!(formatter, "\n  after {name}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Crash {}

// =============================================================================
// Outcome
// =============================================================================

/// The settlement of a computation, one value per channel.
///
/// # Examples
///
/// ```rust
/// use deferred::{Deferred, Outcome};
///
/// Deferred::<String, i32>::resolve(42).fork(|outcome| {
///     assert_eq!(outcome, Outcome::Resolved(42));
/// });
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<E, A> {
    /// The computation crashed; see [`Crash`].
    Crashed(Crash),
    /// The computation rejected with a reason of type `E`.
    Rejected(E),
    /// The computation resolved with a value of type `A`.
    Resolved(A),
}

impl<E, A> Outcome<E, A> {
    /// Returns `true` for [`Outcome::Resolved`].
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }

    /// Returns `true` for [`Outcome::Rejected`].
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Returns `true` for [`Outcome::Crashed`].
    #[must_use]
    pub const fn is_crashed(&self) -> bool {
        matches!(self, Self::Crashed(_))
    }

    /// Returns the resolution value, if any.
    pub fn resolved(self) -> Option<A> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Crashed(_) | Self::Rejected(_) => None,
        }
    }

    /// Returns the rejection reason, if any.
    pub fn rejected(self) -> Option<E> {
        match self {
            Self::Rejected(reason) => Some(reason),
            Self::Crashed(_) | Self::Resolved(_) => None,
        }
    }
}

/// The failure half of a settlement, used by
/// [`Deferred::run`](crate::Deferred::run) where the success channel is
/// carried by [`Result::Ok`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure<E> {
    /// The computation crashed; see [`Crash`].
    Crashed(Crash),
    /// The computation rejected with a reason of type `E`.
    Rejected(E),
}

impl<E: std::fmt::Display> std::fmt::Display for Failure<E> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Crashed(crash) => write!(formatter, "{crash}"),
            Self::Rejected(reason) => write!(formatter, "computation rejected: {reason}"),
        }
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for Failure<E> {}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_crash_display_without_trace() {
        let crash = Crash::new("boom");
        assert_eq!(format!("{crash}"), "computation crashed: boom");
    }

    #[rstest]
    fn test_crash_display_with_trace() {
        let crash = Crash::new("boom").traced(vec!["map", "chain"]);
        assert_eq!(
            format!("{crash}"),
            "computation crashed: boom\n  after map\n  after chain"
        );
    }

    #[rstest]
    fn test_traced_does_not_overwrite_existing_trace() {
        let crash = Crash::new("boom").traced(vec!["map"]);
        let retraced = crash.traced(vec!["chain"]);
        assert_eq!(retraced.trace(), &["map"]);
    }

    #[rstest]
    fn test_panic_payload_message_is_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("went sideways");
        let crash = Crash::from_panic(payload.as_ref(), "map");
        assert_eq!(crash.kind(), CrashKind::Panic);
        assert_eq!(crash.message(), "panic in map: went sideways");
    }

    #[rstest]
    fn test_panic_payload_string_is_extracted() {
        let payload: Box<dyn Any + Send> = Box::new(String::from("went sideways"));
        let crash = Crash::from_panic(payload.as_ref(), "chain");
        assert_eq!(crash.message(), "panic in chain: went sideways");
    }

    #[rstest]
    #[case(Outcome::<String, i32>::Resolved(1), true, false, false)]
    #[case(Outcome::<String, i32>::Rejected("no".into()), false, true, false)]
    #[case(Outcome::<String, i32>::Crashed(Crash::new("boom")), false, false, true)]
    fn test_outcome_predicates(
        #[case] outcome: Outcome<String, i32>,
        #[case] resolved: bool,
        #[case] rejected: bool,
        #[case] crashed: bool,
    ) {
        assert_eq!(outcome.is_resolved(), resolved);
        assert_eq!(outcome.is_rejected(), rejected);
        assert_eq!(outcome.is_crashed(), crashed);
    }

    #[rstest]
    fn test_failure_display() {
        let failure: Failure<String> = Failure::Rejected("denied".into());
        assert_eq!(format!("{failure}"), "computation rejected: denied");
    }
}
