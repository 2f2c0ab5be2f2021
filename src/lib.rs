//! # deferred
//!
//! Lazy, cancellable, composable asynchronous computations.
//!
//! ## Overview
//!
//! A [`Deferred<E, A>`] describes a computation that will eventually
//! settle with a resolution of type `A`, a rejection of type `E`, or a
//! crash. Unlike a [`Future`](std::future::Future), a `Deferred` is a
//! pure description: building one performs no work, composing
//! combinators onto one never mutates it, and the work starts only when
//! the description is forked. Every fork starts the work over, and the
//! returned [`Subscription`] cancels it again, branch by branch, without
//! ever cancelling a branch that never started.
//!
//! - **Construction**: [`Deferred::resolve`], [`Deferred::reject`],
//!   [`Deferred::after`], [`Deferred::new`], [`Deferred::from_future`],
//!   [`Deferred::attempt`], and friends.
//! - **Sequencing**: [`Deferred::map`], [`Deferred::chain`],
//!   [`Deferred::fold`], [`Deferred::lastly`], and the rest of the
//!   sequential combinators.
//! - **Concurrency**: [`Deferred::race`], [`Deferred::pair`],
//!   [`Deferred::or`], [`Deferred::parallel`] with a concurrency limit.
//! - **Recursion**: [`Deferred::chain_rec`] loops in constant stack
//!   space no matter how many steps settle synchronously.
//! - **Memoization**: [`Deferred::cache`] shares one interpretation of a
//!   source among any number of subscribers.
//!
//! The interpreter is a trampoline, so combinator chains of arbitrary
//! length settle without growing the call stack. Failures travel on two
//! strictly separate channels: rejections, the expected failures your
//! handlers recover from, and [`Crash`]es, the defects (panicking
//! handlers, contract violations) that abort the whole computation past
//! every rejection handler.
//!
//! Time-based computations schedule themselves on the current thread
//! with [`tokio::task::spawn_local`] and must therefore be forked from
//! within a [`tokio::task::LocalSet`].
//!
//! ## Example
//!
//! ```rust
//! use deferred::{Deferred, Outcome};
//!
//! let greeting = Deferred::<String, &str>::resolve("hello")
//!     .map(|word| format!("{word}, world"))
//!     .race(Deferred::never());
//!
//! greeting.fork(|outcome| {
//!     assert_eq!(outcome, Outcome::Resolved("hello, world".into()));
//! });
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod deferred;
mod engine;
mod leaf;
mod list;
mod outcome;

pub use crate::deferred::{Completer, Deferred, Subscription, Teardown};
pub use crate::engine::ForkOptions;
pub use crate::outcome::{Crash, CrashKind, Failure, Outcome};
