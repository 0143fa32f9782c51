//! # gate-limit
//!
//! `gate-limit` is a library of composable throttlers: small flow-control
//! primitives that decide, at an instrumented point of a caller's execution,
//! whether the caller may proceed, must wait, must fail, or must be diverted.
//!
//! ## Core Philosophy
//!
//! Every throttler, from a trivial counter to a latency-percentile gate,
//! speaks the same two-call contract: [`Throttler::acquire`] before the
//! guarded work and [`Throttler::release`] after it. Because the contract is
//! uniform, throttlers compose: any throttler can be wrapped, combined,
//! negated, keyed, retried, or cached, and complex admission policies are
//! assembled from a fixed vocabulary of primitives.
//!
//! Per-call attributes (priority, key, timestamp, payload) travel through a
//! [`Context`] side-channel rather than through the call signatures, so
//! adding an attribute never changes the composition algebra.
//!
//! ## Key Concepts
//!
//! * **Leaves**: primitives owning their own small state, such as counters
//!   ([`Each`], [`After`], [`Fixed`], [`Running`]), bounded queues
//!   ([`Buffered`], [`Priority`]), sliding windows ([`Timed`]), latency
//!   gates ([`Latency`], [`Percentile`]), probabilistic shedding
//!   ([`Chance`]), and external probes ([`Monitor`], [`Metric`],
//!   [`Enqueue`]).
//! * **Combinators**: throttlers owning other throttlers: [`All`], [`Any`],
//!   [`Not`], [`Suppress`], [`Retry`], [`Cache`], [`Pattern`], [`Ring`],
//!   [`Keyed`], [`Adaptive`], [`Revert`].
//! * **Errors are verdicts**: a failed acquire is an [`Error`] value, never
//!   a panic. Combinators inspect, aggregate, invert, or swallow them.
//!
//! ## Example
//!
//! ```
//! use gate_limit::{Context, Error, Running, Throttler};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Error> {
//! let gate = Running::new(16);
//! let ctx = Context::new();
//!
//! if gate.acquire(&ctx).await.is_ok() {
//!     // guarded work happens here
//!     gate.release(&ctx).await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::fmt::Debug;

use async_trait::async_trait;

mod basic;
mod capacity;
mod compose;
mod context;
mod counter;
mod error;
mod latency;
mod provider;
mod route;
mod support;
mod window;


pub use basic::{Cancellation, Chance, Echo, Panic, Wait};
pub use capacity::{Buffered, Priority};
pub use compose::{All, Any, Cache, Not, Retry, Revert, Suppress, DEFAULT_RETRY_BACKOFF};
pub use context::{Context, MarshalFn, Payload};
pub use counter::{After, Before, Each, Fixed, Running};
pub use error::{Aggregate, BoxError, Error};
pub use latency::{Latency, Percentile};
pub use provider::{Enqueue, Enqueuer, Metric, MetricProvider, Monitor, Stats, StatsProvider};
pub use route::{Keyed, Pattern, PatternEntry, Ring};
pub use window::{Adaptive, Timed};

/// The core trait for all throttlers.
///
/// A successful [`acquire`](Self::acquire) obligates exactly one
/// [`release`](Self::release) on the same throttler; a failed acquire
/// obligates the caller to skip the guarded work and not release. Leaves
/// that track outstanding work ([`Running`], [`Buffered`], [`Priority`])
/// report an over-release with [`Error::NothingToRelease`] without
/// corrupting their state.
///
/// Throttlers are shared freely across concurrent callers; all interior
/// state is atomic, channel-backed, or mutex-guarded.
#[async_trait]
pub trait Throttler: Debug + Send + Sync {
    /// Admission decision point before the guarded work.
    ///
    /// May suspend ([`Wait`], [`Buffered`], [`Priority`], [`Retry`]); every
    /// suspension honors the context's cancellation token and fails with
    /// [`Error::Cancelled`]. Non-blocking throttlers return promptly.
    async fn acquire(&self, ctx: &Context) -> Result<(), Error>;

    /// Completion point after the guarded work; updates counters and
    /// latency samples.
    async fn release(&self, ctx: &Context) -> Result<(), Error>;
}

#[async_trait]
impl<T> Throttler for Box<T>
where
    T: Throttler + ?Sized,
{
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        (**self).acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        (**self).release(ctx).await
    }
}

#[async_trait]
impl<T> Throttler for std::sync::Arc<T>
where
    T: Throttler + ?Sized,
{
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        (**self).acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        (**self).release(ctx).await
    }
}
