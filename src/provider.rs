use std::fmt::Debug;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::{BoxError, Error};
use crate::Throttler;

/// Point-in-time resource usage snapshot, doubling as the threshold
/// configuration for [`Monitor`]. A zero field disables that threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Stats {
    /// Allocated heap bytes.
    pub alloc: u64,
    /// Total bytes obtained from the system.
    pub system: u64,
    /// Average collector pause in nanoseconds.
    pub avg_pause: u64,
    /// Average CPU usage fraction.
    pub avg_usage: f64,
}

/// Supplies resource usage snapshots for the monitor throttler.
pub trait StatsProvider: Debug + Send + Sync {
    fn stats(&self) -> Result<Stats, BoxError>;
}

/// Boolean backpressure probe, typically a query against an external
/// metrics system.
#[async_trait]
pub trait MetricProvider: Debug + Send + Sync {
    async fn query(&self, ctx: &Context) -> Result<bool, BoxError>;
}

/// Sink for calls diverted off the hot path.
#[async_trait]
pub trait Enqueuer: Debug + Send + Sync {
    async fn publish(&self, ctx: &Context, message: Vec<u8>) -> Result<(), BoxError>;
}

/// Fails admission when the provider's snapshot meets any enabled
/// threshold. Provider failures surface as [`Error::Provider`].
#[derive(Debug)]
pub struct Monitor<P> {
    provider: P,
    thresholds: Stats,
}

impl<P: StatsProvider> Monitor<P> {
    pub fn new(provider: P, thresholds: Stats) -> Self {
        Self {
            provider,
            thresholds,
        }
    }
}

fn meets(value: u64, threshold: u64) -> bool {
    threshold > 0 && value >= threshold
}

#[async_trait]
impl<P: StatsProvider> Throttler for Monitor<P> {
    async fn acquire(&self, _ctx: &Context) -> Result<(), Error> {
        let stats = self.provider.stats().map_err(Error::provider)?;
        if meets(stats.alloc, self.thresholds.alloc)
            || meets(stats.system, self.thresholds.system)
            || meets(stats.avg_pause, self.thresholds.avg_pause)
            || (self.thresholds.avg_usage > 0.0 && stats.avg_usage >= self.thresholds.avg_usage)
        {
            return Err(Error::StatsExceeded);
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }
}

/// Fails admission while the watched binary metric reads true.
#[derive(Debug)]
pub struct Metric<P> {
    provider: P,
}

impl<P: MetricProvider> Metric<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P: MetricProvider> Throttler for Metric<P> {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        match self.provider.query(ctx).await {
            Err(err) => Err(Error::provider(err)),
            Ok(true) => Err(Error::MetricTripped),
            Ok(false) => Ok(()),
        }
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }
}

/// Diverts the call to an external queue instead of gating it.
///
/// Acquire marshals the context's payload and publishes it exactly once;
/// a missing payload or marshaler attribute fails the call, and marshal or
/// publish failures surface wrapped as [`Error::Provider`].
#[derive(Debug)]
pub struct Enqueue<E> {
    enqueuer: E,
}

impl<E: Enqueuer> Enqueue<E> {
    pub fn new(enqueuer: E) -> Self {
        Self { enqueuer }
    }
}

#[async_trait]
impl<E: Enqueuer> Throttler for Enqueue<E> {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        let payload = ctx.payload().ok_or(Error::MissingPayload)?;
        let marshaler = ctx.marshaler().ok_or(Error::MissingMarshaler)?;
        let message = marshaler(payload).map_err(Error::provider)?;
        self.enqueuer
            .publish(ctx, message)
            .await
            .map_err(Error::provider)
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }
}
