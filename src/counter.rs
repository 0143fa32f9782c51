use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Error;
use crate::support;
use crate::Throttler;

/// Fails every n-th acquire with a periodic skip.
#[derive(Debug)]
pub struct Each {
    cur: AtomicU64,
    period: u64,
}

impl Each {
    pub fn new(period: NonZeroU64) -> Self {
        Self {
            cur: AtomicU64::new(0),
            period: period.get(),
        }
    }
}

#[async_trait]
impl Throttler for Each {
    async fn acquire(&self, _ctx: &Context) -> Result<(), Error> {
        let cur = self.cur.fetch_add(1, Ordering::AcqRel) + 1;
        if cur % self.period == 0 {
            return Err(Error::PeriodicSkip { count: cur });
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }
}

/// Admits only from the n-th acquire on: the first `threshold - 1` calls
/// fail, everything after passes.
#[derive(Debug)]
pub struct After {
    cur: AtomicU64,
    threshold: u64,
}

impl After {
    pub fn new(threshold: u64) -> Self {
        Self {
            cur: AtomicU64::new(0),
            threshold,
        }
    }
}

#[async_trait]
impl Throttler for After {
    async fn acquire(&self, _ctx: &Context) -> Result<(), Error> {
        let cur = self.cur.fetch_add(1, Ordering::AcqRel) + 1;
        if cur < self.threshold {
            return Err(Error::NotReached { count: cur });
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }
}

/// Mirror of [`After`]: admits the first `threshold - 1` calls, then fails.
#[derive(Debug)]
pub struct Before {
    cur: AtomicU64,
    threshold: u64,
}

impl Before {
    pub fn new(threshold: u64) -> Self {
        Self {
            cur: AtomicU64::new(0),
            threshold,
        }
    }
}

#[async_trait]
impl Throttler for Before {
    async fn acquire(&self, _ctx: &Context) -> Result<(), Error> {
        let cur = self.cur.fetch_add(1, Ordering::AcqRel) + 1;
        if cur >= self.threshold {
            return Err(Error::Exceeded { count: cur });
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }
}

/// Monotone accepted-count ceiling; release is deliberately a no-op.
///
/// A rejected acquire rolls its increment back, so at most `max` acquires
/// ever succeed between decays. The ceiling itself is atomic so the
/// adaptive throttler can reshape it while the timed decay loop drains the
/// counter.
#[derive(Debug)]
pub struct Fixed {
    cur: AtomicU64,
    max: AtomicU64,
}

impl Fixed {
    pub fn new(max: u64) -> Self {
        Self {
            cur: AtomicU64::new(0),
            max: AtomicU64::new(max),
        }
    }

    /// Subtracts `delta` accepted calls, clamping at zero; returns what is
    /// left in the counter.
    pub(crate) fn decay(&self, delta: u64) -> u64 {
        support::decr_clamped(&self.cur, delta)
    }

    pub(crate) fn raise(&self, step: u64) {
        self.max.fetch_add(step, Ordering::AcqRel);
    }

    pub(crate) fn lower(&self, step: u64) {
        support::decr_clamped(&self.max, step);
    }
}

#[async_trait]
impl Throttler for Fixed {
    async fn acquire(&self, _ctx: &Context) -> Result<(), Error> {
        let cur = self.cur.fetch_add(1, Ordering::AcqRel) + 1;
        if cur > self.max.load(Ordering::Acquire) {
            self.cur.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::Exceeded { count: cur });
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }
}

/// In-flight gate with optimistic admission and strict release pairing.
///
/// A rejected acquire rolls its increment back, so only successful acquires
/// occupy capacity and a release is owed only for those.
#[derive(Debug)]
pub struct Running {
    run: AtomicU64,
    max: u64,
}

impl Running {
    pub fn new(max: u64) -> Self {
        Self {
            run: AtomicU64::new(0),
            max,
        }
    }
}

#[async_trait]
impl Throttler for Running {
    async fn acquire(&self, _ctx: &Context) -> Result<(), Error> {
        let running = self.run.fetch_add(1, Ordering::AcqRel) + 1;
        if running > self.max {
            self.run.fetch_sub(1, Ordering::AcqRel);
            return Err(Error::Saturated { running });
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        self.run
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |run| run.checked_sub(1))
            .map(|_| ())
            .map_err(|_| Error::NothingToRelease)
    }
}
