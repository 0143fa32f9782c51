use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::context::Context;
use crate::error::Error;
use crate::Throttler;

/// One bounded admission lane: a semaphore provides the blocking wait, a
/// separate outstanding counter keeps release pairing strict.
#[derive(Debug)]
struct Lane {
    slots: Semaphore,
    held: AtomicU64,
}

impl Lane {
    fn new(capacity: usize) -> Self {
        Self {
            slots: Semaphore::new(capacity),
            held: AtomicU64::new(0),
        }
    }

    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        tokio::select! {
            permit = self.slots.acquire() => {
                // the semaphore is never closed
                let permit = permit.map_err(|_| Error::Cancelled)?;
                permit.forget();
                self.held.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }
            _ = ctx.cancelled() => Err(Error::Cancelled),
        }
    }

    fn release(&self, ctx: &Context) -> Result<(), Error> {
        if self
            .held
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |held| held.checked_sub(1))
            .is_ok()
        {
            self.slots.add_permits(1);
            return Ok(());
        }
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Err(Error::NothingToRelease)
    }

    #[cfg(test)]
    fn capacity(&self) -> usize {
        self.slots.available_permits() + self.held.load(Ordering::Acquire) as usize
    }
}

/// Blocking token queue of fixed size.
///
/// Acquire parks the caller until a slot frees up (or the context is
/// cancelled); release hands one slot back without blocking and fails on an
/// empty queue.
#[derive(Debug)]
pub struct Buffered {
    lane: Lane,
}

impl Buffered {
    pub fn new(size: NonZeroUsize) -> Self {
        Self {
            lane: Lane::new(size.get()),
        }
    }
}

#[async_trait]
impl Throttler for Buffered {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        self.lane.acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        self.lane.release(ctx)
    }
}

/// Blocking lanes with capacity proportional to the caller's priority.
///
/// Lane `i` of `levels` (1-based) holds `ceil(size * i / sum(1..=levels))`
/// slots, so higher-priority callers obtain more concurrent capacity. The
/// context's priority attribute, clamped to `[1, levels]`, selects the lane
/// for both acquire and release.
#[derive(Debug)]
pub struct Priority {
    lanes: Vec<Lane>,
}

impl Priority {
    pub fn new(size: NonZeroUsize, levels: u8) -> Self {
        let levels = u64::from(levels.max(1));
        let weight_sum: u64 = (1..=levels).sum();
        let lanes = (1..=levels)
            .map(|level| {
                let capacity = (size.get() as u64 * level).div_ceil(weight_sum);
                Lane::new(capacity as usize)
            })
            .collect();
        Self { lanes }
    }

    fn lane(&self, ctx: &Context) -> &Lane {
        let level = ctx.priority(self.lanes.len() as u8);
        &self.lanes[usize::from(level) - 1]
    }
}

#[async_trait]
impl Throttler for Priority {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        self.lane(ctx).acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        self.lane(ctx).release(ctx)
    }
}
