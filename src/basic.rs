use async_trait::async_trait;
use tokio::time::{self, Duration};
use tracing::error;

use crate::context::Context;
use crate::error::Error;
use crate::Throttler;

/// Returns a fixed verdict from both acquire and release.
///
/// The identity element of the composition algebra, and the usual stand-in
/// child when testing combinators.
#[derive(Debug, Clone, Default)]
pub struct Echo {
    verdict: Option<Error>,
}

impl Echo {
    pub fn new(verdict: Option<Error>) -> Self {
        Self { verdict }
    }

    /// An echo that always admits.
    pub fn pass() -> Self {
        Self { verdict: None }
    }

    /// An echo that always fails with `err`.
    pub fn fail(err: Error) -> Self {
        Self { verdict: Some(err) }
    }

    fn verdict(&self) -> Result<(), Error> {
        match &self.verdict {
            None => Ok(()),
            Some(err) => Err(err.clone()),
        }
    }
}

#[async_trait]
impl Throttler for Echo {
    async fn acquire(&self, _ctx: &Context) -> Result<(), Error> {
        self.verdict()
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        self.verdict()
    }
}

/// Delays every admission by a fixed duration.
#[derive(Debug, Clone, Copy)]
pub struct Wait {
    delay: Duration,
}

impl Wait {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Throttler for Wait {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        tokio::select! {
            _ = time::sleep(self.delay) => Ok(()),
            _ = ctx.cancelled() => Err(Error::Cancelled),
        }
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }
}

/// The sole aborting primitive: acquire panics instead of returning a
/// verdict. Place it behind combinators that must never be reached.
#[derive(Debug, Clone, Copy, Default)]
pub struct Panic;

impl Panic {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Throttler for Panic {
    async fn acquire(&self, _ctx: &Context) -> Result<(), Error> {
        error!("fatal throttler reached");
        panic!("fatal throttler reached");
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }
}

/// Fails both calls once the context's cancellation token has fired.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cancellation;

impl Cancellation {
    pub fn new() -> Self {
        Self
    }

    fn check(ctx: &Context) -> Result<(), Error> {
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

#[async_trait]
impl Throttler for Cancellation {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        Self::check(ctx)
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        Self::check(ctx)
    }
}

/// Sheds each call with the configured probability.
///
/// The probability is absolute-valued and clamped to `[0, 1]`, so `p >= 1`
/// rejects every call and `p == 0` admits every call.
#[derive(Debug, Clone, Copy)]
pub struct Chance {
    probability: f64,
}

impl Chance {
    pub fn new(probability: f64) -> Self {
        Self {
            probability: probability.abs().min(1.0),
        }
    }
}

#[async_trait]
impl Throttler for Chance {
    async fn acquire(&self, _ctx: &Context) -> Result<(), Error> {
        // random::<f64>() never yields exactly 1.0, keep p >= 1 deterministic
        if self.probability >= 1.0 || self.probability > 1.0 - rand::random::<f64>() {
            return Err(Error::ChanceMissed);
        }
        Ok(())
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        Ok(())
    }
}
