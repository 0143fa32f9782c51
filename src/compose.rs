use std::sync::Mutex;

use async_trait::async_trait;
use futures::future;
use tokio::time::{self, Duration, Instant};

use crate::context::Context;
use crate::error::{Aggregate, Error};
use crate::Throttler;

/// Default pause between retry attempts.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Ordered disjunction: admits as soon as any child admits.
///
/// Children are consulted in order and the scan stops at the first pass;
/// when every child fails the verdict aggregates all their errors. An empty
/// list admits.
#[derive(Debug, Default)]
pub struct All {
    children: Vec<Box<dyn Throttler>>,
}

impl All {
    pub fn new(children: Vec<Box<dyn Throttler>>) -> Self {
        Self { children }
    }
}

#[async_trait]
impl Throttler for All {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        let mut failures = Vec::new();
        for child in &self.children {
            match child.acquire(ctx).await {
                Ok(()) => return Ok(()),
                Err(err) => failures.push(err),
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        Err(Error::Composite(Aggregate(failures)))
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        let mut failures = Vec::new();
        for child in &self.children {
            match child.release(ctx).await {
                Ok(()) => return Ok(()),
                Err(err) => failures.push(err),
            }
        }
        if failures.is_empty() {
            return Ok(());
        }
        Err(Error::Composite(Aggregate(failures)))
    }
}

/// Parallel conjunction: admits only when every child admits.
///
/// Children run concurrently, so the combinator's latency is the slowest
/// child rather than the sum; all child errors are collected into one
/// aggregate verdict. An empty list admits.
#[derive(Debug, Default)]
pub struct Any {
    children: Vec<Box<dyn Throttler>>,
}

impl Any {
    pub fn new(children: Vec<Box<dyn Throttler>>) -> Self {
        Self { children }
    }

    fn collect(verdicts: Vec<Result<(), Error>>) -> Result<(), Error> {
        let failures: Vec<Error> = verdicts.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            return Ok(());
        }
        Err(Error::Composite(Aggregate(failures)))
    }
}

#[async_trait]
impl Throttler for Any {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        let verdicts = future::join_all(self.children.iter().map(|child| child.acquire(ctx))).await;
        Self::collect(verdicts)
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        let verdicts = future::join_all(self.children.iter().map(|child| child.release(ctx))).await;
        Self::collect(verdicts)
    }
}

/// Verdict inversion: admits when the child fails, fails when it admits.
#[derive(Debug)]
pub struct Not {
    child: Box<dyn Throttler>,
}

impl Not {
    pub fn new(child: Box<dyn Throttler>) -> Self {
        Self { child }
    }
}

#[async_trait]
impl Throttler for Not {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        match self.child.acquire(ctx).await {
            Ok(()) => Err(Error::Inverted),
            Err(_) => Ok(()),
        }
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        match self.child.release(ctx).await {
            Ok(()) => Err(Error::Inverted),
            Err(_) => Ok(()),
        }
    }
}

/// Verdict inversion that exists to flip a child used for its side effects;
/// the child still runs on every call, exactly as under [`Not`].
#[derive(Debug)]
pub struct Revert {
    child: Box<dyn Throttler>,
}

impl Revert {
    pub fn new(child: Box<dyn Throttler>) -> Self {
        Self { child }
    }
}

#[async_trait]
impl Throttler for Revert {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        match self.child.acquire(ctx).await {
            Ok(()) => Err(Error::Inverted),
            Err(_) => Ok(()),
        }
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        match self.child.release(ctx).await {
            Ok(()) => Err(Error::Inverted),
            Err(_) => Ok(()),
        }
    }
}

/// Runs the child for its side effects and admits regardless of its verdict.
#[derive(Debug)]
pub struct Suppress {
    child: Box<dyn Throttler>,
}

impl Suppress {
    pub fn new(child: Box<dyn Throttler>) -> Self {
        Self { child }
    }
}

#[async_trait]
impl Throttler for Suppress {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        let _ = self.child.acquire(ctx).await;
        Ok(())
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        let _ = self.child.release(ctx).await;
        Ok(())
    }
}

/// Bounded retry chain around a child.
///
/// A failing call is repeated up to `attempts` more times with a fixed
/// backoff between tries; the last error surfaces. The backoff sleep
/// honors the context's cancellation token.
#[derive(Debug)]
pub struct Retry {
    child: Box<dyn Throttler>,
    attempts: u64,
    backoff: Duration,
}

impl Retry {
    pub fn new(child: Box<dyn Throttler>, attempts: u64) -> Self {
        Self {
            child,
            attempts,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn pause(&self, ctx: &Context) -> Result<(), Error> {
        tokio::select! {
            _ = time::sleep(self.backoff) => Ok(()),
            _ = ctx.cancelled() => Err(Error::Cancelled),
        }
    }
}

#[async_trait]
impl Throttler for Retry {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        let mut verdict = self.child.acquire(ctx).await;
        for _ in 0..self.attempts {
            if verdict.is_ok() {
                break;
            }
            self.pause(ctx).await?;
            verdict = self.child.acquire(ctx).await;
        }
        verdict
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        let mut verdict = self.child.release(ctx).await;
        for _ in 0..self.attempts {
            if verdict.is_ok() {
                break;
            }
            self.pause(ctx).await?;
            verdict = self.child.release(ctx).await;
        }
        verdict
    }
}

/// Memoizes the child's acquire verdict for a fixed period.
///
/// Within the period the cached verdict is repeated without consulting the
/// child; release invalidates the cache (and admits), so a completed call
/// always makes the next acquire consult the child again.
#[derive(Debug)]
pub struct Cache {
    child: Box<dyn Throttler>,
    ttl: Duration,
    cached: Mutex<Option<(Instant, Result<(), Error>)>>,
}

impl Cache {
    pub fn new(child: Box<dyn Throttler>, ttl: Duration) -> Self {
        Self {
            child,
            ttl,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Throttler for Cache {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        {
            let cached = self.cached.lock().expect("cache lock poisoned");
            if let Some((at, verdict)) = cached.as_ref() {
                if at.elapsed() < self.ttl {
                    return verdict.clone();
                }
            }
        }
        let verdict = self.child.acquire(ctx).await;
        *self.cached.lock().expect("cache lock poisoned") = Some((Instant::now(), verdict.clone()));
        verdict
    }

    async fn release(&self, _ctx: &Context) -> Result<(), Error> {
        self.cached.lock().expect("cache lock poisoned").take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use crate::basic::{Echo, Wait};
    use crate::counter::After;
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn err() -> Error {
        Error::MetricTripped
    }

    #[tokio::test]
    async fn all_admits_on_the_first_passing_child() {
        let ctx = Context::new();

        assert_eq!(All::new(Vec::new()).acquire(&ctx).await, Ok(()));

        let some = All::new(vec![
            Box::new(Echo::fail(err())),
            Box::new(Echo::pass()),
            Box::new(Echo::fail(err())),
        ]);
        assert_eq!(some.acquire(&ctx).await, Ok(()));
        assert_eq!(some.release(&ctx).await, Ok(()));

        let none = All::new(vec![
            Box::new(Echo::fail(err())),
            Box::new(Echo::fail(Error::MissingKey)),
        ]);
        assert_eq!(
            none.acquire(&ctx).await,
            Err(Error::Composite(Aggregate(vec![err(), Error::MissingKey])))
        );
    }

    #[tokio::test]
    async fn all_short_circuits_the_scan() {
        #[derive(Debug, Default)]
        struct Counting {
            calls: AtomicU64,
        }

        #[async_trait]
        impl Throttler for Counting {
            async fn acquire(&self, _ctx: &Context) -> Result<(), Error> {
                self.calls.fetch_add(1, Ordering::AcqRel);
                Ok(())
            }

            async fn release(&self, _ctx: &Context) -> Result<(), Error> {
                Ok(())
            }
        }

        let tail = Arc::new(Counting::default());
        let thr = All::new(vec![Box::new(Echo::pass()), Box::new(Arc::clone(&tail))]);
        thr.acquire(&Context::new()).await.expect("acquire");
        assert_eq!(tail.calls.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn any_fails_when_any_child_fails() {
        let ctx = Context::new();

        assert_eq!(Any::new(Vec::new()).acquire(&ctx).await, Ok(()));

        let clean = Any::new(vec![Box::new(Echo::pass()), Box::new(Echo::pass())]);
        assert_eq!(clean.acquire(&ctx).await, Ok(()));

        let some = Any::new(vec![
            Box::new(Echo::fail(err())),
            Box::new(Echo::pass()),
            Box::new(Echo::fail(err())),
        ]);
        assert_eq!(
            some.acquire(&ctx).await,
            Err(Error::Composite(Aggregate(vec![err(), err()])))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn any_runs_children_concurrently() {
        let thr = Any::new(vec![
            Box::new(Wait::new(ms(5))),
            Box::new(Wait::new(ms(5))),
            Box::new(Wait::new(ms(5))),
        ]);
        let started = Instant::now();
        thr.acquire(&Context::new()).await.expect("acquire");
        let elapsed = started.elapsed();
        assert!(elapsed >= ms(5) && elapsed < ms(15), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn not_inverts_the_verdict() {
        let ctx = Context::new();

        let inverted = Not::new(Box::new(Echo::fail(err())));
        assert_eq!(inverted.acquire(&ctx).await, Ok(()));

        let blocked = Not::new(Box::new(Echo::pass()));
        assert_eq!(blocked.acquire(&ctx).await, Err(Error::Inverted));
        assert_eq!(blocked.release(&ctx).await, Err(Error::Inverted));
    }

    #[tokio::test]
    async fn double_negation_restores_the_verdict() {
        let ctx = Context::new();

        let pass = Not::new(Box::new(Not::new(Box::new(Echo::pass()))));
        assert_eq!(pass.acquire(&ctx).await, Ok(()));

        let fail = Not::new(Box::new(Not::new(Box::new(Echo::fail(err())))));
        assert!(fail.acquire(&ctx).await.is_err());
    }

    #[tokio::test]
    async fn revert_flips_but_still_runs_the_child() {
        let ctx = Context::new();
        let counter = Arc::new(After::new(10));
        let thr = Revert::new(Box::new(Arc::clone(&counter)));

        // the child fails (and counts) so the reverted verdict admits
        assert_eq!(thr.acquire(&ctx).await, Ok(()));
        assert_eq!(thr.acquire(&ctx).await, Ok(()));
        assert_eq!(
            counter.acquire(&ctx).await,
            Err(Error::NotReached { count: 3 })
        );
    }

    #[tokio::test]
    async fn suppress_masks_the_child_verdict() {
        let ctx = Context::new();
        let thr = Suppress::new(Box::new(Echo::fail(err())));
        assert_eq!(thr.acquire(&ctx).await, Ok(()));
        assert_eq!(thr.release(&ctx).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_keeps_trying_until_the_child_passes() {
        let thr = Retry::new(Box::new(After::new(3)), 2).with_backoff(ms(1));
        let ctx = Context::new();

        // attempts 1..=3 walk the child over its threshold
        assert_eq!(thr.acquire(&ctx).await, Ok(()));
        assert_eq!(thr.acquire(&ctx).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_surfaces_the_last_error() {
        let thr = Retry::new(Box::new(Echo::fail(err())), 2).with_backoff(ms(1));
        let started = Instant::now();
        assert_eq!(thr.acquire(&Context::new()).await, Err(err()));
        assert!(started.elapsed() >= ms(2));
    }

    #[tokio::test]
    async fn retry_backoff_honors_cancellation() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = Context::new().with_cancellation(token);
        let thr = Retry::new(Box::new(Echo::fail(err())), 3).with_backoff(Duration::from_secs(3600));
        assert_eq!(thr.acquire(&ctx).await, Err(Error::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_repeats_the_verdict_within_the_ttl() {
        // After(2) fails once then passes; the cached failure must repeat
        // without consulting the child
        let thr = Cache::new(Box::new(After::new(2)), ms(30));
        let ctx = Context::new();

        assert_eq!(thr.acquire(&ctx).await, Err(Error::NotReached { count: 1 }));
        assert_eq!(thr.acquire(&ctx).await, Err(Error::NotReached { count: 1 }));
        assert_eq!(thr.acquire(&ctx).await, Err(Error::NotReached { count: 1 }));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_expires_after_the_ttl() {
        let thr = Cache::new(Box::new(After::new(2)), ms(1));
        let ctx = Context::new();

        assert_eq!(thr.acquire(&ctx).await, Err(Error::NotReached { count: 1 }));
        time::sleep(ms(2)).await;
        assert_eq!(thr.acquire(&ctx).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn cache_release_invalidates_the_verdict() {
        let thr = Cache::new(Box::new(After::new(2)), ms(30));
        let ctx = Context::new();

        assert_eq!(thr.acquire(&ctx).await, Err(Error::NotReached { count: 1 }));
        assert_eq!(thr.release(&ctx).await, Ok(()));
        assert_eq!(thr.acquire(&ctx).await, Ok(()));
    }
}
