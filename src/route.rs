use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use tracing::debug;

use crate::context::Context;
use crate::error::Error;
use crate::Throttler;

/// A regular expression guarding a child throttler.
#[derive(Debug)]
pub struct PatternEntry {
    pattern: Regex,
    throttler: Box<dyn Throttler>,
}

impl PatternEntry {
    pub fn new(pattern: Regex, throttler: Box<dyn Throttler>) -> Self {
        Self { pattern, throttler }
    }
}

/// Routes to the first child whose pattern matches the context key.
///
/// Entries are scanned in order; a missing key and an unmatched key both
/// fail with [`Error::MissingKey`].
#[derive(Debug, Default)]
pub struct Pattern {
    entries: Vec<PatternEntry>,
}

impl Pattern {
    pub fn new(entries: Vec<PatternEntry>) -> Self {
        Self { entries }
    }

    fn route(&self, ctx: &Context) -> Result<&PatternEntry, Error> {
        let key = ctx.key().ok_or(Error::MissingKey)?;
        self.entries
            .iter()
            .find(|entry| entry.pattern.is_match(key))
            .ok_or(Error::MissingKey)
    }
}

#[async_trait]
impl Throttler for Pattern {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        self.route(ctx)?.throttler.acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        self.route(ctx)?.throttler.release(ctx).await
    }
}

/// Round-robin dispatch across children.
///
/// Acquire and release advance independent cursors, so a strictly paired
/// caller releases on the same child it acquired from.
#[derive(Debug, Default)]
pub struct Ring {
    children: Vec<Box<dyn Throttler>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl Ring {
    pub fn new(children: Vec<Box<dyn Throttler>>) -> Self {
        Self {
            children,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    fn next(&self, cursor: &AtomicUsize) -> Result<&dyn Throttler, Error> {
        if self.children.is_empty() {
            return Err(Error::EmptyRing);
        }
        let pos = cursor.fetch_add(1, Ordering::AcqRel) % self.children.len();
        Ok(self.children[pos].as_ref())
    }
}

#[async_trait]
impl Throttler for Ring {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        self.next(&self.acquired)?.acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        self.next(&self.released)?.release(ctx).await
    }
}

/// Lazily grown per-key store of child throttlers.
///
/// Every distinct context key gets its own child from the factory; entries
/// are never evicted. A missing key fails with [`Error::MissingKey`], and
/// releasing a key that never acquired is [`Error::NothingToRelease`].
pub struct Keyed {
    store: DashMap<String, Arc<dyn Throttler>>,
    factory: Box<dyn Fn() -> Arc<dyn Throttler> + Send + Sync>,
}

impl Keyed {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Throttler> + Send + Sync + 'static,
    {
        Self {
            store: DashMap::new(),
            factory: Box::new(factory),
        }
    }
}

impl fmt::Debug for Keyed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyed")
            .field("known_keys", &self.store.len())
            .finish()
    }
}

#[async_trait]
impl Throttler for Keyed {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        let key = ctx.key().ok_or(Error::MissingKey)?;
        // clone the child out so no map guard is held across the await
        let child = {
            let entry = self.store.entry(key.to_owned()).or_insert_with(|| {
                debug!(key, "creating keyed throttler");
                (self.factory)()
            });
            Arc::clone(entry.value())
        };
        child.acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        let key = ctx.key().ok_or(Error::MissingKey)?;
        let child = self
            .store
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(Error::NothingToRelease)?;
        child.release(ctx).await
    }
}
