use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};

/// Spawns a periodic background task; the first tick fires one full period
/// after creation. Callers hold the handle and abort it on drop.
pub(crate) fn every<F>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    // interval panics on a zero period
    let period = period.max(Duration::from_nanos(1));
    tokio::spawn(async move {
        let mut timer = time::interval_at(Instant::now() + period, period);
        loop {
            timer.tick().await;
            tick();
        }
    })
}

/// Spawns a one-shot deferred action. Deduplication of concurrent schedules
/// is the caller's job, guarded by an `AtomicBool` next to the state the
/// action resets.
pub(crate) fn defer<F>(delay: Duration, action: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        time::sleep(delay).await;
        action();
    })
}

/// Atomic subtraction clamped at zero; returns the stored result.
pub(crate) fn decr_clamped(counter: &AtomicU64, delta: u64) -> u64 {
    let mut cur = counter.load(Ordering::Acquire);
    loop {
        let next = cur.saturating_sub(delta);
        match counter.compare_exchange_weak(cur, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return next,
            Err(observed) => cur = observed,
        }
    }
}
