use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::trace;

use crate::context::Context;
use crate::counter::Fixed;
use crate::error::Error;
use crate::support;
use crate::Throttler;

/// Coarse sliding-window admission ceiling over a [`Fixed`] counter.
///
/// A background task decays the accepted count: with `slide` sub-steps the
/// decay runs every `window / slide` subtracting `ceil(max / slide)`, with
/// `slide == 0` (or a slide that is no finer than the window itself) it runs
/// once per window subtracting the full `max`. Up to `max` acquires succeed
/// per window; the counter never decays below zero.
///
/// Must be constructed inside a Tokio runtime. The decay task stops when the
/// throttler is dropped.
#[derive(Debug)]
pub struct Timed {
    ceiling: Arc<Fixed>,
    decay: JoinHandle<()>,
}

impl Timed {
    pub fn new(max: u64, window: Duration, slide: u64) -> Self {
        let ceiling = Arc::new(Fixed::new(max));
        let (delta, period) = Self::steps(max, window, slide);
        let counter = Arc::clone(&ceiling);
        let decay = support::every(period, move || {
            let left = counter.decay(delta);
            trace!(delta, left, "window decay tick");
        });
        Self { ceiling, decay }
    }

    fn steps(max: u64, window: Duration, slide: u64) -> (u64, Duration) {
        let nanos = window.as_nanos() as u64;
        if slide > 0 && slide < nanos {
            (max.div_ceil(slide), Duration::from_nanos(nanos / slide))
        } else {
            (max, window)
        }
    }
}

impl Drop for Timed {
    fn drop(&mut self) {
        self.decay.abort();
    }
}

#[async_trait]
impl Throttler for Timed {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        self.ceiling.acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        self.ceiling.release(ctx).await
    }
}

/// AIMD feedback loop over [`Timed`].
///
/// Each acquire first consults the probe throttler: a probe failure
/// subtracts `step * step` from the window's ceiling (clamped at zero), a
/// probe pass adds `step`. The call then runs against the reshaped window,
/// so a struggling downstream keeps shrinking admission quickly while a
/// healthy one grows it back one step at a time.
#[derive(Debug)]
pub struct Adaptive {
    window: Timed,
    step: u64,
    probe: Box<dyn Throttler>,
}

impl Adaptive {
    pub fn new(
        max: u64,
        window: Duration,
        slide: u64,
        step: u64,
        probe: Box<dyn Throttler>,
    ) -> Self {
        Self {
            window: Timed::new(max, window, slide),
            step,
            probe,
        }
    }
}

#[async_trait]
impl Throttler for Adaptive {
    async fn acquire(&self, ctx: &Context) -> Result<(), Error> {
        match self.probe.acquire(ctx).await {
            Ok(()) => self.window.ceiling.raise(self.step),
            Err(_) => self.window.ceiling.lower(self.step * self.step),
        }
        self.window.acquire(ctx).await
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        self.window.release(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use tokio::time::sleep;

    use crate::basic::Echo;

    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn steps_split_the_window_by_slide() {
        assert_eq!(Timed::steps(10, ms(8), 4), (3, ms(2)));
        assert_eq!(Timed::steps(2, ms(2), 0), (2, ms(2)));
        // a slide coarser than the window falls back to whole-window decay
        let nanos = ms(2).as_nanos() as u64;
        assert_eq!(Timed::steps(2, ms(2), nanos), (2, ms(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_recovers_after_the_window_decays() {
        let thr = Timed::new(2, ms(2), 0);
        let ctx = Context::new();

        let mut verdicts = Vec::new();
        for _ in 0..4 {
            let verdict = thr.acquire(&ctx).await;
            if verdict.is_ok() {
                thr.release(&ctx).await.expect("release");
            }
            verdicts.push(verdict);
        }
        sleep(ms(3)).await;
        for _ in 0..2 {
            let verdict = thr.acquire(&ctx).await;
            if verdict.is_ok() {
                thr.release(&ctx).await.expect("release");
            }
            verdicts.push(verdict);
        }

        assert_eq!(
            verdicts,
            vec![
                Ok(()),
                Ok(()),
                Err(Error::Exceeded { count: 3 }),
                Err(Error::Exceeded { count: 3 }),
                Ok(()),
                Ok(()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn timed_slide_smooths_the_boundary() {
        // decay every 4ms by ceil(2 / 2) = 1
        let thr = Timed::new(2, ms(8), 2);
        let ctx = Context::new();

        assert_eq!(thr.acquire(&ctx).await, Ok(()));
        assert_eq!(thr.acquire(&ctx).await, Ok(()));
        assert_eq!(thr.acquire(&ctx).await, Err(Error::Exceeded { count: 3 }));

        sleep(ms(5)).await;
        assert_eq!(thr.acquire(&ctx).await, Ok(()));
        assert_eq!(thr.acquire(&ctx).await, Err(Error::Exceeded { count: 3 }));

        sleep(ms(10)).await;
        assert_eq!(thr.acquire(&ctx).await, Ok(()));
        assert_eq!(thr.acquire(&ctx).await, Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn adaptive_shrinks_on_probe_failures() {
        let probe = Box::new(Echo::fail(Error::MetricTripped));
        let thr = Adaptive::new(7, ms(20), 0, 2, probe);
        let ctx = Context::new();

        // ceiling: 7 -> 3 -> 0 -> 0
        assert_eq!(thr.acquire(&ctx).await, Ok(()));
        assert_eq!(thr.acquire(&ctx).await, Err(Error::Exceeded { count: 2 }));
        assert_eq!(thr.acquire(&ctx).await, Err(Error::Exceeded { count: 2 }));
    }

    #[tokio::test(start_paused = true)]
    async fn adaptive_grows_on_probe_passes() {
        let thr = Adaptive::new(0, ms(20), 0, 1, Box::new(Echo::pass()));
        let ctx = Context::new();

        for _ in 0..3 {
            assert_eq!(thr.acquire(&ctx).await, Ok(()));
            thr.release(&ctx).await.expect("release");
        }
    }
}
