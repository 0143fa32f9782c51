use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::{Duration, Instant};

use crate::context::Context;
use crate::error::Error;
use crate::support;
use crate::Throttler;

/// Min-heap of latency samples backed by a plain vector.
///
/// `at` reads straight from the heap array, so it is only an approximate
/// order statistic, and it is valid only under the owning throttler's lock.
#[derive(Debug, Default)]
struct LatencyHeap {
    samples: Vec<u64>,
}

impl LatencyHeap {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn push(&mut self, sample: u64) {
        self.samples.push(sample);
        let mut child = self.samples.len() - 1;
        while child > 0 {
            let parent = (child - 1) / 2;
            if self.samples[parent] <= self.samples[child] {
                break;
            }
            self.samples.swap(parent, child);
            child = parent;
        }
    }

    /// Sample at heap-array position `pos`, clamped into bounds; an empty
    /// heap reads as zero latency.
    fn at(&self, pos: usize) -> u64 {
        match self.samples.last() {
            None => 0,
            Some(_) => self.samples[pos.min(self.samples.len() - 1)],
        }
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

#[derive(Debug, Default)]
struct LatencyState {
    observed: AtomicU64,
    reset_pending: AtomicBool,
}

/// Gates on the worst recently observed call latency.
///
/// Release measures `now - ctx.timestamp` and keeps the maximum, but only
/// while the stored sample is still below the limit; once the gate trips,
/// no further samples are taken until the scheduled reset clears it after
/// the retention period.
#[derive(Debug)]
pub struct Latency {
    state: Arc<LatencyState>,
    max: u64,
    retention: Duration,
}

impl Latency {
    pub fn new(max: Duration, retention: Duration) -> Self {
        Self {
            state: Arc::default(),
            max: max.as_nanos() as u64,
            retention,
        }
    }
}

#[async_trait]
impl Throttler for Latency {
    async fn acquire(&self, _ctx: &Context) -> Result<(), Error> {
        let observed = self.state.observed.load(Ordering::Acquire);
        if observed > self.max {
            return Err(Error::LatencyExceeded {
                observed: Duration::from_nanos(observed),
            });
        }
        Ok(())
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        if self.state.observed.load(Ordering::Acquire) < self.max {
            let sample = Instant::now()
                .saturating_duration_since(ctx.started())
                .as_nanos() as u64;
            self.state.observed.fetch_max(sample, Ordering::AcqRel);
            if !self.state.reset_pending.swap(true, Ordering::AcqRel) {
                let state = Arc::clone(&self.state);
                support::defer(self.retention, move || {
                    state.observed.store(0, Ordering::Release);
                    state.reset_pending.store(false, Ordering::Release);
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct PercentileState {
    heap: Mutex<LatencyHeap>,
    reset_pending: AtomicBool,
}

/// Gates on a latency percentile over the samples observed since the last
/// reset.
///
/// Every release pushes one sample. Acquire reads the sample at heap index
/// `floor(len * percentile)`; when it sits above the limit the call fails
/// and a one-shot heap reset is scheduled after the retention period
/// (concurrent schedules collapse into one).
#[derive(Debug)]
pub struct Percentile {
    state: Arc<PercentileState>,
    max: u64,
    percentile: f64,
    retention: Duration,
}

impl Percentile {
    pub fn new(max: Duration, percentile: f64, retention: Duration) -> Self {
        Self {
            state: Arc::default(),
            max: max.as_nanos() as u64,
            percentile: percentile.abs().min(1.0),
            retention,
        }
    }
}

#[async_trait]
impl Throttler for Percentile {
    async fn acquire(&self, _ctx: &Context) -> Result<(), Error> {
        let observed = {
            let heap = self.state.heap.lock().expect("latency heap lock poisoned");
            let pos = (heap.len() as f64 * self.percentile) as usize;
            heap.at(pos)
        };
        if observed > self.max {
            if !self.state.reset_pending.swap(true, Ordering::AcqRel) {
                let state = Arc::clone(&self.state);
                support::defer(self.retention, move || {
                    state
                        .heap
                        .lock()
                        .expect("latency heap lock poisoned")
                        .clear();
                    state.reset_pending.store(false, Ordering::Release);
                });
            }
            return Err(Error::LatencyExceeded {
                observed: Duration::from_nanos(observed),
            });
        }
        Ok(())
    }

    async fn release(&self, ctx: &Context) -> Result<(), Error> {
        let sample = Instant::now()
            .saturating_duration_since(ctx.started())
            .as_nanos() as u64;
        self.state
            .heap
            .lock()
            .expect("latency heap lock poisoned")
            .push(sample);
        Ok(())
    }
}
