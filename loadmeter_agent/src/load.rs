//! Synthetic CPU load: N busy threads, each pinned to its own deadline.
//!
//! Workers are plain OS threads so they occupy real execution units in parallel
//! with the async sampling loop. Each one polls its own clock and the shared
//! [`StopFlag`] between chunks of work; nothing signals them to stop on time.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, warn};

// ~0.1ms of work on a modern core, keeps the deadline check responsive
const BURN_CHUNK: u64 = 100_000;

/// Number of fully saturating workers for a utilization target. This is a coarse
/// proportional approximation, not an exact CPU percentage.
pub fn worker_count(execution_units: usize, utilization_percent: u8) -> usize {
    execution_units * usize::from(utilization_percent.min(100)) / 100
}

/// Cancellation signal shared by load workers and the sampling loop.
#[derive(Clone, Default, Debug)]
pub struct StopFlag {
    raised: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Resolves once [`raise`](Self::raise) has been called.
    pub async fn raised(&self) {
        loop {
            // register before checking so a raise in between is not missed
            let notified = self.notify.notified();
            if self.is_raised() {
                return;
            }
            notified.await;
        }
    }
}

type Spawn<'a> = dyn FnMut(usize, Box<dyn FnOnce() + Send>) -> io::Result<JoinHandle<()>> + 'a;

pub struct LoadGenerator;

impl LoadGenerator {
    /// Start `workers` busy threads for `duration`. Threads that fail to spawn are
    /// skipped; check [`LoadHandle::partial_start`].
    pub fn start(workers: usize, duration: Duration, stop: StopFlag) -> LoadHandle {
        let mut spawn = |i: usize, work: Box<dyn FnOnce() + Send>| {
            thread::Builder::new()
                .name(format!("loadmeter-burn-{i}"))
                .spawn(work)
        };
        Self::start_with(workers, duration, stop, &mut spawn)
    }

    fn start_with(
        workers: usize,
        duration: Duration,
        stop: StopFlag,
        spawn: &mut Spawn<'_>,
    ) -> LoadHandle {
        let started_at = Instant::now();
        // past the representable range the workers run until stopped
        let deadline = started_at.checked_add(duration);
        let live = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::with_capacity(workers);

        for i in 0..workers {
            let stop_w = stop.clone();
            let live_w = Arc::clone(&live);
            live.fetch_add(1, Ordering::SeqCst);
            let work: Box<dyn FnOnce() + Send> = Box::new(move || {
                let _live = LiveGuard(live_w);
                burn(deadline, &stop_w);
            });
            match spawn(i, work) {
                Ok(h) => handles.push(h),
                Err(e) => {
                    // the closure was dropped unrun, so its guard never existed
                    live.fetch_sub(1, Ordering::SeqCst);
                    warn!("failed to start load worker {i}: {e}");
                }
            }
        }

        if handles.len() < workers {
            warn!(
                requested = workers,
                started = handles.len(),
                "partial load start, achieved utilization will be lower"
            );
        } else {
            debug!(workers, ?duration, "load workers started");
        }

        LoadHandle {
            requested: workers,
            handles,
            live,
            stop,
            started_at,
        }
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn burn(deadline: Option<Instant>, stop: &StopFlag) {
    while deadline.map_or(true, |d| Instant::now() < d) && !stop.is_raised() {
        std::hint::black_box((0..BURN_CHUNK).fold(0u64, |acc, x| acc.wrapping_add(x)));
    }
}

/// The running worker set of one run.
pub struct LoadHandle {
    requested: usize,
    handles: Vec<JoinHandle<()>>,
    live: Arc<AtomicUsize>,
    stop: StopFlag,
    started_at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    pub requested: usize,
    pub started: usize,
    pub panicked: usize,
    pub elapsed: Duration,
}

impl LoadOutcome {
    pub fn partial_start(&self) -> bool {
        self.started < self.requested
    }
}

impl LoadHandle {
    pub fn requested(&self) -> usize {
        self.requested
    }

    pub fn started(&self) -> usize {
        self.handles.len()
    }

    pub fn partial_start(&self) -> bool {
        self.started() < self.requested
    }

    /// Workers that have not yet returned.
    pub fn running(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Ask every worker to stop before its deadline.
    pub fn stop(&self) {
        self.stop.raise();
    }

    /// Block until every started worker has returned.
    pub fn join(self) -> LoadOutcome {
        let started = self.handles.len();
        let mut panicked = 0;
        for h in self.handles {
            let name = h.thread().name().unwrap_or("loadmeter-burn").to_string();
            if h.join().is_err() {
                warn!("load worker {name} panicked");
                panicked += 1;
            }
        }
        let elapsed = self.started_at.elapsed();
        debug!(started, panicked, ?elapsed, "load workers joined");
        LoadOutcome {
            requested: self.requested,
            started,
            panicked,
            elapsed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_policy() {
        assert_eq!(worker_count(8, 0), 0);
        assert_eq!(worker_count(8, 100), 8);
        assert_eq!(worker_count(4, 50), 2);
        // floor, not round
        assert_eq!(worker_count(4, 74), 2);
        assert_eq!(worker_count(4, 75), 3);
        assert_eq!(worker_count(1, 99), 0);
        assert_eq!(worker_count(0, 100), 0);
    }

    #[test]
    fn zero_workers_is_a_noop() {
        let h = LoadGenerator::start(0, Duration::from_secs(5), StopFlag::new());
        assert_eq!(h.started(), 0);
        let out = h.join();
        assert_eq!(out.started, 0);
        assert!(!out.partial_start());
        assert!(out.elapsed < Duration::from_secs(1));
    }

    #[test]
    fn workers_run_until_deadline_then_exit() {
        let h = LoadGenerator::start(2, Duration::from_millis(300), StopFlag::new());
        assert_eq!(h.started(), 2);
        assert_eq!(h.running(), 2);
        let waited = Instant::now();
        while h.running() > 0 && waited.elapsed() < Duration::from_secs(3) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(h.running(), 0);
        let out = h.join();
        assert_eq!(out.started, 2);
        assert_eq!(out.panicked, 0);
        assert!(out.elapsed >= Duration::from_millis(300));
        assert!(out.elapsed < Duration::from_secs(3));
    }

    #[test]
    fn stop_flag_ends_workers_early() {
        let h = LoadGenerator::start(2, Duration::from_secs(60), StopFlag::new());
        thread::sleep(Duration::from_millis(50));
        h.stop();
        let out = h.join();
        assert!(out.elapsed < Duration::from_secs(5));
    }

    #[test]
    fn spawn_failures_degrade_to_partial_start() {
        let mut spawn = |i: usize, work: Box<dyn FnOnce() + Send>| {
            if i >= 2 {
                Err(io::Error::other("no threads left"))
            } else {
                thread::Builder::new().spawn(work)
            }
        };
        let h = LoadGenerator::start_with(4, Duration::from_millis(50), StopFlag::new(), &mut spawn);
        assert_eq!(h.requested(), 4);
        assert_eq!(h.started(), 2);
        assert!(h.partial_start());
        // the two failed spawns never count as running
        assert!(h.running() <= 2);
        let out = h.join();
        assert!(out.partial_start());
        assert_eq!(out.started, 2);
    }

    #[test]
    fn unrepresentable_deadline_runs_until_stopped() {
        let h = LoadGenerator::start(1, Duration::MAX, StopFlag::new());
        assert_eq!(h.started(), 1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(h.running(), 1);
        h.stop();
        let out = h.join();
        assert_eq!(out.panicked, 0);
        assert!(out.elapsed < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn raised_resolves_after_raise() {
        let stop = StopFlag::new();
        let waiter = {
            let stop = stop.clone();
            tokio::spawn(async move { stop.raised().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.raise();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("raised() resolved")
            .unwrap();
        // already raised: resolves immediately
        stop.raised().await;
    }
}
