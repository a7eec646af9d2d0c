//! Pacing, timeouts and single-flight serialization of syncs.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::debug;

/// Source of time and sleeping, injectable for tests.
pub trait Clock: Send + Sync {
    /// Monotonic now.
    fn now(&self) -> Instant;

    /// Wall-clock now.
    fn utc_now(&self) -> DateTime<Utc>;

    /// Blocks the current thread.
    fn sleep(&self, duration: Duration);
}

/// The real clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// A clock that only moves when slept on or advanced. Records every sleep.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    base_utc: DateTime<Utc>,
    offset: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    /// Creates a clock frozen at the current time.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            base_utc: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Moves time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock() += duration;
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    /// Total time slept.
    pub fn total_slept(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.offset.lock()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        let offset = *self.offset.lock();
        self.base_utc + chrono::Duration::from_std(offset).unwrap_or(chrono::Duration::zero())
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        self.advance(duration);
    }
}

/// Request timeout for a page carrying `outbound` records.
pub fn request_timeout(outbound: usize) -> Duration {
    let secs = match outbound {
        0..=9 => 30,
        10..=99 => 60,
        100..=999 => 120,
        _ => 240,
    };
    Duration::from_secs(secs)
}

/// Serializes syncs and spaces their starts by a minimum interval.
///
/// Holding a [`SyncPermit`] excludes every other caller. A caller arriving
/// sooner than the interval after the previous start is made to wait.
#[derive(Debug)]
pub struct SyncGate {
    min_interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

/// Proof of exclusive access to the sync entry point.
#[derive(Debug)]
pub struct SyncPermit<'a> {
    _guard: MutexGuard<'a, Option<Instant>>,
}

impl SyncGate {
    /// Creates a gate.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_start: Mutex::new(None),
        }
    }

    /// Blocks until no other sync runs and the interval has passed.
    pub fn enter<'a>(&'a self, clock: &dyn Clock) -> SyncPermit<'a> {
        let mut last_start = self.last_start.lock();
        if let Some(last) = *last_start {
            let elapsed = clock.now().saturating_duration_since(last);
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(?wait, "pacing sync start");
                clock.sleep(wait);
            }
        }
        *last_start = Some(clock.now());
        SyncPermit {
            _guard: last_start,
        }
    }

    /// Start time of the most recent sync. Blocks while a sync runs.
    pub fn last_start(&self) -> Option<Instant> {
        *self.last_start.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn timeout_scaling() {
        assert_eq!(request_timeout(0), Duration::from_secs(30));
        assert_eq!(request_timeout(5), Duration::from_secs(30));
        assert_eq!(request_timeout(50), Duration::from_secs(60));
        assert_eq!(request_timeout(500), Duration::from_secs(120));
        assert_eq!(request_timeout(2000), Duration::from_secs(240));
        assert_eq!(request_timeout(10_000), Duration::from_secs(240));
    }

    #[test]
    fn manual_clock_records_sleeps() {
        let clock = ManualClock::new();
        let start = clock.now();
        let start_utc = clock.utc_now();
        clock.sleep(Duration::from_millis(30));
        clock.advance(Duration::from_millis(20));
        assert_eq!(clock.now() - start, Duration::from_millis(50));
        assert_eq!((clock.utc_now() - start_utc).num_milliseconds(), 50);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(30)]);
    }

    #[test]
    fn first_sync_never_waits() {
        let clock = ManualClock::new();
        let gate = SyncGate::new(Duration::from_secs(1));
        drop(gate.enter(&clock));
        assert!(clock.sleeps().is_empty());
        assert_eq!(gate.last_start(), Some(clock.now()));
    }

    #[test]
    fn back_to_back_syncs_are_spaced() {
        let clock = ManualClock::new();
        let gate = SyncGate::new(Duration::from_millis(500));

        drop(gate.enter(&clock));
        clock.advance(Duration::from_millis(200));
        drop(gate.enter(&clock));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(300)]);

        clock.advance(Duration::from_secs(2));
        drop(gate.enter(&clock));
        assert_eq!(clock.sleeps().len(), 1);
    }

    #[test]
    fn concurrent_callers_are_serialized() {
        let gate = Arc::new(SyncGate::new(Duration::ZERO));
        let active = Arc::new(Mutex::new(0u32));
        let max_seen = Arc::new(Mutex::new(0u32));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let active = Arc::clone(&active);
                let max_seen = Arc::clone(&max_seen);
                std::thread::spawn(move || {
                    let _permit = gate.enter(&SystemClock);
                    let now = {
                        let mut a = active.lock();
                        *a += 1;
                        *a
                    };
                    {
                        let mut m = max_seen.lock();
                        *m = (*m).max(now);
                    }
                    std::thread::sleep(Duration::from_millis(5));
                    *active.lock() -= 1;
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*max_seen.lock(), 1);
    }
}
