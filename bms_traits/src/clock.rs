use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Clock abstraction for control and timing across the stack.
///
/// - now(): returns a monotonic Instant
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - ms_since(): helper to compute elapsed milliseconds from an epoch Instant
/// - unix_ms(): wall-clock milliseconds, used for deadlines that must survive restarts
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);
    fn unix_ms(&self) -> u64;

    /// Milliseconds elapsed since `epoch`, saturating at 0 on underflow.
    fn ms_since(&self, epoch: Instant) -> u64 {
        let dur = self.now().saturating_duration_since(epoch);
        dur.as_millis().min(u128::from(u64::MAX)) as u64
    }
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }
    fn sleep(&self, d: Duration) {
        (**self).sleep(d)
    }
    fn unix_ms(&self) -> u64 {
        (**self).unix_ms()
    }
}

/// Default, real-time clock backed by std::time.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }

    fn unix_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
            .unwrap_or(0)
    }
}

/// Deterministic clock whose time is advanced manually.
///
/// now() = origin + offset, unix_ms() = wall_origin_ms + offset.
/// sleep(d) advances internal time by d without actually sleeping.
/// Clones share the same time source.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    wall_origin_ms: u64,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::with_wall_ms(1_700_000_000_000)
    }

    /// Start the wall clock at a fixed UNIX timestamp (ms).
    pub fn with_wall_ms(wall_origin_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            wall_origin_ms,
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }

    /// Advance the clock by `ms` milliseconds.
    pub fn advance_ms(&self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    fn offset(&self) -> Duration {
        self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset()
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }

    fn unix_ms(&self) -> u64 {
        let off = self.offset().as_millis().min(u128::from(u64::MAX)) as u64;
        self.wall_origin_ms.saturating_add(off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_both_timelines() {
        let clock = ManualClock::with_wall_ms(1_000);
        let epoch = clock.now();
        clock.advance_ms(250);
        assert_eq!(clock.ms_since(epoch), 250);
        assert_eq!(clock.unix_ms(), 1_250);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let a = ManualClock::new();
        let b = a.clone();
        let start = b.unix_ms();
        a.sleep(Duration::from_millis(40));
        assert_eq!(b.unix_ms() - start, 40);
    }

    #[test]
    fn ms_since_saturates_for_future_epoch() {
        let clock = ManualClock::new();
        let future = clock.now() + Duration::from_secs(5);
        assert_eq!(clock.ms_since(future), 0);
    }
}
