//! # Tick Pacing
//!
//! Fixed-rate pacing for callers that drive a [`Session`](super::Session)
//! from a thread of their own, and the millisecond clock sessions run on.
//!
//! Sessions never read the wall clock themselves; every tick takes the time
//! explicitly. [`SessionClock`] is the usual source of that time.

use std::time::{Duration, Instant};

/// Monotonic millisecond clock starting at zero.
#[derive(Clone, Copy, Debug)]
pub struct SessionClock {
    start: Instant,
}

impl SessionClock {
    /// Starts the clock.
    #[must_use]
    pub fn start() -> Self {
        Self { start: Instant::now() }
    }

    /// Milliseconds since [`SessionClock::start`].
    #[must_use]
    pub fn now_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::start()
    }
}

/// Tick timing statistics.
#[derive(Clone, Copy, Debug, Default)]
pub struct TickStats {
    /// Fastest tick observed.
    pub min_tick_us: u64,
    /// Slowest tick observed.
    pub max_tick_us: u64,
    /// Rolling average.
    pub avg_tick_us: u64,
    /// Ticks that overran their budget.
    pub late_ticks: u64,
    /// Ticks measured.
    pub total_ticks: u64,
}

/// Fixed-rate tick pacer.
#[derive(Debug)]
pub struct TickLoop {
    tick_duration: Duration,
    last_tick: Instant,
    tick_count: u64,
    stats: TickStats,
}

impl TickLoop {
    /// Creates a pacer for `tick_rate` ticks per second.
    #[must_use]
    pub fn new(tick_rate: u32) -> Self {
        let tick_duration = Duration::from_micros(1_000_000 / u64::from(tick_rate.max(1)));
        Self {
            tick_duration,
            last_tick: Instant::now(),
            tick_count: 0,
            stats: TickStats { min_tick_us: u64::MAX, ..TickStats::default() },
        }
    }

    /// Returns true once a full tick duration has passed since the last tick.
    #[must_use]
    pub fn should_tick(&self) -> bool {
        self.last_tick.elapsed() >= self.tick_duration
    }

    /// Marks the start of a tick. Pass the result to [`TickLoop::end_tick`].
    #[must_use]
    pub fn begin_tick(&mut self) -> Instant {
        let now = Instant::now();
        self.last_tick = now;
        self.tick_count += 1;
        now
    }

    /// Records how long the tick took.
    pub fn end_tick(&mut self, start: Instant) {
        let duration = start.elapsed();
        let duration_us = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);

        self.stats.total_ticks += 1;
        self.stats.min_tick_us = self.stats.min_tick_us.min(duration_us);
        self.stats.max_tick_us = self.stats.max_tick_us.max(duration_us);
        self.stats.avg_tick_us = if self.stats.total_ticks == 1 {
            duration_us
        } else {
            (self.stats.avg_tick_us * 15 + duration_us) / 16
        };
        if duration > self.tick_duration {
            self.stats.late_ticks += 1;
        }
    }

    /// Sleeps until the next tick is due.
    pub fn wait_for_next_tick(&self) {
        let elapsed = self.last_tick.elapsed();
        if elapsed < self.tick_duration {
            std::thread::sleep(self.tick_duration - elapsed);
        }
    }

    /// Ticks started so far.
    #[must_use]
    pub const fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Timing statistics.
    #[must_use]
    pub const fn stats(&self) -> &TickStats {
        &self.stats
    }

    /// Target tick duration.
    #[must_use]
    pub const fn tick_duration(&self) -> Duration {
        self.tick_duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_loop_creation() {
        let tick_loop = TickLoop::new(60);
        assert_eq!(tick_loop.tick_count(), 0);
        assert_eq!(tick_loop.tick_duration(), Duration::from_micros(16666));
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        assert_eq!(TickLoop::new(0).tick_duration(), Duration::from_secs(1));
    }

    #[test]
    fn test_wait_then_tick() {
        let mut tick_loop = TickLoop::new(1000);
        tick_loop.wait_for_next_tick();
        assert!(tick_loop.should_tick());

        let start = tick_loop.begin_tick();
        tick_loop.end_tick(start);
        assert_eq!(tick_loop.tick_count(), 1);
        assert_eq!(tick_loop.stats().total_ticks, 1);
        assert!(tick_loop.stats().min_tick_us <= tick_loop.stats().max_tick_us);
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = SessionClock::start();
        let a = clock.now_ms();
        std::thread::sleep(Duration::from_millis(2));
        assert!(clock.now_ms() >= a + 1);
    }
}
