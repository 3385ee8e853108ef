//! # Replica Interpolation
//!
//! Replicas never simulate. They render a little in the past, blending between
//! the two snapshots that bracket render time:
//!
//! ```text
//!   samples:   s0 ────── s1 ────── s2 ────── s3 (newest)
//!                              ^
//!                        render time = s3.ts + (now - s3.received) - delay
//! ```
//!
//! When render time passes the newest sample, the replica extrapolates along
//! the velocity hint for at most the extrapolation limit, then holds still.

use std::collections::VecDeque;

use wingmate_shared::{Transform, Vec3};

/// One received state sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    /// Owner clock at which the sample was taken.
    pub timestamp_ms: u64,
    /// Local clock at which the sample arrived.
    pub received_ms: u64,
    /// Sampled transform.
    pub transform: Transform,
    /// Velocity hint, units per second.
    pub velocity: Option<Vec3>,
}

/// Bounded, timestamp-ordered snapshot history for one replica.
#[derive(Clone, Debug)]
pub struct InterpolationBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
    delay_ms: u64,
    extrapolation_limit_ms: u64,
}

impl InterpolationBuffer {
    /// Creates an empty buffer. Capacity is raised to two if smaller.
    #[must_use]
    pub fn new(capacity: usize, delay_ms: u64, extrapolation_limit_ms: u64) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            delay_ms,
            extrapolation_limit_ms,
        }
    }

    /// Number of buffered samples.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if nothing has been received.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Maximum number of samples kept.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest sample by owner timestamp.
    #[must_use]
    pub fn newest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// Inserts a sample in timestamp order, evicting the oldest when full.
    ///
    /// A sample with the same timestamp as a buffered one replaces it.
    pub fn push(&mut self, sample: Sample) {
        let at = self.samples.partition_point(|s| s.timestamp_ms < sample.timestamp_ms);
        if self.samples.get(at).is_some_and(|s| s.timestamp_ms == sample.timestamp_ms) {
            self.samples[at] = sample;
            return;
        }
        self.samples.insert(at, sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
    }

    /// Drops all history. Sampling yields nothing until the next push.
    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Render time on the owner's clock for local time `now_ms`.
    #[must_use]
    pub fn render_time(&self, now_ms: u64) -> Option<u64> {
        let newest = self.newest()?;
        let elapsed = now_ms.saturating_sub(newest.received_ms);
        Some((newest.timestamp_ms + elapsed).saturating_sub(self.delay_ms))
    }

    /// Blended transform for local time `now_ms`.
    #[must_use]
    pub fn sample(&self, now_ms: u64) -> Option<Transform> {
        self.sample_at(self.render_time(now_ms)?)
    }

    /// Blended transform at an owner-clock render time.
    #[must_use]
    pub fn sample_at(&self, render_ms: u64) -> Option<Transform> {
        let oldest = self.samples.front()?;
        let newest = self.samples.back()?;

        if render_ms <= oldest.timestamp_ms {
            return Some(oldest.transform);
        }
        if render_ms >= newest.timestamp_ms {
            return Some(self.extrapolate(newest, render_ms - newest.timestamp_ms));
        }

        let after = self.samples.partition_point(|s| s.timestamp_ms <= render_ms);
        let a = &self.samples[after - 1];
        let b = &self.samples[after];
        let span = (b.timestamp_ms - a.timestamp_ms) as f32;
        let t = (render_ms - a.timestamp_ms) as f32 / span;
        Some(a.transform.lerp(b.transform, t))
    }

    fn extrapolate(&self, newest: &Sample, ahead_ms: u64) -> Transform {
        let Some(velocity) = newest.velocity else {
            return newest.transform;
        };
        let ahead_secs = ahead_ms.min(self.extrapolation_limit_ms) as f32 / 1000.0;
        newest.transform.translated(velocity * ahead_secs)
    }
}
