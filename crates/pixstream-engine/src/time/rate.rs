use std::time::{Duration, Instant};

/// Throughput over one reporting interval.
#[derive(Debug, Copy, Clone)]
pub struct RateSample {
    /// Frames counted in the interval.
    pub frames: u64,

    /// Length of the interval.
    pub elapsed: Duration,

    /// Total frames since the meter was created or reset.
    pub total: u64,
}

impl RateSample {
    /// Average frames per second over the interval.
    pub fn per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.frames as f64 / secs } else { 0.0 }
    }
}

/// Frame counter reporting an average rate once per interval.
///
/// Intervals shorter than `interval` are never reported, so the rate stays
/// readable when a loop runs at thousands of frames per second.
#[derive(Debug, Clone)]
pub struct RateMeter {
    started: Instant,
    frames: u64,
    total: u64,
    interval: Duration,
}

impl RateMeter {
    /// Creates a meter reporting once per second.
    pub fn new() -> Self {
        Self::with_interval(Duration::from_secs(1))
    }

    pub fn with_interval(interval: Duration) -> Self {
        debug_assert!(!interval.is_zero());
        Self {
            started: Instant::now(),
            frames: 0,
            total: 0,
            interval,
        }
    }

    /// Restarts the current interval and the total.
    pub fn reset(&mut self) {
        self.started = Instant::now();
        self.frames = 0;
        self.total = 0;
    }

    /// Counts one frame; returns a sample when the interval has elapsed.
    pub fn tick(&mut self) -> Option<RateSample> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<RateSample> {
        self.frames += 1;
        self.total = self.total.wrapping_add(1);

        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.interval {
            return None;
        }

        let sample = RateSample {
            frames: self.frames,
            elapsed,
            total: self.total,
        };
        self.started = now;
        self.frames = 0;
        Some(sample)
    }
}

impl Default for RateMeter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_once_per_interval() {
        let mut meter = RateMeter::with_interval(Duration::from_millis(100));
        let start = meter.started;

        for i in 1..10 {
            assert!(meter.tick_at(start + Duration::from_millis(i * 10)).is_none());
        }
        let sample = meter.tick_at(start + Duration::from_millis(100)).unwrap();
        assert_eq!(sample.frames, 10);
        assert_eq!(sample.total, 10);
        assert!((sample.per_second() - 100.0).abs() < 1e-9);

        assert!(meter.tick_at(start + Duration::from_millis(150)).is_none());
    }

    #[test]
    fn clock_going_backwards_is_ignored() {
        let mut meter = RateMeter::new();
        let earlier = meter.started.checked_sub(Duration::from_millis(5)).unwrap_or(meter.started);
        assert!(meter.tick_at(earlier).is_none());
    }
}
