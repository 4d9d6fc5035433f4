//! Frame-rate helpers for timed sources and rate-limited renderers.

use std::time::{Duration, Instant};

/// Fraction of the minimum interval an early frame may undercut.
pub const DEFAULT_EARLY_SLACK: f64 = 0.03;

pub fn interval_for_fps(fps: f32) -> Option<Duration> {
    if fps.is_finite() && fps > 0.0 {
        Some(Duration::from_secs_f32(1.0 / fps))
    } else {
        None
    }
}

/// Drops deliveries that arrive sooner than a minimum interval.
#[derive(Debug, Clone)]
pub struct FrameLimiter {
    min_interval: Option<Duration>,
    slack: f64,
    last_accepted: Option<Instant>,
}

impl Default for FrameLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl FrameLimiter {
    pub fn unlimited() -> Self {
        Self {
            min_interval: None,
            slack: DEFAULT_EARLY_SLACK,
            last_accepted: None,
        }
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self {
            min_interval: Some(min_interval),
            ..Self::unlimited()
        }
    }

    pub fn with_max_fps(fps: f32) -> Self {
        Self {
            min_interval: interval_for_fps(fps),
            ..Self::unlimited()
        }
    }

    /// Overrides the early-arrival tolerance (clamped to `0.0..=0.5`).
    pub fn slack(mut self, slack: f64) -> Self {
        self.slack = slack.clamp(0.0, 0.5);
        self
    }

    pub fn min_interval(&self) -> Option<Duration> {
        self.min_interval
    }

    pub fn set_min_interval(&mut self, min_interval: Option<Duration>) {
        self.min_interval = min_interval;
        self.last_accepted = None;
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
    }

    /// Returns whether a delivery at `now` should be presented.
    pub fn admit(&mut self, now: Instant) -> bool {
        let (Some(interval), Some(last)) = (self.min_interval, self.last_accepted) else {
            self.last_accepted = Some(now);
            return true;
        };
        let threshold = interval.mul_f64(1.0 - self.slack);
        if now.saturating_duration_since(last) < threshold {
            return false;
        }
        self.last_accepted = Some(now);
        true
    }
}

/// Fixed-rate tick schedule that does not drift with task latency.
#[derive(Debug, Clone)]
pub struct Cadence {
    period: Duration,
    next_due: Option<Instant>,
}

impl Cadence {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            next_due: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Delay until the next tick, advancing past ticks that were missed.
    pub fn next_delay(&mut self, now: Instant) -> Duration {
        let mut due = self.next_due.unwrap_or(now) + self.period;
        while due <= now {
            due += self.period;
        }
        self.next_due = Some(due);
        due - now
    }

    pub fn reset(&mut self) {
        self.next_due = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limiter_tolerates_slightly_early_frames() {
        let mut limiter = FrameLimiter::with_interval(Duration::from_millis(100));
        let start = Instant::now();
        assert!(limiter.admit(start));
        assert!(!limiter.admit(start + Duration::from_millis(50)));
        assert!(limiter.admit(start + Duration::from_millis(98)));
        assert!(!limiter.admit(start + Duration::from_millis(150)));
        assert!(limiter.admit(start + Duration::from_millis(200)));
    }

    #[test]
    fn zero_slack_is_strict() {
        let mut limiter = FrameLimiter::with_interval(Duration::from_millis(100)).slack(0.0);
        let start = Instant::now();
        assert!(limiter.admit(start));
        assert!(!limiter.admit(start + Duration::from_millis(99)));
    }

    #[test]
    fn unlimited_admits_everything() {
        let mut limiter = FrameLimiter::with_max_fps(0.0);
        let now = Instant::now();
        assert!(limiter.admit(now));
        assert!(limiter.admit(now));
    }

    #[test]
    fn cadence_skips_missed_ticks() {
        let mut cadence = Cadence::new(Duration::from_millis(10));
        let start = Instant::now();
        assert_eq!(cadence.next_delay(start), Duration::from_millis(10));
        let late = start + Duration::from_millis(35);
        assert_eq!(cadence.next_delay(late), Duration::from_millis(5));
    }
}
