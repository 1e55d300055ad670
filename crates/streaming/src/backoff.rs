use std::time::Duration;

pub const INITIAL_DELAY_MS: f64 = 1000.0;
pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Geometric reconnect backoff, bounded above.
///
/// Delay `k` (1-based) is `min(1000ms * 1.5^(k-1), cap)`. Growth is applied
/// to the previous delay, not derived from the attempt count. A zero
/// `max_attempts` means unlimited retries; a zero cap means uncapped.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    max_attempts: u32,
    cap_ms: Option<f64>,
    next_ms: f64,
    retries: u32,
}

impl Backoff {
    pub fn new(max_attempts: u32, max_interval_s: f64) -> Self {
        let cap_ms = (max_interval_s > 0.0).then(|| max_interval_s * 1000.0);
        let mut backoff = Self {
            max_attempts,
            cap_ms,
            next_ms: INITIAL_DELAY_MS,
            retries: 0,
        };
        backoff.reset();
        backoff
    }

    /// Start over with a fresh attempt counter.
    pub fn reset(&mut self) {
        self.retries = 0;
        self.next_ms = self.capped(INITIAL_DELAY_MS);
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Register a failed attempt and return how long to wait before the next
    /// one, or `None` once `max_attempts` retries have been spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.max_attempts != 0 && self.retries >= self.max_attempts {
            return None;
        }
        let delay = self.next_ms;
        self.next_ms = self.capped(delay * BACKOFF_MULTIPLIER);
        self.retries += 1;
        // An uncapped delay eventually outgrows `Duration`; saturate instead.
        Some(Duration::try_from_secs_f64(delay / 1000.0).unwrap_or(Duration::MAX))
    }

    fn capped(&self, ms: f64) -> f64 {
        match self.cap_ms {
            Some(cap) => ms.min(cap),
            None => ms,
        }
    }
}
