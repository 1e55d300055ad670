use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

use crate::frame::Frame;

/// Default commit cadence (~60 Hz).
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_millis(16);

/// Fixed-cadence tick source owned by whoever consumes the ticks.
///
/// The ticker starts when it is created and stops when it is dropped, so it
/// never outlives the layer that drives it. Late ticks are skipped rather than
/// bursted; the frame index is derived from elapsed time so `Frame::time`
/// keeps tracking the clock across skipped ticks.
#[derive(Debug)]
pub struct Ticker {
    interval: Interval,
    started: Instant,
    period: Duration,
    last_index: Option<u64>,
}

impl Ticker {
    pub fn start(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let started = Instant::now();
        let mut interval = interval_at(started + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            interval,
            started,
            period,
            last_index: None,
        }
    }

    /// Wait for the next tick. Cancellation safe.
    pub async fn tick(&mut self) -> Frame {
        self.interval.tick().await;
        let elapsed = Instant::now().saturating_duration_since(self.started);
        let mut index = (elapsed.as_secs_f64() / self.period.as_secs_f64()).round() as u64;
        if let Some(last) = self.last_index
            && index <= last
        {
            index = last + 1;
        }
        self.last_index = Some(index);
        Frame::at(index, self.period.as_secs_f64())
    }
}
