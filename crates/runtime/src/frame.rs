use foundation::time::Time;

/// One tick of a fixed commit cadence.
///
/// `time` is derived from the tick index and period, never read from a clock,
/// so track ages measured on it are reproducible.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Frame {
    /// Ticks since the cadence started.
    pub index: u64,
    pub period_s: f64,
    pub time: Time,
}

impl Frame {
    pub fn at(index: u64, period_s: f64) -> Self {
        Self {
            index,
            period_s,
            time: Time(index as f64 * period_s),
        }
    }
}
