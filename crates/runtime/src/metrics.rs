//! Counters, gauges and size histograms for the ingest/commit/pack pipeline.

use std::collections::BTreeMap;

/// Features received from the connection.
pub const FEATURES_RECEIVED: &str = "features.received";
/// Tracks dropped by max-age eviction.
pub const FEATURES_EVICTED: &str = "features.evicted";
/// Ticks that moved pending updates into the committed table.
pub const COMMITS: &str = "store.commits";
pub const PACKS: &str = "packer.packs";
/// Packs that were copied down to a right-sized buffer.
pub const PACK_SHRINKS: &str = "packer.shrinks";
/// Gauge: committed table size after the last commit.
pub const COMMITTED_FEATURES: &str = "store.committed";
/// Histogram: features that survived clipping, per pack.
pub const PACKED_FEATURES: &str = "packer.visible";

/// Count/sum/min/max summary of a size distribution.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Histogram {
    pub count: u64,
    pub sum: u64,
    pub min: u64,
    pub max: u64,
}

impl Histogram {
    fn record(&mut self, value: u64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

/// Pipeline metrics, owned by the single task that drives the pipeline.
///
/// Keys are the static names above. Sorted maps keep snapshots in a stable
/// order for logs and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metrics {
    counters: BTreeMap<&'static str, u64>,
    gauges: BTreeMap<&'static str, u64>,
    histograms: BTreeMap<&'static str, Histogram>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&mut self, name: &'static str, by: u64) {
        *self.counters.entry(name).or_default() += by;
    }

    pub fn set_gauge(&mut self, name: &'static str, value: u64) {
        self.gauges.insert(name, value);
    }

    pub fn record(&mut self, name: &'static str, value: u64) {
        self.histograms.entry(name).or_default().record(value);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            counters: self.counters.iter().map(|(k, v)| (*k, *v)).collect(),
            gauges: self.gauges.iter().map(|(k, v)| (*k, *v)).collect(),
            histograms: self.histograms.iter().map(|(k, v)| (*k, *v)).collect(),
        }
    }
}

/// Point-in-time copy of [`Metrics`], sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub counters: Vec<(&'static str, u64)>,
    pub gauges: Vec<(&'static str, u64)>,
    pub histograms: Vec<(&'static str, Histogram)>,
}

fn lookup<T: Copy>(entries: &[(&'static str, T)], name: &str) -> Option<T> {
    entries
        .binary_search_by(|(k, _)| (*k).cmp(&name))
        .ok()
        .map(|i| entries[i].1)
}

impl MetricsSnapshot {
    /// 0 for counters that never fired.
    pub fn counter(&self, name: &str) -> u64 {
        lookup(&self.counters, name).unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        lookup(&self.gauges, name)
    }

    pub fn histogram(&self, name: &str) -> Option<Histogram> {
        lookup(&self.histograms, name)
    }
}
