use std::collections::BTreeMap;

use foundation::Time;
use runtime::Frame;
use serde::{Deserialize, Serialize};
use streaming::{Feature, TrackId};

#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Evict committed tracks not updated for this many seconds. `None` keeps
    /// every track forever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_s: Option<f64>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub frame: u64,
    /// Pending entries moved into the committed table.
    pub applied: usize,
    pub evicted: usize,
    /// Committed table size after the commit.
    pub total: usize,
}

#[derive(Debug, Clone)]
struct Committed {
    feature: Feature,
    updated: Time,
}

/// Latest-state table of streamed tracks.
///
/// Incoming features land in a pending map (last write wins per track) and are
/// only made visible by [`FeatureStore::tick`], which coalesces any burst of
/// updates into a single commit.
#[derive(Debug, Default)]
pub struct FeatureStore {
    config: StoreConfig,
    pending: BTreeMap<TrackId, Feature>,
    committed: BTreeMap<TrackId, Committed>,
    update_requested: bool,
}

impl FeatureStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn on_feature(&mut self, feature: Feature) {
        self.pending.insert(feature.track_id, feature);
        self.update_requested = true;
    }

    pub fn on_feature_batch(&mut self, features: impl IntoIterator<Item = Feature>) {
        for feature in features {
            self.on_feature(feature);
        }
    }

    pub fn update_requested(&self) -> bool {
        self.update_requested
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Commit pending updates and, with a max age set, drop stale tracks.
    ///
    /// Eviction runs on every tick so a quiet feed still ages out. `None` when
    /// the committed table did not change, which also means no pack is due.
    pub fn tick(&mut self, frame: Frame) -> Option<CommitSummary> {
        let applied = if self.update_requested {
            self.update_requested = false;
            let applied = self.pending.len();
            for (track_id, feature) in std::mem::take(&mut self.pending) {
                self.committed.insert(
                    track_id,
                    Committed {
                        feature,
                        updated: frame.time,
                    },
                );
            }
            applied
        } else {
            0
        };

        let evicted = match self.config.max_age_s {
            Some(max_age) => self.evict_older_than(frame.time, max_age),
            None => 0,
        };

        if applied == 0 && evicted == 0 {
            return None;
        }
        Some(CommitSummary {
            frame: frame.index,
            applied,
            evicted,
            total: self.committed.len(),
        })
    }

    fn evict_older_than(&mut self, now: Time, max_age_s: f64) -> usize {
        let before = self.committed.len();
        self.committed
            .retain(|_, c| now.seconds_since(c.updated) <= max_age_s);
        before - self.committed.len()
    }

    pub fn get(&self, track_id: TrackId) -> Option<&Feature> {
        self.committed.get(&track_id).map(|c| &c.feature)
    }

    /// Committed features in track id order.
    pub fn committed(&self) -> impl ExactSizeIterator<Item = &Feature> + '_ {
        self.committed.values().map(|c| &c.feature)
    }

    pub fn len(&self) -> usize {
        self.committed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }
}
