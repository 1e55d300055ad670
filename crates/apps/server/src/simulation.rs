//! Deterministic moving-track simulation.
//!
//! Every track circles its own cell of a square grid laid over the feed
//! extent, so positions stay inside the extent and are reproducible for a
//! given time. Heading follows the direction of travel.

use std::f64::consts::TAU;

use serde::{Deserialize, Serialize};
use streaming::Feature;
use streaming::protocol::encode_feature_result;

const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimConfig {
    pub tracks: usize,
    /// Number of distinct `TYPE` values handed out round-robin.
    pub types: u32,
    pub center_x: f64,
    pub center_y: f64,
    /// Half the side of the square the tracks move in, in map units.
    pub half_extent: f64,
    /// Features per `featureResult` frame; 0 sends everything in one frame.
    pub batch: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tracks: 100,
            types: 4,
            // Web Mercator, roughly over Redlands, CA.
            center_x: -13_046_000.0,
            center_y: 4_036_000.0,
            half_extent: 5_000.0,
            batch: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Orbit {
    cx: f64,
    cy: f64,
    radius: f64,
    /// rad/s, sign gives direction.
    omega: f64,
    phase: f64,
}

#[derive(Debug, Clone)]
pub struct Simulation {
    config: SimConfig,
    orbits: Vec<Orbit>,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        let cols = (config.tracks as f64).sqrt().ceil().max(1.0) as usize;
        let cell = 2.0 * config.half_extent / cols as f64;
        let x0 = config.center_x - config.half_extent;
        let y0 = config.center_y - config.half_extent;

        let orbits = (0..config.tracks)
            .map(|i| {
                let speed = 0.05 + 0.01 * (i % 7) as f64;
                Orbit {
                    cx: x0 + ((i % cols) as f64 + 0.5) * cell,
                    cy: y0 + ((i / cols) as f64 + 0.5) * cell,
                    radius: 0.4 * cell,
                    omega: if i % 2 == 0 { speed } else { -speed },
                    phase: i as f64 * GOLDEN_ANGLE,
                }
            })
            .collect();

        Self { config, orbits }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Every track's state at `t` seconds.
    pub fn features_at(&self, t: f64) -> Vec<Feature> {
        let types = self.config.types.max(1);
        self.orbits
            .iter()
            .enumerate()
            .map(|(i, o)| {
                let angle = o.phase + o.omega * t;
                let (s, c) = angle.sin_cos();
                let x = o.cx + o.radius * c;
                let y = o.cy + o.radius * s;
                // Tangent of the circle, pointing along the direction of travel.
                let heading = (o.omega * c).atan2(-o.omega * s).rem_euclid(TAU);

                Feature::new(i as i64 + 1, x, y)
                    .with_heading(heading)
                    .with_type(i as u32 % types)
                    .with_active(i % 4 == 0)
            })
            .collect()
    }

    /// `featureResult` frames for the state at `t`.
    pub fn frames_at(&self, t: f64) -> Result<Vec<String>, serde_json::Error> {
        let features = self.features_at(t);
        if features.is_empty() {
            return Ok(Vec::new());
        }
        let batch = if self.config.batch == 0 {
            features.len()
        } else {
            self.config.batch
        };
        features.chunks(batch).map(encode_feature_result).collect()
    }
}
