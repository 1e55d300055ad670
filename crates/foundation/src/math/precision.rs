//! Local-origin model for shipping map coordinates as small `f32` offsets.

use super::Vec2;

/// GPU-friendly, origin-relative position in `f32`.
pub type LocalOffsetF32 = [f32; 2];

/// Local-origin precision model.
///
/// Web Mercator coordinates are in the millions of meters, which `f32` cannot
/// represent to the meter. Store a high-precision `origin` (typically the view
/// center) and express every packed position relative to it.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct LocalOrigin {
    pub origin: Vec2,
}

impl LocalOrigin {
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            origin: Vec2::new(x, y),
        }
    }

    pub fn x(&self) -> f64 {
        self.origin.x
    }

    pub fn y(&self) -> f64 {
        self.origin.y
    }

    /// Convert a map-space point (f64) to an origin-relative `f32` offset.
    #[inline]
    pub fn to_f32(self, x: f64, y: f64) -> LocalOffsetF32 {
        [(x - self.origin.x) as f32, (y - self.origin.y) as f32]
    }
}
