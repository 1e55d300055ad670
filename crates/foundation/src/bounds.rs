/// Axis-aligned 2D extent in map units.
///
/// Edges are inclusive: a point lying exactly on `xmin`/`xmax`/`ymin`/`ymax`
/// is contained.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Extent {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

impl Extent {
    pub fn new(xmin: f64, ymin: f64, xmax: f64, ymax: f64) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    pub fn width(&self) -> f64 {
        self.xmax - self.xmin
    }

    pub fn height(&self) -> f64 {
        self.ymax - self.ymin
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.xmin + self.xmax) * 0.5,
            (self.ymin + self.ymax) * 0.5,
        )
    }

    /// Scale the extent about its center.
    ///
    /// `factor = 1.15` grows each side by 7.5% of the corresponding dimension.
    pub fn expand(&self, factor: f64) -> Self {
        let half = (factor - 1.0) * 0.5;
        let dw = half * self.width();
        let dh = half * self.height();
        Self {
            xmin: self.xmin - dw,
            ymin: self.ymin - dh,
            xmax: self.xmax + dw,
            ymax: self.ymax + dh,
        }
    }

    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        !(x < self.xmin || x > self.xmax || y < self.ymin || y > self.ymax)
    }
}
