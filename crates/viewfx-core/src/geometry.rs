use serde::{Deserialize, Serialize};

/// A 2D point in canonical or pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PointD {
    pub x: f64,
    pub y: f64,
}

impl PointD {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn add(self, other: PointD) -> PointD {
        PointD::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: PointD) -> PointD {
        PointD::new(self.x - other.x, self.y - other.y)
    }

    pub fn scale(self, scale: RenderScale) -> PointD {
        PointD::new(self.x * scale.x, self.y * scale.y)
    }

    pub fn distance_squared(self, other: PointD) -> f64 {
        let d = self.sub(other);
        d.x * d.x + d.y * d.y
    }
}

/// Ratio between pixel space and canonical space for one render.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RenderScale {
    pub x: f64,
    pub y: f64,
}

impl RenderScale {
    pub const FULL: RenderScale = RenderScale { x: 1.0, y: 1.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Default for RenderScale {
    fn default() -> Self {
        Self::FULL
    }
}

/// Half-open integer rectangle `[x1, x2) x [y1, y2)` in pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RectI {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl RectI {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// A rectangle anchored at the origin.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    pub fn width(&self) -> i32 {
        (self.x2 - self.x1).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.y2 - self.y1).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.x2 <= self.x1 || self.y2 <= self.y1
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x1 && x < self.x2 && y >= self.y1 && y < self.y2
    }

    /// True when `other` lies entirely inside `self`.
    pub fn contains(&self, other: &RectI) -> bool {
        other.is_empty()
            || (other.x1 >= self.x1
                && other.y1 >= self.y1
                && other.x2 <= self.x2
                && other.y2 <= self.y2)
    }

    pub fn intersect(&self, other: &RectI) -> Option<RectI> {
        let r = RectI::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        );
        (!r.is_empty()).then_some(r)
    }

    /// Split into at most `n` horizontal bands of near-equal height.
    ///
    /// The bands are disjoint, ordered top to bottom, and their union is `self`.
    pub fn split_rows(&self, n: usize) -> Vec<RectI> {
        if self.is_empty() {
            return Vec::new();
        }
        let height = self.height() as usize;
        let n = n.clamp(1, height);
        let base = height / n;
        let extra = height % n;

        let mut bands = Vec::with_capacity(n);
        let mut y = self.y1;
        for i in 0..n {
            let rows = base + usize::from(i < extra);
            let next = y + rows as i32;
            bands.push(RectI::new(self.x1, y, self.x2, next));
            y = next;
        }
        bands
    }

    pub fn to_canonical(&self, scale: RenderScale) -> RectD {
        RectD::new(
            self.x1 as f64 / scale.x,
            self.y1 as f64 / scale.y,
            self.x2 as f64 / scale.x,
            self.y2 as f64 / scale.y,
        )
    }
}

/// Floating-point rectangle, usually in canonical coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RectD {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl RectD {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    /// Smallest pixel rectangle enclosing this canonical rectangle at `scale`.
    pub fn to_pixel(&self, scale: RenderScale) -> RectI {
        RectI::new(
            (self.x1 * scale.x).floor() as i32,
            (self.y1 * scale.y).floor() as i32,
            (self.x2 * scale.x).ceil() as i32,
            (self.y2 * scale.y).ceil() as i32,
        )
    }
}
