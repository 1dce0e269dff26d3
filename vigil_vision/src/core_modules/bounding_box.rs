// THEORY:
// A `BoundingBox` is the spatial summary of one region of motion: the tight,
// axis-aligned rectangle around a blob of foreground pixels. Like `Frame`, it is a
// "dumb", immutable data container. All the geometry the Region Consolidator needs
// (corner form, area, intersection) lives here so the suppression algorithm reads
// as an algorithm rather than as coordinate arithmetic.

/// An axis-aligned rectangle in integer pixel coordinates. Width and height are
/// always positive; the fields are private so only `new` and
/// `from_inclusive_corners` can build one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

/// An ordered, de-duplicated list of regions.
pub type RegionSet = Vec<BoundingBox>;

impl BoundingBox {
    /// Returns `None` for a degenerate (zero-sized) rectangle.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            x,
            y,
            width,
            height,
        })
    }

    /// Builds the box spanning two inclusive pixel corners. Swapped corners are
    /// normalised, so the box is never empty.
    pub fn from_inclusive_corners(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        let (x1, x2) = (min_x.min(max_x), min_x.max(max_x));
        let (y1, y2) = (min_y.min(max_y), min_y.max(max_y));
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).saturating_add(1),
            height: (y2 - y1).saturating_add(1),
        }
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Exclusive corner form `(x1, y1, x2, y2)`.
    pub fn corners(&self) -> (u64, u64, u64, u64) {
        let x1 = self.x as u64;
        let y1 = self.y as u64;
        (x1, y1, x1 + self.width as u64, y1 + self.height as u64)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Area of the overlap between two boxes, zero when they do not touch.
    pub fn intersection_area(&self, other: &BoundingBox) -> u64 {
        let (ax1, ay1, ax2, ay2) = self.corners();
        let (bx1, by1, bx2, by2) = other.corners();
        let w = ax2.min(bx2).saturating_sub(ax1.max(bx1));
        let h = ay2.min(by2).saturating_sub(ay1.max(by1));
        w * h
    }

    /// The share of `self` covered by `other`: intersection over `self`'s own area.
    pub fn overlap_ratio(&self, other: &BoundingBox) -> f64 {
        match self.area() {
            0 => 0.0,
            area => self.intersection_area(other) as f64 / area as f64,
        }
    }
}
