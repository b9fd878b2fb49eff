/// Inclusive pixel rectangle in screen coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Area {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl Area {
    pub const fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Area of `width` x `height` pixels with its top-left corner at `(x, y)`.
    /// Both dimensions must be non-zero.
    pub fn with_size(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self::new(x, y, x + width - 1, y + height - 1)
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1 + 1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1 + 1
    }

    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    pub fn intersects(&self, other: &Area) -> bool {
        self.x1 <= other.x2 && other.x1 <= self.x2 && self.y1 <= other.y2 && other.y1 <= self.y2
    }

    /// Smallest area covering both.
    pub fn union(&self, other: &Area) -> Area {
        Area::new(
            self.x1.min(other.x1),
            self.y1.min(other.y1),
            self.x2.max(other.x2),
            self.y2.max(other.y2),
        )
    }

    /// Overlap with `other`, if any.
    pub fn intersection(&self, other: &Area) -> Option<Area> {
        self.intersects(other).then(|| {
            Area::new(
                self.x1.max(other.x1),
                self.y1.max(other.y1),
                self.x2.min(other.x2),
                self.y2.min(other.y2),
            )
        })
    }
}
