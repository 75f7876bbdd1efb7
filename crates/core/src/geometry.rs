//! Canvas geometry.

use serde::{Deserialize, Serialize};

/// Width and height of an image or canvas, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Round both dimensions up to the next multiple of `n`.
    ///
    /// Latent-space models work on 8-pixel blocks, so workflow builders
    /// call this with `8` before sizing an empty latent. Dimensions too
    /// large to round up stay at `u32::MAX`.
    pub fn multiple_of(self, n: u32) -> Self {
        if n == 0 {
            return self;
        }
        Self {
            width: self.width.div_ceil(n).saturating_mul(n),
            height: self.height.div_ceil(n).saturating_mul(n),
        }
    }

    pub fn pixel_count(self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

/// Rectangular region of a canvas a generation request applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Bounds anchored at the origin covering `extent`.
    pub const fn from_extent(extent: Extent) -> Self {
        Self::new(0, 0, extent.width, extent.height)
    }

    pub const fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Intersection of two bounds, or `None` when they do not overlap.
    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        let x0 = i64::from(self.x).max(i64::from(other.x));
        let y0 = i64::from(self.y).max(i64::from(other.y));
        let x1 = (i64::from(self.x) + i64::from(self.width))
            .min(i64::from(other.x) + i64::from(other.width));
        let y1 = (i64::from(self.y) + i64::from(self.height))
            .min(i64::from(other.y) + i64::from(other.height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Bounds::new(
            x0 as i32,
            y0 as i32,
            (x1 - x0) as u32,
            (y1 - y0) as u32,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_of_rounds_up() {
        assert_eq!(Extent::new(510, 512).multiple_of(8), Extent::new(512, 512));
        assert_eq!(Extent::new(1, 9).multiple_of(8), Extent::new(8, 16));
    }

    #[test]
    fn multiple_of_saturates_near_max() {
        let e = Extent::new(u32::MAX - 2, 16).multiple_of(8);
        assert_eq!(e, Extent::new(u32::MAX, 16));
    }

    #[test]
    fn multiple_of_zero_is_identity() {
        assert_eq!(Extent::new(13, 7).multiple_of(0), Extent::new(13, 7));
    }

    #[test]
    fn from_extent_is_anchored_at_origin() {
        let b = Bounds::from_extent(Extent::new(512, 256));
        assert_eq!(b, Bounds::new(0, 0, 512, 256));
        assert_eq!(b.extent(), Extent::new(512, 256));
    }

    #[test]
    fn intersection_of_overlapping_bounds() {
        let a = Bounds::new(0, 0, 100, 100);
        let b = Bounds::new(50, 60, 100, 100);
        assert_eq!(a.intersection(&b), Some(Bounds::new(50, 60, 50, 40)));
    }

    #[test]
    fn intersection_of_disjoint_bounds_is_none() {
        let a = Bounds::new(0, 0, 10, 10);
        let b = Bounds::new(10, 0, 10, 10);
        assert_eq!(a.intersection(&b), None);
    }
}
