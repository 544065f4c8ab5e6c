//! Axis-aligned box geometry shared by suppression, reconciliation and
//! occupancy estimation.
//!
//! Boxes are in pixel coordinates of the full image frame, `(x1, y1)` top-left
//! and `(x2, y2)` bottom-right. A box with `x2 <= x1` or `y2 <= y1` is
//! degenerate: its area is treated as 0 and it never acts as a divisor.

use serde::{Deserialize, Serialize};

/// Added to IoU denominators so two degenerate boxes never divide by zero.
const IOU_EPSILON: f32 = 1e-6;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    /// Area clamped to zero for inverted boxes.
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.x2 > self.x1 && self.y2 > self.y1) || !self.area().is_finite()
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter + IOU_EPSILON;
        inter / union
    }

    /// Fraction of `self`'s area that lies inside `outer`.
    ///
    /// `None` when `self` has no area, so callers treat it as not contained.
    pub fn containment_in(&self, outer: &BoundingBox) -> Option<f32> {
        let area = self.area();
        if area <= 0.0 {
            return None;
        }
        Some(self.intersection_area(outer) / area)
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn center_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Diagonal length with each side floored at one pixel, so tiny boxes still
    /// get a usable center tolerance.
    pub fn diagonal(&self) -> f32 {
        let w = (self.x2 - self.x1).max(1.0);
        let h = (self.y2 - self.y1).max(1.0);
        (w * w + h * h).sqrt()
    }

    /// This box with x coordinates multiplied by `sx` and y by `sy`.
    pub fn scaled(&self, sx: f32, sy: f32) -> BoundingBox {
        BoundingBox::new(self.x1 * sx, self.y1 * sy, self.x2 * sx, self.y2 * sy)
    }

    /// Integer pixel window of this box inside a `width` x `height` frame.
    ///
    /// Coordinates are truncated toward zero and clamped to the frame; the
    /// window may be empty.
    pub fn pixel_rect(&self, width: usize, height: usize) -> PixelRect {
        let clamp = |v: f32, max: usize| -> usize {
            if !v.is_finite() || v <= 0.0 {
                0
            } else {
                (v.trunc() as usize).min(max)
            }
        };
        let x0 = clamp(self.x1, width);
        let y0 = clamp(self.y1, height);
        let x1 = clamp(self.x2, width).max(x0);
        let y1 = clamp(self.y2, height).max(y0);
        PixelRect { x0, y0, x1, y1 }
    }
}

/// Half-open pixel window `[x0, x1) x [y0, y1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: usize,
    pub y0: usize,
    pub x1: usize,
    pub y1: usize,
}

impl PixelRect {
    pub fn width(&self) -> usize {
        self.x1 - self.x0
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0
    }

    pub fn area(&self) -> usize {
        self.width() * self.height()
    }

    pub fn is_empty(&self) -> bool {
        self.area() == 0
    }

    pub fn pixels(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (self.y0..self.y1).flat_map(move |y| (self.x0..self.x1).map(move |x| (x, y)))
    }
}
