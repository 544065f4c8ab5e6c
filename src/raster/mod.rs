//! Image-aligned rasters consumed by the engine.
//!
//! - `Mask`: binary foreground raster for one detection, full image frame.
//! - `SoftMask`: per-pixel segmentation scores in [0, 1] as produced by a
//!   segmenter, binarized during reconciliation.
//! - `DepthMap`: per-pixel depth normalized to [0, 1] per image.
//!
//! All rasters are row-major, indexed `(x, y)`.

mod morph;

#[cfg(feature = "image-io")]
pub mod io;

use crate::error::StockError;
use crate::geometry::PixelRect;

fn check_len(width: usize, height: usize, len: usize, what: &str) -> Result<(), StockError> {
    if width.checked_mul(height) != Some(len) {
        return Err(StockError::InvalidInput(format!(
            "{what} has {len} values, expected {width}x{height}"
        )));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Mask
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl Mask {
    pub fn empty(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width * height],
        }
    }

    pub fn from_bits(width: usize, height: usize, bits: Vec<bool>) -> Result<Self, StockError> {
        check_len(width, height, bits.len(), "mask")?;
        Ok(Self {
            width,
            height,
            bits,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn get(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.bits[y * self.width + x]
    }

    pub fn set(&mut self, x: usize, y: usize, value: bool) {
        if x < self.width && y < self.height {
            self.bits[y * self.width + x] = value;
        }
    }

    /// Paints every pixel of `rect` (clipped to the frame).
    pub fn fill_rect(&mut self, rect: PixelRect) {
        for y in rect.y0..rect.y1.min(self.height) {
            for x in rect.x0..rect.x1.min(self.width) {
                self.bits[y * self.width + x] = true;
            }
        }
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Foreground pixels inside `rect`.
    pub fn count_in(&self, rect: PixelRect) -> usize {
        rect.pixels().filter(|&(x, y)| self.get(x, y)).count()
    }

    /// Logical OR with another mask of the same frame.
    pub fn union(&self, other: &Mask) -> Result<Mask, StockError> {
        if self.dims() != other.dims() {
            return Err(StockError::FrameMismatch {
                expected: self.dims(),
                actual: other.dims(),
            });
        }
        let bits = self
            .bits
            .iter()
            .zip(&other.bits)
            .map(|(a, b)| *a || *b)
            .collect();
        Ok(Mask {
            width: self.width,
            height: self.height,
            bits,
        })
    }

    /// True when every foreground pixel of `other` is also set here.
    pub fn contains(&self, other: &Mask) -> bool {
        self.dims() == other.dims() && self.bits.iter().zip(&other.bits).all(|(a, b)| *a || !*b)
    }

    /// Max filter with a square kernel. Kernels of size 0 or 1 are a no-op;
    /// even sizes are rounded up to the next odd size.
    pub fn dilate(&self, kernel: usize) -> Mask {
        match morph::odd_kernel(kernel) {
            Some(k) => self.with_bits(morph::filter(&self.bits, self.width, self.height, k, true)),
            None => self.clone(),
        }
    }

    /// Min filter with a square kernel; the window is clipped at the frame
    /// border rather than padded with background.
    pub fn erode(&self, kernel: usize) -> Mask {
        match morph::odd_kernel(kernel) {
            Some(k) => self.with_bits(morph::filter(&self.bits, self.width, self.height, k, false)),
            None => self.clone(),
        }
    }

    /// Morphological closing: dilate then erode with the same kernel.
    pub fn close(&self, kernel: usize) -> Mask {
        if morph::odd_kernel(kernel).is_none() {
            return self.clone();
        }
        self.dilate(kernel).erode(kernel)
    }

    fn with_bits(&self, bits: Vec<bool>) -> Mask {
        Mask {
            width: self.width,
            height: self.height,
            bits,
        }
    }
}

// ----------------------------------------------------------------------------
// SoftMask
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct SoftMask {
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl SoftMask {
    pub fn from_values(width: usize, height: usize, values: Vec<f32>) -> Result<Self, StockError> {
        check_len(width, height, values.len(), "soft mask")?;
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        if x < self.width && y < self.height {
            self.values[y * self.width + x]
        } else {
            0.0
        }
    }

    /// Pixels with a score `>= threshold` become foreground.
    pub fn binarize(&self, threshold: f32) -> Mask {
        Mask {
            width: self.width,
            height: self.height,
            bits: self.values.iter().map(|v| *v >= threshold).collect(),
        }
    }

    /// Nearest-neighbour resample onto a `width` x `height` frame.
    pub fn resized(&self, width: usize, height: usize) -> SoftMask {
        if self.dims() == (width, height) {
            return self.clone();
        }
        let mut values = Vec::with_capacity(width * height);
        for y in 0..height {
            let sy = if height == 0 { 0 } else { y * self.height / height };
            for x in 0..width {
                let sx = if width == 0 { 0 } else { x * self.width / width };
                values.push(self.get(sx, sy));
            }
        }
        SoftMask {
            width,
            height,
            values,
        }
    }
}

impl From<&Mask> for SoftMask {
    fn from(mask: &Mask) -> Self {
        SoftMask {
            width: mask.width,
            height: mask.height,
            values: mask.bits.iter().map(|b| if *b { 1.0 } else { 0.0 }).collect(),
        }
    }
}

// ----------------------------------------------------------------------------
// DepthMap
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct DepthMap {
    width: usize,
    height: usize,
    values: Vec<f32>,
}

impl DepthMap {
    /// Rescales raw depth to [0, 1] with per-image min/max. A constant map
    /// becomes all zeros.
    pub fn normalized(width: usize, height: usize, raw: Vec<f32>) -> Result<Self, StockError> {
        check_len(width, height, raw.len(), "depth map")?;
        if raw.iter().any(|v| !v.is_finite()) {
            return Err(StockError::InvalidInput(
                "depth map contains non-finite values".to_string(),
            ));
        }
        let min = raw.iter().copied().fold(f32::INFINITY, f32::min);
        let max = raw.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let span = max - min;
        let values = if raw.is_empty() || span <= 0.0 {
            vec![0.0; raw.len()]
        } else {
            raw.iter().map(|v| (v - min) / span).collect()
        };
        Ok(Self {
            width,
            height,
            values,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.values[y * self.width + x]
    }
}
