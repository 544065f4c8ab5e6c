//! Depth-based occupancy and fullness estimation.
//!
//! An empty shelf section's floor sits at roughly the depth of its
//! surroundings; stocked produce protrudes or recedes enough to open a depth
//! gap between mask pixels and the rest of the box. Large sections are
//! trusted even when the gap is small, since mask bleed can make object and
//! background look coplanar.

use serde::{Deserialize, Serialize};

use crate::error::StockError;
use crate::geometry::BoundingBox;
use crate::raster::{DepthMap, Mask};
use crate::reconcile::RootSegmentation;
use crate::report::{Section, StockReport};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct OccupancyParams {
    /// Minimum |median(background) - median(object)| on normalized depth.
    pub min_depth_diff: f32,
    /// Object pixel count above which a small depth gap still counts as stock.
    pub min_object_pixels: usize,
    /// Masks with fewer pixels inside their box are scored 0% full.
    pub min_fullness_pixels: usize,
}

impl Default for OccupancyParams {
    fn default() -> Self {
        Self {
            min_depth_diff: 0.01,
            min_object_pixels: 200,
            min_fullness_pixels: 50,
        }
    }
}

/// Depth evidence behind an occupancy decision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthEvidence {
    pub has_stock: bool,
    pub object_pixels: usize,
    pub object_depth: Option<f32>,
    pub background_depth: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fullness {
    /// 100 x mask pixels / box pixels, in [0, 100].
    pub percent: f64,
    /// Coarse empty/non-empty flag: 1 when `percent > 1`.
    pub layers: u8,
}

impl Fullness {
    pub const EMPTY: Fullness = Fullness {
        percent: 0.0,
        layers: 0,
    };
}

/// Fullness of `mask` inside `bbox`. Masks with fewer than `min_pixels`
/// pixels in the box score 0.
pub fn estimate_fullness(mask: &Mask, bbox: &BoundingBox, min_pixels: usize) -> Fullness {
    let rect = bbox.pixel_rect(mask.width(), mask.height());
    let area = rect.area();
    if area == 0 {
        return Fullness::EMPTY;
    }
    let mask_pixels = mask.count_in(rect);
    if mask_pixels < min_pixels {
        return Fullness::EMPTY;
    }
    let percent = (mask_pixels as f64 * 100.0 / area as f64).clamp(0.0, 100.0);
    Fullness {
        percent,
        layers: u8::from(percent > 1.0),
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OccupancyEstimator {
    params: OccupancyParams,
}

impl OccupancyEstimator {
    pub fn new(params: OccupancyParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &OccupancyParams {
        &self.params
    }

    /// Decides whether the section under `bbox` holds stock.
    ///
    /// - no object pixels in the box: no stock
    /// - no background pixels in the box: stock, whatever the depth
    /// - otherwise: stock when the median depth gap reaches `min_depth_diff`,
    ///   or the object covers more than `min_object_pixels`
    pub fn has_stock(&self, mask: &Mask, depth: &DepthMap, bbox: &BoundingBox) -> DepthEvidence {
        let (w, h) = (
            mask.width().min(depth.width()),
            mask.height().min(depth.height()),
        );
        let rect = bbox.pixel_rect(w, h);

        let mut object = Vec::new();
        let mut background = Vec::new();
        for (x, y) in rect.pixels() {
            let d = depth.get(x, y);
            if mask.get(x, y) {
                object.push(d);
            } else {
                background.push(d);
            }
        }

        let object_pixels = object.len();
        let Some(object_depth) = median(&mut object) else {
            return DepthEvidence {
                has_stock: false,
                object_pixels,
                object_depth: None,
                background_depth: None,
            };
        };
        let Some(background_depth) = median(&mut background) else {
            return DepthEvidence {
                has_stock: true,
                object_pixels,
                object_depth: Some(object_depth),
                background_depth: None,
            };
        };

        let diff = (background_depth - object_depth).abs();
        let has_stock = diff >= self.params.min_depth_diff || object_pixels > self.params.min_object_pixels;
        DepthEvidence {
            has_stock,
            object_pixels,
            object_depth: Some(object_depth),
            background_depth: Some(background_depth),
        }
    }

    pub fn estimate_fullness(&self, mask: &Mask, bbox: &BoundingBox) -> Fullness {
        estimate_fullness(mask, bbox, self.params.min_fullness_pixels)
    }

    /// Evaluates one section: sections without depth evidence of stock are
    /// 0% and unoccupied regardless of their pixel ratio.
    pub fn evaluate(&self, class: &str, bbox: BoundingBox, mask: &Mask, depth: &DepthMap) -> Section {
        let evidence = self.has_stock(mask, depth, &bbox);
        let fullness = if evidence.has_stock {
            self.estimate_fullness(mask, &bbox)
        } else {
            Fullness::EMPTY
        };
        log::debug!(
            "occupancy: {} obj_px={} d_obj={:?} d_bg={:?} stock={} fullness={:.1}",
            class,
            evidence.object_pixels,
            evidence.object_depth,
            evidence.background_depth,
            evidence.has_stock,
            fullness.percent
        );
        Section {
            class: class.to_string(),
            bbox,
            mask: mask.clone(),
            fullness_pct: fullness.percent,
            occupied: fullness.layers == 1,
        }
    }

    /// Builds the stock report for a reconciled root against one depth map.
    ///
    /// The depth map must share the root's frame.
    pub fn compute_stock(
        &self,
        root: &RootSegmentation,
        depth: &DepthMap,
    ) -> Result<StockReport, StockError> {
        if depth.dims() != root.dims() {
            return Err(StockError::FrameMismatch {
                expected: root.dims(),
                actual: depth.dims(),
            });
        }
        let mut report = StockReport::new();
        for entry in root.entries() {
            let det = &entry.detection;
            if det.bbox.is_degenerate() {
                log::warn!("occupancy: degenerate box for {}, scoring it empty", det.label);
            }
            report.push(self.evaluate(&det.label, det.bbox, &entry.mask, depth));
        }
        Ok(report)
    }
}

/// Median with the midpoint of the two middle values for even counts.
fn median(values: &mut [f32]) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
