//! Per-scene state across repeated captures.
//!
//! A `Session` owns the running root segmentation and the current capture's
//! depth map for exactly one physical scene. Passes must be applied in capture
//! order; each pass clears the depth map so a stale map is never scored
//! against a newer root. Unrelated scenes, including concurrent requests,
//! each get their own `Session`.

use crate::detect::SegmentationPass;
use crate::error::StockError;
use crate::occupancy::OccupancyEstimator;
use crate::raster::DepthMap;
use crate::reconcile::{MaskReconciler, ReconcileOutcome, ReconcileParams, RootSegmentation};
use crate::report::StockReport;

/// Deliberately not `Clone`: a session is the single owner of its scene state.
#[derive(Debug)]
pub struct Session {
    scene: String,
    reconciler: MaskReconciler,
    root: Option<RootSegmentation>,
    depth: Option<DepthMap>,
    passes: usize,
}

impl Session {
    pub fn new(scene: impl Into<String>, params: ReconcileParams) -> Self {
        Self {
            scene: scene.into(),
            reconciler: MaskReconciler::new(params),
            root: None,
            depth: None,
            passes: 0,
        }
    }

    pub fn scene(&self) -> &str {
        &self.scene
    }

    pub fn root(&self) -> Option<&RootSegmentation> {
        self.root.as_ref()
    }

    pub fn passes_applied(&self) -> usize {
        self.passes
    }

    /// Folds the next capture's segmentation into the root.
    ///
    /// While the root is missing or holds no sections, the pass seeds it
    /// as-is; afterwards it is reconciled. Returns `None` for a seeding pass.
    pub fn apply_pass(
        &mut self,
        pass: &SegmentationPass,
    ) -> Result<Option<ReconcileOutcome>, StockError> {
        self.depth = None;
        self.passes += 1;
        if let Some(root) = self.root.as_mut().filter(|r| !r.is_empty()) {
            let outcome = self.reconciler.reconcile(root, pass)?;
            log::info!(
                "scene {}: pass {} matched {} of {} sections ({} new boxes ignored)",
                self.scene,
                self.passes,
                outcome.matches.len(),
                root.len(),
                outcome.ignored_new.len()
            );
            return Ok(Some(outcome));
        }

        let root = RootSegmentation::seed(pass);
        log::info!(
            "scene {}: pass {} seeded root with {} sections",
            self.scene,
            self.passes,
            root.len()
        );
        self.root = Some(root);
        Ok(None)
    }

    /// Attaches the depth map of the capture applied last.
    pub fn set_depth_map(&mut self, depth: DepthMap) -> Result<(), StockError> {
        if let Some(root) = &self.root {
            if depth.dims() != root.dims() {
                return Err(StockError::FrameMismatch {
                    expected: root.dims(),
                    actual: depth.dims(),
                });
            }
        }
        self.depth = Some(depth);
        Ok(())
    }

    /// Scores the current root against the current depth map.
    pub fn compute_stock(&self, estimator: &OccupancyEstimator) -> Result<StockReport, StockError> {
        let depth = self.depth.as_ref().ok_or_else(|| {
            StockError::DepthUnavailable(format!(
                "scene {} has no depth map for pass {}",
                self.scene, self.passes
            ))
        })?;
        match &self.root {
            Some(root) => estimator.compute_stock(root, depth),
            None => Ok(StockReport::new()),
        }
    }

    /// Drops all scene state, ready for an unrelated scene.
    pub fn reset(&mut self) {
        self.root = None;
        self.depth = None;
        self.passes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Detection, SegmentedDetection};
    use crate::geometry::{BoundingBox, PixelRect};
    use crate::raster::{Mask, SoftMask};

    fn pass(w: usize, h: usize, items: &[(&str, BoundingBox, PixelRect)]) -> SegmentationPass {
        let entries = items
            .iter()
            .map(|(label, bbox, r)| {
                let mut m = Mask::empty(w, h);
                m.fill_rect(*r);
                SegmentedDetection {
                    detection: Detection::new(*label, *bbox, 0.9),
                    mask: SoftMask::from(&m),
                }
            })
            .collect();
        SegmentationPass::new(w, h, entries)
    }

    fn r(x0: usize, y0: usize, x1: usize, y1: usize) -> PixelRect {
        PixelRect { x0, y0, x1, y1 }
    }

    fn stepped_depth(w: usize, h: usize, region: PixelRect) -> DepthMap {
        let mut raw = vec![0.0; w * h];
        for (x, y) in region.pixels() {
            raw[y * w + x] = 1.0;
        }
        DepthMap::normalized(w, h, raw).unwrap()
    }

    #[test]
    fn first_pass_seeds_then_later_passes_merge() {
        let mut s = Session::new("aisle-3", ReconcileParams::default());
        let bbox = BoundingBox::new(0.0, 0.0, 20.0, 20.0);
        assert!(s.apply_pass(&pass(30, 30, &[("onion", bbox, r(0, 0, 20, 8))])).unwrap().is_none());
        assert_eq!(s.root().unwrap().entries()[0].mask.count(), 160);

        let outcome = s
            .apply_pass(&pass(30, 30, &[("onion", bbox, r(0, 8, 20, 14))]))
            .unwrap()
            .unwrap();
        assert_eq!(outcome.matches.len(), 1);
        assert!(s.root().unwrap().entries()[0].mask.count() >= 20 * 14);
        assert_eq!(s.passes_applied(), 2);
    }

    #[test]
    fn compute_stock_requires_depth_for_current_pass() {
        let mut s = Session::new("aisle-3", ReconcileParams::default());
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        s.apply_pass(&pass(20, 20, &[("tomato", bbox, r(0, 0, 10, 8))])).unwrap();
        let err = s.compute_stock(&OccupancyEstimator::default()).unwrap_err();
        assert!(matches!(err, StockError::DepthUnavailable(_)));

        s.set_depth_map(stepped_depth(20, 20, r(0, 0, 10, 8))).unwrap();
        let report = s.compute_stock(&OccupancyEstimator::default()).unwrap();
        assert!((report.get("tomato").unwrap()[0].fullness_pct - 80.0).abs() < 1e-9);

        // A new pass invalidates the old depth map.
        s.apply_pass(&pass(20, 20, &[])).unwrap();
        assert!(s.compute_stock(&OccupancyEstimator::default()).is_err());
    }

    #[test]
    fn depth_in_other_frame_is_rejected() {
        let mut s = Session::new("aisle-3", ReconcileParams::default());
        s.apply_pass(&pass(20, 20, &[])).unwrap();
        assert!(s.set_depth_map(DepthMap::normalized(10, 10, vec![0.0; 100]).unwrap()).is_err());
    }

    #[test]
    fn empty_first_pass_does_not_lock_the_root() {
        let mut s = Session::new("aisle-3", ReconcileParams::default());
        s.apply_pass(&pass(20, 20, &[])).unwrap();
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        assert!(s.apply_pass(&pass(20, 20, &[("onion", bbox, r(0, 0, 5, 5))])).unwrap().is_none());
        assert_eq!(s.root().unwrap().len(), 1);
    }

    #[test]
    fn reset_clears_scene_state() {
        let mut s = Session::new("aisle-3", ReconcileParams::default());
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        s.apply_pass(&pass(20, 20, &[("onion", bbox, r(0, 0, 5, 5))])).unwrap();
        s.reset();
        assert!(s.root().is_none());
        assert_eq!(s.passes_applied(), 0);
    }

    #[test]
    fn sessions_are_independent() {
        let bbox = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let mut a = Session::new("a", ReconcileParams::default());
        let mut b = Session::new("b", ReconcileParams::default());
        a.apply_pass(&pass(20, 20, &[("onion", bbox, r(0, 0, 5, 5))])).unwrap();
        b.apply_pass(&pass(20, 20, &[("tomato", bbox, r(0, 0, 9, 9))])).unwrap();
        assert_eq!(a.root().unwrap().entries()[0].detection.label, "onion");
        assert_eq!(b.root().unwrap().entries()[0].detection.label, "tomato");
    }
}
