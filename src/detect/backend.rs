use std::collections::HashMap;

use anyhow::Result;

use crate::detect::result::{Detection, SceneImage};
use crate::raster::{DepthMap, SoftMask};
use crate::report::RefinementRequest;

/// Open-vocabulary object detector.
///
/// Implementations own their model weights; the engine only sees detections.
pub trait Detector: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect every instance of the queried classes.
    fn detect(&self, image: &SceneImage, classes: &[String]) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Box-prompted segmenter.
pub trait Segmenter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns one entry per input detection, in the same order. `None` marks
    /// a detection the segmenter produced no mask for.
    fn segment(&self, image: &SceneImage, detections: &[Detection])
        -> Result<Vec<Option<SoftMask>>>;

    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Monocular depth estimator. Returned maps must already be normalized to
/// [0, 1]; `DepthMap::normalized` does that from raw output.
pub trait DepthProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn depth(&self, image: &SceneImage) -> Result<DepthMap>;

    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}

/// Per-class percentages (0..=100) in the position order of the request.
/// `None` means the service has no opinion for that position.
pub type RefinementResponse = HashMap<String, Vec<Option<f64>>>;

/// External re-estimator for sections the depth heuristic scored empty.
pub trait RefinementService: Send + Sync {
    fn name(&self) -> &'static str;

    fn refine(&self, image: &SceneImage, request: &RefinementRequest)
        -> Result<RefinementResponse>;
}
