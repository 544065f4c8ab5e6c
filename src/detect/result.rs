use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::geometry::BoundingBox;
use crate::raster::SoftMask;

/// One raw detector output. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Product class name, e.g. "onion".
    pub label: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    /// Detector confidence in [0, 1].
    pub score: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, bbox: BoundingBox, score: f32) -> Self {
        Self {
            label: label.into(),
            bbox,
            score,
        }
    }
}

/// Handle to one captured image as seen by collaborators.
///
/// The engine never reads pixels itself; detectors, segmenters and depth
/// providers resolve the image from `id` or `path`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneImage {
    pub id: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    pub width: usize,
    pub height: usize,
}

impl SceneImage {
    pub fn new(id: impl Into<String>, width: usize, height: usize) -> Self {
        Self {
            id: id.into(),
            path: None,
            width,
            height,
        }
    }
}

/// A detection paired with the segmenter's score map for it.
#[derive(Clone, Debug)]
pub struct SegmentedDetection {
    pub detection: Detection,
    pub mask: SoftMask,
}

/// Output of one detection + segmentation pass over a capture.
#[derive(Clone, Debug)]
pub struct SegmentationPass {
    /// Frame the pass was captured in.
    pub width: usize,
    pub height: usize,
    pub entries: Vec<SegmentedDetection>,
}

impl SegmentationPass {
    pub fn new(width: usize, height: usize, entries: Vec<SegmentedDetection>) -> Self {
        Self {
            width,
            height,
            entries,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn boxes(&self) -> Vec<BoundingBox> {
        self.entries.iter().map(|e| e.detection.bbox).collect()
    }
}
