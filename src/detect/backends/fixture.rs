//! Replays recorded collaborator output from JSON scene files.
//!
//! A scene file describes one physical scene captured several times:
//!
//! ```json
//! {
//!   "width": 64, "height": 48,
//!   "images": [
//!     {
//!       "id": "aisle-3-t0",
//!       "detections": [
//!         { "label": "onion", "box": [0, 0, 20, 20], "score": 0.9,
//!           "mask": { "rects": [[0, 0, 20, 16]] } }
//!       ],
//!       "depth": { "background": 0.0, "regions": [{ "rect": [0, 0, 20, 16], "value": 1.0 }] },
//!       "refinement": { "onion": [35.0, null] }
//!     }
//!   ]
//! }
//! ```
//!
//! Masks and depth maps may instead name an image file via `path` when the
//! crate is built with `image-io`. Relative paths resolve against the scene
//! file's directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use crate::detect::backend::{DepthProvider, Detector, RefinementResponse, RefinementService, Segmenter};
use crate::detect::result::{Detection, SceneImage};
use crate::geometry::BoundingBox;
use crate::raster::{DepthMap, SoftMask};
use crate::report::RefinementRequest;

#[derive(Debug, Deserialize)]
struct SceneFile {
    width: usize,
    height: usize,
    images: Vec<ImageRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct ImageRecord {
    id: String,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    width: Option<usize>,
    #[serde(default)]
    height: Option<usize>,
    #[serde(default)]
    detections: Vec<DetectionRecord>,
    #[serde(default)]
    depth: Option<DepthRecord>,
    #[serde(default)]
    refinement: RefinementResponse,
    /// Makes the detector fail for this image.
    #[serde(default)]
    fail: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DetectionRecord {
    label: String,
    #[serde(rename = "box", deserialize_with = "box_from_array")]
    bbox: BoundingBox,
    score: f32,
    #[serde(default)]
    mask: Option<MaskRecord>,
}

#[derive(Debug, Clone, Deserialize)]
struct MaskRecord {
    #[serde(default)]
    rects: Vec<[usize; 4]>,
    #[serde(default = "default_mask_value")]
    value: f32,
    #[serde(default)]
    path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
struct DepthRecord {
    #[serde(default)]
    background: f32,
    #[serde(default)]
    regions: Vec<DepthRegion>,
    #[serde(default)]
    path: Option<PathBuf>,
    #[serde(default)]
    unavailable: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct DepthRegion {
    rect: [usize; 4],
    value: f32,
}

fn default_mask_value() -> f32 {
    1.0
}

fn box_from_array<'de, D>(deserializer: D) -> std::result::Result<BoundingBox, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let [x1, y1, x2, y2] = <[f32; 4]>::deserialize(deserializer)?;
    Ok(BoundingBox::new(x1, y1, x2, y2))
}

/// One recorded image, resolved against its scene file.
#[derive(Debug, Clone)]
struct Recorded {
    image: SceneImage,
    record: ImageRecord,
    base_dir: Option<PathBuf>,
}

/// Detector, segmenter, depth provider and refinement service backed by
/// recorded scene files. Useful for tests and offline replays.
#[derive(Debug, Default)]
pub struct FixtureBackend {
    images: HashMap<String, Recorded>,
    scenes: Vec<Vec<SceneImage>>,
}

impl FixtureBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads each file as one scene, in argument order.
    pub fn load<P: AsRef<Path>>(paths: &[P]) -> Result<Self> {
        let mut backend = Self::new();
        for path in paths {
            let path = path.as_ref();
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read scene file {}", path.display()))?;
            backend
                .add_scene_json(&raw, path.parent())
                .with_context(|| format!("load scene file {}", path.display()))?;
        }
        Ok(backend)
    }

    /// Parses one scene from JSON. Relative paths inside it resolve against
    /// `base_dir` when given.
    pub fn add_scene_json(&mut self, raw: &str, base_dir: Option<&Path>) -> Result<()> {
        let file: SceneFile = serde_json::from_str(raw).context("invalid scene JSON")?;
        let mut scene = Vec::with_capacity(file.images.len());
        for record in file.images {
            if self.images.contains_key(&record.id) {
                bail!("duplicate image id '{}'", record.id);
            }
            let image = SceneImage {
                id: record.id.clone(),
                path: record.path.clone(),
                width: record.width.unwrap_or(file.width),
                height: record.height.unwrap_or(file.height),
            };
            scene.push(image.clone());
            self.images.insert(
                record.id.clone(),
                Recorded {
                    image,
                    record,
                    base_dir: base_dir.map(Path::to_path_buf),
                },
            );
        }
        log::debug!("fixture scene {} loaded with {} images", self.scenes.len(), scene.len());
        self.scenes.push(scene);
        Ok(())
    }

    /// Scenes in load order, each in capture order.
    pub fn scenes(&self) -> &[Vec<SceneImage>] {
        &self.scenes
    }

    fn recorded(&self, image: &SceneImage) -> Result<&Recorded> {
        self.images
            .get(&image.id)
            .ok_or_else(|| anyhow!("no recorded data for image '{}'", image.id))
    }
}

impl Recorded {
    fn resolve(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    fn paint_mask(&self, mask: &MaskRecord) -> Result<SoftMask> {
        if let Some(path) = &mask.path {
            return load_soft_mask(&self.resolve(path));
        }
        let (w, h) = (self.image.width, self.image.height);
        let mut values = vec![0.0f32; w * h];
        for &rect in &mask.rects {
            paint(&mut values, w, h, rect, mask.value);
        }
        Ok(SoftMask::from_values(w, h, values)?)
    }

    fn paint_depth(&self, depth: &DepthRecord) -> Result<DepthMap> {
        if depth.unavailable {
            bail!("depth model returned no output for '{}'", self.image.id);
        }
        if let Some(path) = &depth.path {
            return load_depth_map(&self.resolve(path));
        }
        let (w, h) = (self.image.width, self.image.height);
        let mut raw = vec![depth.background; w * h];
        for region in &depth.regions {
            paint(&mut raw, w, h, region.rect, region.value);
        }
        Ok(DepthMap::normalized(w, h, raw)?)
    }
}

/// Fills `[x0, y0, x1, y1)` clamped to the frame.
fn paint(values: &mut [f32], w: usize, h: usize, rect: [usize; 4], value: f32) {
    let [x0, y0, x1, y1] = rect;
    for y in y0.min(h)..y1.min(h) {
        for x in x0.min(w)..x1.min(w) {
            values[y * w + x] = value;
        }
    }
}

#[cfg(feature = "image-io")]
fn load_soft_mask(path: &Path) -> Result<SoftMask> {
    crate::raster::io::load_soft_mask(path)
}

#[cfg(not(feature = "image-io"))]
fn load_soft_mask(path: &Path) -> Result<SoftMask> {
    bail!(
        "mask file {} requires the image-io feature",
        path.display()
    )
}

#[cfg(feature = "image-io")]
fn load_depth_map(path: &Path) -> Result<DepthMap> {
    crate::raster::io::load_depth_map(path)
}

#[cfg(not(feature = "image-io"))]
fn load_depth_map(path: &Path) -> Result<DepthMap> {
    bail!(
        "depth file {} requires the image-io feature",
        path.display()
    )
}

impl Detector for FixtureBackend {
    fn name(&self) -> &'static str {
        "fixture"
    }

    /// Returns the recorded detections verbatim; class filtering is left to
    /// the caller, as with open-vocabulary models that emit stray labels.
    fn detect(&self, image: &SceneImage, _classes: &[String]) -> Result<Vec<Detection>> {
        let recorded = self.recorded(image)?;
        if let Some(reason) = &recorded.record.fail {
            bail!("detector failed on '{}': {}", image.id, reason);
        }
        Ok(recorded
            .record
            .detections
            .iter()
            .map(|d| Detection::new(d.label.clone(), d.bbox, d.score))
            .collect())
    }
}

impl Segmenter for FixtureBackend {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn segment(&self, image: &SceneImage, detections: &[Detection]) -> Result<Vec<Option<SoftMask>>> {
        let recorded = self.recorded(image)?;
        detections
            .iter()
            .map(|det| {
                let mask = recorded
                    .record
                    .detections
                    .iter()
                    .find(|r| r.label == det.label && r.bbox == det.bbox)
                    .and_then(|r| r.mask.as_ref());
                mask.map(|m| recorded.paint_mask(m)).transpose()
            })
            .collect()
    }
}

impl DepthProvider for FixtureBackend {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn depth(&self, image: &SceneImage) -> Result<DepthMap> {
        let recorded = self.recorded(image)?;
        match &recorded.record.depth {
            Some(depth) => recorded.paint_depth(depth),
            None => bail!("no depth recorded for '{}'", image.id),
        }
    }
}

impl RefinementService for FixtureBackend {
    fn name(&self) -> &'static str {
        "fixture"
    }

    fn refine(&self, image: &SceneImage, request: &RefinementRequest) -> Result<RefinementResponse> {
        let recorded = self.recorded(image)?;
        Ok(request
            .targets
            .iter()
            .filter_map(|t| {
                recorded
                    .record
                    .refinement
                    .get(&t.class)
                    .map(|values| (t.class.clone(), values.clone()))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"{
        "width": 20, "height": 10,
        "images": [
            {
                "id": "t0",
                "detections": [
                    { "label": "onion", "box": [0, 0, 10, 10], "score": 0.9,
                      "mask": { "rects": [[0, 0, 10, 8]] } },
                    { "label": "tomato", "box": [10, 0, 20, 10], "score": 0.8 }
                ],
                "depth": { "regions": [{ "rect": [0, 0, 10, 8], "value": 2.0 }] },
                "refinement": { "tomato": [40.0] }
            },
            { "id": "t1", "fail": "camera glare" }
        ]
    }"#;

    fn backend() -> FixtureBackend {
        let mut b = FixtureBackend::new();
        b.add_scene_json(SCENE, None).unwrap();
        b
    }

    #[test]
    fn replays_detections_and_masks() {
        let b = backend();
        let image = b.scenes()[0][0].clone();
        assert_eq!((image.width, image.height), (20, 10));

        let dets = b.detect(&image, &[]).unwrap();
        assert_eq!(dets.len(), 2);
        let masks = b.segment(&image, &dets).unwrap();
        assert_eq!(masks[0].as_ref().unwrap().binarize(0.5).count(), 80);
        assert!(masks[1].is_none());
    }

    #[test]
    fn paints_normalized_depth() {
        let b = backend();
        let depth = b.depth(&b.scenes()[0][0]).unwrap();
        assert_eq!(depth.get(0, 0), 1.0);
        assert_eq!(depth.get(15, 5), 0.0);
    }

    #[test]
    fn failing_image_and_missing_depth_error() {
        let b = backend();
        let t1 = b.scenes()[0][1].clone();
        assert!(b.detect(&t1, &[]).is_err());
        assert!(b.depth(&t1).is_err());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut b = backend();
        assert!(b.add_scene_json(SCENE, None).is_err());
    }

    #[test]
    fn unknown_image_is_an_error() {
        let b = backend();
        assert!(b.detect(&SceneImage::new("nope", 1, 1), &[]).is_err());
    }
}
