//! End-to-end orchestration: collaborators in, stock reports out.
//!
//! One capture flows detect -> pre-filter -> suppress -> segment -> reconcile
//! -> depth -> score -> (optional) refine. Captures of one scene share a
//! `Session` and run strictly in order; separate scenes may run in parallel.

use anyhow::{anyhow, Result};

use crate::config::EngineConfig;
use crate::detect::{Detection, ModelContext, SceneImage, SegmentationPass, SegmentedDetection};
use crate::error::StockError;
use crate::occupancy::OccupancyEstimator;
use crate::report::{
    apply_refinement, ImageOutcome, MultiImageReport, ProductSummary, RefinementRequest, StockReport,
};
use crate::session::Session;

pub struct StockPipeline {
    ctx: ModelContext,
    config: EngineConfig,
    estimator: OccupancyEstimator,
}

impl StockPipeline {
    pub fn new(ctx: ModelContext, config: EngineConfig) -> Self {
        let estimator = OccupancyEstimator::new(config.occupancy);
        Self {
            ctx,
            config,
            estimator,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &ModelContext {
        &self.ctx
    }

    /// Fresh session for one physical scene.
    pub fn new_session(&self, scene: impl Into<String>) -> Session {
        Session::new(scene, self.config.reconcile)
    }

    /// Runs the detector for the configured classes, then pre-filters and
    /// suppresses its output.
    pub fn detect(&self, image: &SceneImage) -> Result<Vec<Detection>> {
        let raw = self
            .ctx
            .detector()
            .detect(image, &self.config.classes)
            .map_err(|e| collaborator_error(self.ctx.detector().name(), &image.id, e))?;
        let total = raw.len();
        let grouped = prefilter(&self.config, raw);
        let kept = self.config.suppression.suppressor.apply(grouped);
        log::debug!(
            "image {}: {} raw detections, {} after suppression",
            image.id,
            total,
            kept.len()
        );
        Ok(kept)
    }

    /// Segments `detections`. Detections the segmenter returns no mask for
    /// are skipped.
    pub fn segment(&self, image: &SceneImage, detections: Vec<Detection>) -> Result<SegmentationPass> {
        let segmenter = self.ctx.segmenter();
        let masks = segmenter
            .segment(image, &detections)
            .map_err(|e| collaborator_error(segmenter.name(), &image.id, e))?;
        if masks.len() != detections.len() {
            return Err(StockError::Collaborator {
                collaborator: segmenter.name(),
                message: format!(
                    "returned {} masks for {} detections on '{}'",
                    masks.len(),
                    detections.len(),
                    image.id
                ),
            }
            .into());
        }

        let mut entries = Vec::with_capacity(detections.len());
        for (index, (detection, mask)) in detections.into_iter().zip(masks).enumerate() {
            match mask {
                Some(mask) => entries.push(SegmentedDetection { detection, mask }),
                None => {
                    let skipped = StockError::NoMaskData {
                        index,
                        label: detection.label,
                    };
                    log::warn!("image {}: {}, skipping", image.id, skipped);
                }
            }
        }
        Ok(SegmentationPass::new(image.width, image.height, entries))
    }

    /// Processes the next capture of the session's scene.
    pub fn process_capture(&self, session: &mut Session, image: &SceneImage) -> Result<StockReport> {
        let detections = self.detect(image)?;
        let pass = self.segment(image, detections)?;
        session.apply_pass(&pass)?;

        let depth = self
            .ctx
            .depth()
            .depth(image)
            .map_err(|e| StockError::DepthUnavailable(format!("{}: {:#}", image.id, e)))?;
        session.set_depth_map(depth)?;

        let mut report = session.compute_stock(&self.estimator)?;
        self.refine(image, &mut report);
        log::info!(
            "image {}: {} sections across {} classes",
            image.id,
            report.section_count(),
            report.class_names().len()
        );
        Ok(report)
    }

    fn refine(&self, image: &SceneImage, report: &mut StockReport) {
        if !self.config.refine_empty_sections {
            return;
        }
        let Some(refiner) = self.ctx.refiner() else {
            return;
        };
        let request = RefinementRequest::empty_sections(report);
        if request.is_empty() {
            return;
        }
        match refiner.refine(image, &request) {
            Ok(answers) => {
                let changed = apply_refinement(report, &request, &answers);
                log::debug!("image {}: {} refiner updated {} sections", image.id, refiner.name(), changed);
            }
            Err(e) => log::warn!(
                "image {}: refinement via {} failed, keeping depth estimate: {:#}",
                image.id,
                refiner.name(),
                e
            ),
        }
    }

    /// Runs every capture of one scene in order. A failed capture is recorded
    /// under its time-key and the remaining captures still run.
    pub fn run_sequence(&self, scene: &str, images: &[SceneImage]) -> MultiImageReport {
        let mut session = self.new_session(scene);
        let mut report = MultiImageReport::new();
        for image in images {
            let outcome = match self.process_capture(&mut session, image) {
                Ok(stock) => ImageOutcome::Ok(stock),
                Err(e) => {
                    log::warn!("scene {}: image {} failed: {:#}", scene, image.id, e);
                    ImageOutcome::Failed {
                        error: format!("{:#}", e),
                    }
                }
            };
            report.push(outcome);
        }
        report
    }

    /// Runs independent scenes, each with its own session. With `parallel`
    /// every scene gets a worker thread; output order follows input order.
    pub fn run_batch(&self, scenes: &[Vec<SceneImage>], parallel: bool) -> Vec<MultiImageReport> {
        if !parallel {
            return scenes
                .iter()
                .enumerate()
                .map(|(i, images)| self.run_sequence(&scene_name(i, images), images))
                .collect();
        }

        std::thread::scope(|s| {
            let handles: Vec<_> = scenes
                .iter()
                .enumerate()
                .map(|(i, images)| s.spawn(move || self.run_sequence(&scene_name(i, images), images)))
                .collect();
            handles
                .into_iter()
                .zip(scenes)
                .enumerate()
                .map(|(i, (handle, images))| {
                    handle.join().unwrap_or_else(|_| {
                        log::error!("scene {} worker panicked", i);
                        images
                            .iter()
                            .map(|_| ImageOutcome::Failed {
                                error: "scene worker panicked".to_string(),
                            })
                            .collect()
                    })
                })
                .collect()
        })
    }

    /// Per-class stock records for one report.
    pub fn summarize(&self, report: &StockReport) -> Vec<ProductSummary> {
        ProductSummary::from_report(report, &self.config.classification)
    }
}

/// Drops detections outside the class list, below the score threshold or
/// with a degenerate box, then groups survivors in class-list order.
pub fn prefilter(config: &EngineConfig, detections: Vec<Detection>) -> Vec<Detection> {
    let threshold = config.suppression.score_threshold;
    let mut usable = Vec::with_capacity(detections.len());
    for (index, det) in detections.into_iter().enumerate() {
        if det.bbox.is_degenerate() {
            let skipped = StockError::DegenerateBox {
                index,
                label: det.label,
            };
            log::warn!("{}, dropping", skipped);
            continue;
        }
        if det.score < threshold || !config.classes.contains(&det.label) {
            continue;
        }
        usable.push(det);
    }

    let mut grouped = Vec::with_capacity(usable.len());
    for class in &config.classes {
        grouped.extend(usable.iter().filter(|d| &d.label == class).cloned());
    }
    grouped
}

fn scene_name(index: usize, images: &[SceneImage]) -> String {
    images
        .first()
        .map(|img| img.id.clone())
        .unwrap_or_else(|| format!("scene-{}", index))
}

fn collaborator_error(name: &'static str, image: &str, err: anyhow::Error) -> anyhow::Error {
    anyhow!(StockError::Collaborator {
        collaborator: name,
        message: format!("{}: {:#}", image, err),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::FixtureBackend;
    use crate::geometry::BoundingBox;

    fn det(label: &str, score: f32) -> Detection {
        Detection::new(label, BoundingBox::new(0.0, 0.0, 10.0, 10.0), score)
    }

    #[test]
    fn prefilter_groups_by_class_order() {
        let cfg = EngineConfig {
            classes: vec!["tomato".into(), "onion".into()],
            ..EngineConfig::default()
        };
        let out = prefilter(
            &cfg,
            vec![det("onion", 0.9), det("tomato", 0.5), det("banana", 0.99), det("onion", 0.3)],
        );
        let labels: Vec<&str> = out.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["tomato", "onion", "onion"]);
        assert_eq!(out[1].score, 0.9);
    }

    #[test]
    fn prefilter_drops_low_scores_and_degenerate_boxes() {
        let mut cfg = EngineConfig::default();
        cfg.suppression.score_threshold = 0.4;
        let flat = Detection::new("onion", BoundingBox::new(5.0, 5.0, 5.0, 9.0), 0.9);
        let out = prefilter(&cfg, vec![det("onion", 0.3), flat, det("onion", 0.5)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].score, 0.5);
    }

    const SCENE: &str = r#"{
        "width": 40, "height": 20,
        "images": [
            {
                "id": "t0",
                "detections": [
                    { "label": "onion", "box": [0, 0, 20, 20], "score": 0.9,
                      "mask": { "rects": [[0, 0, 20, 16]] } },
                    { "label": "tomato", "box": [20, 0, 40, 20], "score": 0.8 }
                ],
                "depth": { "regions": [{ "rect": [0, 0, 20, 16], "value": 1.0 }] }
            },
            {
                "id": "t1",
                "detections": [
                    { "label": "onion", "box": [0, 0, 20, 20], "score": 0.9,
                      "mask": { "rects": [[0, 0, 20, 16]] } }
                ]
            }
        ]
    }"#;

    fn pipeline() -> (StockPipeline, Vec<SceneImage>) {
        let mut backend = FixtureBackend::new();
        backend.add_scene_json(SCENE, None).unwrap();
        let images = backend.scenes()[0].clone();
        (
            StockPipeline::new(ModelContext::from_backend(backend), EngineConfig::default()),
            images,
        )
    }

    #[test]
    fn unmasked_detection_contributes_no_section() {
        let (p, images) = pipeline();
        let mut session = p.new_session("shelf");
        let report = p.process_capture(&mut session, &images[0]).unwrap();
        assert_eq!(report.class_names(), vec!["onion"]);
        assert!((report.get("onion").unwrap()[0].fullness_pct - 80.0).abs() < 1e-9);
    }

    #[test]
    fn missing_depth_fails_only_that_capture() {
        let (p, images) = pipeline();
        let report = p.run_sequence("shelf", &images);
        assert_eq!(report.succeeded(), vec!["T0"]);
        assert_eq!(report.failed(), vec!["T1"]);
        match report.get("T1").unwrap() {
            ImageOutcome::Failed { error } => assert!(error.contains("depth map unavailable")),
            ImageOutcome::Ok(_) => panic!("T1 should have failed"),
        }
    }
}
