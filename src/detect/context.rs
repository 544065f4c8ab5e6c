use std::sync::Arc;

use anyhow::{Context, Result};

use super::backend::{DepthProvider, Detector, RefinementService, Segmenter};

/// Initialized collaborator handles, passed explicitly into the pipeline.
///
/// Handles are `Arc`-shared so one context can serve several scenes running
/// on different threads. Collaborators hold model state only; per-scene state
/// lives in `Session`.
#[derive(Clone)]
pub struct ModelContext {
    detector: Arc<dyn Detector>,
    segmenter: Arc<dyn Segmenter>,
    depth: Arc<dyn DepthProvider>,
    refiner: Option<Arc<dyn RefinementService>>,
}

impl ModelContext {
    pub fn new(
        detector: Arc<dyn Detector>,
        segmenter: Arc<dyn Segmenter>,
        depth: Arc<dyn DepthProvider>,
    ) -> Self {
        Self {
            detector,
            segmenter,
            depth,
            refiner: None,
        }
    }

    /// Use one backend for detection, segmentation and depth.
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: Detector + Segmenter + DepthProvider + 'static,
    {
        let backend = Arc::new(backend);
        Self::new(backend.clone(), backend.clone(), backend)
    }

    pub fn with_refiner(mut self, refiner: Arc<dyn RefinementService>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    pub fn detector(&self) -> &dyn Detector {
        self.detector.as_ref()
    }

    pub fn segmenter(&self) -> &dyn Segmenter {
        self.segmenter.as_ref()
    }

    pub fn depth(&self) -> &dyn DepthProvider {
        self.depth.as_ref()
    }

    pub fn refiner(&self) -> Option<&dyn RefinementService> {
        self.refiner.as_deref()
    }

    /// Warm up every collaborator once before the first scene.
    pub fn warm_up(&self) -> Result<()> {
        self.detector
            .warm_up()
            .with_context(|| format!("warm up detector '{}'", self.detector.name()))?;
        self.segmenter
            .warm_up()
            .with_context(|| format!("warm up segmenter '{}'", self.segmenter.name()))?;
        self.depth
            .warm_up()
            .with_context(|| format!("warm up depth provider '{}'", self.depth.name()))?;
        log::info!(
            "collaborators ready: detector={}, segmenter={}, depth={}, refiner={}",
            self.detector.name(),
            self.segmenter.name(),
            self.depth.name(),
            self.refiner.as_ref().map(|r| r.name()).unwrap_or("none")
        );
        Ok(())
    }
}
