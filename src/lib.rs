//! Shelf stock estimation engine.
//!
//! Turns detector, segmenter and depth-model output for photos of a produce
//! display into per-section fullness percentages.
//!
//! # Pipeline
//!
//! 1. Detections are pre-filtered and passed through class-agnostic NMS with
//!    a containment filter (`detect::suppress`).
//! 2. Each capture's masks are fused into a per-scene root segmentation
//!    (`reconcile`, held by `session::Session`).
//! 3. Every reconciled section is scored against the capture's depth map
//!    (`occupancy`), producing a `report::StockReport`.
//! 4. Optionally, sections scored empty are re-estimated by an external
//!    refinement service and blended in.
//!
//! Collaborators (detector, segmenter, depth provider, refiner) are traits in
//! `detect`; `detect::FixtureBackend` replays recorded output for tests and
//! offline runs.
//!
//! # Module Structure
//!
//! - `geometry`: boxes, IoU, containment, pixel crops
//! - `raster`: binary/soft masks, morphology, normalized depth maps
//! - `detect`: collaborator traits, detections, suppression
//! - `reconcile`: root segmentation and pass matching
//! - `session`: per-scene state
//! - `occupancy`: depth-based stock check and fullness
//! - `report`: reports, summary lines, stock levels, refinement blending
//! - `pipeline`: orchestration across captures and scenes
//! - `config`: tunables loaded from file and environment

pub mod config;
pub mod detect;
pub mod error;
pub mod geometry;
pub mod occupancy;
pub mod pipeline;
pub mod raster;
pub mod reconcile;
pub mod report;
pub mod session;

pub use config::EngineConfig;
pub use detect::{
    BoxSuppressor, DepthProvider, Detection, Detector, FixtureBackend, ModelContext,
    RefinementService, SceneImage, Segmenter,
};
pub use error::StockError;
pub use geometry::BoundingBox;
pub use occupancy::{OccupancyEstimator, OccupancyParams};
pub use pipeline::StockPipeline;
pub use raster::{DepthMap, Mask, SoftMask};
pub use reconcile::{MaskReconciler, MergeMode, ReconcileParams, RootSegmentation};
pub use report::{
    ImageOutcome, MultiImageReport, ProductSummary, Section, StockLevel, StockReport,
    StockThresholds, SummaryLine,
};
pub use session::Session;
