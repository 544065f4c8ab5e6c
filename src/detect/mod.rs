mod backend;
mod backends;
mod context;
mod result;
pub mod suppress;

pub use backend::{DepthProvider, Detector, RefinementResponse, RefinementService, Segmenter};
pub use backends::FixtureBackend;
pub use context::ModelContext;
pub use result::{Detection, SceneImage, SegmentationPass, SegmentedDetection};
pub use suppress::BoxSuppressor;
