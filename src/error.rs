use thiserror::Error;

/// Engine error taxonomy.
///
/// `NoMaskData` and `DegenerateBox` describe per-detection conditions: the
/// engine logs them and skips the detection instead of returning them, but the
/// variants exist so collaborators and callers can report the same condition.
#[derive(Debug, Error)]
pub enum StockError {
    #[error("detection {index} ({label}) has no mask data")]
    NoMaskData { index: usize, label: String },

    #[error("detection {index} ({label}) has a degenerate box")]
    DegenerateBox { index: usize, label: String },

    #[error("depth map unavailable: {0}")]
    DepthUnavailable(String),

    #[error("raster frame mismatch: expected {expected:?}, got {actual:?}")]
    FrameMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("{collaborator} failed: {message}")]
    Collaborator {
        collaborator: &'static str,
        message: String,
    },
}
