//! Cross-pass mask reconciliation.
//!
//! A scene may be detected several times (different crops, angles or detector
//! runs) so one pass can recover sections another pass missed. Each new pass
//! is fused into the session's root segmentation:
//!
//! 1. Mutual best IoU: root box `i` and new box `j` match when each is the
//!    other's best IoU partner and the IoU reaches `iou_threshold`.
//! 2. Center fallback: a root box left unmatched takes the new box with the
//!    nearest center if that distance is within
//!    `center_rel_tolerance * diagonal(i)`.
//! 3. Root boxes still unmatched keep their mask. New boxes matched by no root
//!    box are ignored, so the root box set stays stable across passes.
//!
//! Matched new masks are binarized, dilated and closed, then merged into the
//! root mask by `MergeMode`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::detect::{Detection, SegmentationPass};
use crate::error::StockError;
use crate::geometry::BoundingBox;
use crate::raster::{Mask, SoftMask};

/// Score at which a seeding pass's masks become foreground.
pub const SEED_THRESHOLD: f32 = 0.5;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Logical OR with the existing root mask.
    #[default]
    Union,
    /// Replace the root mask with the processed new mask.
    Overwrite,
}

impl FromStr for MergeMode {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "union" => Ok(MergeMode::Union),
            "overwrite" => Ok(MergeMode::Overwrite),
            other => Err(StockError::InvalidInput(format!(
                "unknown merge mode '{other}' (expected union or overwrite)"
            ))),
        }
    }
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeMode::Union => f.write_str("union"),
            MergeMode::Overwrite => f.write_str("overwrite"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReconcileParams {
    pub iou_threshold: f32,
    pub center_rel_tolerance: f32,
    /// New-pass scores at or above this become foreground.
    pub source_threshold: f32,
    pub merge_mode: MergeMode,
    /// Dilation kernel size; 0 or 1 disables.
    pub dilate_kernel: usize,
    /// Closing kernel size; 0 or 1 disables.
    pub close_kernel: usize,
}

impl Default for ReconcileParams {
    fn default() -> Self {
        Self {
            iou_threshold: 0.15,
            center_rel_tolerance: 0.20,
            source_threshold: 0.4,
            merge_mode: MergeMode::Union,
            dilate_kernel: 3,
            close_kernel: 3,
        }
    }
}

/// One tracked section of the root segmentation.
#[derive(Clone, Debug)]
pub struct RootEntry {
    pub detection: Detection,
    pub mask: Mask,
}

/// The accumulated masks of one scene, in the frame of its first pass.
#[derive(Clone, Debug)]
pub struct RootSegmentation {
    width: usize,
    height: usize,
    entries: Vec<RootEntry>,
}

impl RootSegmentation {
    /// Seeds a root from a raw first pass: masks are resampled to the pass
    /// frame and binarized, with no morphology.
    pub fn seed(pass: &SegmentationPass) -> Self {
        let entries = pass
            .entries
            .iter()
            .map(|e| RootEntry {
                detection: e.detection.clone(),
                mask: e.mask.resized(pass.width, pass.height).binarize(SEED_THRESHOLD),
            })
            .collect();
        Self {
            width: pass.width,
            height: pass.height,
            entries,
        }
    }

    pub fn from_entries(
        width: usize,
        height: usize,
        entries: Vec<RootEntry>,
    ) -> Result<Self, StockError> {
        if let Some(bad) = entries.iter().find(|e| e.mask.dims() != (width, height)) {
            return Err(StockError::FrameMismatch {
                expected: (width, height),
                actual: bad.mask.dims(),
            });
        }
        Ok(Self {
            width,
            height,
            entries,
        })
    }

    pub fn dims(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn entries(&self) -> &[RootEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn boxes(&self) -> Vec<BoundingBox> {
        self.entries.iter().map(|e| e.detection.bbox).collect()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchKind {
    MutualIou,
    CenterDistance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassMatch {
    pub root: usize,
    pub new: usize,
    pub kind: MatchKind,
}

/// What one reconciliation did to the root.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub matches: Vec<PassMatch>,
    /// Root entries left unchanged because no match was found.
    pub unmatched_roots: Vec<usize>,
    /// New-pass entries no root entry claimed (not inserted).
    pub ignored_new: Vec<usize>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MaskReconciler {
    params: ReconcileParams,
}

impl MaskReconciler {
    pub fn new(params: ReconcileParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ReconcileParams {
        &self.params
    }

    /// Assigns at most one new box to each root box.
    ///
    /// Degenerate boxes on either side never match. Several root boxes may
    /// claim the same new box through the center fallback.
    pub fn match_boxes(&self, root: &[BoundingBox], new: &[BoundingBox]) -> Vec<Option<PassMatch>> {
        let root_ok: Vec<bool> = root.iter().map(|b| !b.is_degenerate()).collect();
        let new_ok: Vec<bool> = new.iter().map(|b| !b.is_degenerate()).collect();
        let iou: Vec<Vec<f32>> = root
            .iter()
            .map(|r| new.iter().map(|n| r.iou(n)).collect())
            .collect();

        let best_new_for_root: Vec<Option<usize>> = (0..root.len())
            .map(|i| {
                if !root_ok[i] {
                    return None;
                }
                first_max((0..new.len()).filter(|&j| new_ok[j]), |j| iou[i][j])
            })
            .collect();
        let best_root_for_new: Vec<Option<usize>> = (0..new.len())
            .map(|j| {
                if !new_ok[j] {
                    return None;
                }
                first_max((0..root.len()).filter(|&i| root_ok[i]), |i| iou[i][j])
            })
            .collect();

        (0..root.len())
            .map(|i| {
                let mutual = best_new_for_root[i].filter(|&j| {
                    best_root_for_new[j] == Some(i) && iou[i][j] >= self.params.iou_threshold
                });
                if let Some(j) = mutual {
                    return Some(PassMatch {
                        root: i,
                        new: j,
                        kind: MatchKind::MutualIou,
                    });
                }
                if !root_ok[i] {
                    return None;
                }

                let nearest = first_min((0..new.len()).filter(|&j| new_ok[j]), |j| {
                    root[i].center_distance(&new[j])
                })?;
                let tolerance = self.params.center_rel_tolerance * root[i].diagonal();
                (root[i].center_distance(&new[nearest]) <= tolerance).then_some(PassMatch {
                    root: i,
                    new: nearest,
                    kind: MatchKind::CenterDistance,
                })
            })
            .collect()
    }

    /// Resamples a new-pass score map to the root frame, binarizes it at the
    /// source threshold, then dilates and closes it.
    pub fn process_mask(&self, mask: &SoftMask, frame: (usize, usize)) -> Mask {
        mask.resized(frame.0, frame.1)
            .binarize(self.params.source_threshold)
            .dilate(self.params.dilate_kernel)
            .close(self.params.close_kernel)
    }

    /// Fuses `pass` into `root` in place.
    ///
    /// An empty pass or an empty root leaves the root untouched; seeding an
    /// empty root is the session's job.
    pub fn reconcile(
        &self,
        root: &mut RootSegmentation,
        pass: &SegmentationPass,
    ) -> Result<ReconcileOutcome, StockError> {
        if root.is_empty() || pass.is_empty() {
            return Ok(ReconcileOutcome {
                matches: Vec::new(),
                unmatched_roots: (0..root.len()).collect(),
                ignored_new: (0..pass.entries.len()).collect(),
            });
        }

        let frame = root.dims();
        let matches = self.match_boxes(&root.boxes(), &pass_boxes_in_frame(pass, frame));
        let mut outcome = ReconcileOutcome::default();
        let mut claimed = vec![false; pass.entries.len()];

        for (i, found) in matches.into_iter().enumerate() {
            let Some(m) = found else {
                log::debug!(
                    "reconcile: no match for root {} ({}), keeping its mask",
                    i,
                    root.entries[i].detection.label
                );
                outcome.unmatched_roots.push(i);
                continue;
            };
            claimed[m.new] = true;
            let processed = self.process_mask(&pass.entries[m.new].mask, frame);
            let entry = &mut root.entries[i];
            entry.mask = match self.params.merge_mode {
                MergeMode::Union => entry.mask.union(&processed)?,
                MergeMode::Overwrite => processed,
            };
            log::debug!(
                "reconcile: root {} ({}) <- new {} via {:?}",
                i,
                entry.detection.label,
                m.new,
                m.kind
            );
            outcome.matches.push(m);
        }

        outcome.ignored_new = claimed
            .iter()
            .enumerate()
            .filter(|(_, c)| !**c)
            .map(|(j, _)| j)
            .collect();
        Ok(outcome)
    }
}

/// Pass boxes mapped into `frame`, the root's pixel frame.
fn pass_boxes_in_frame(pass: &SegmentationPass, frame: (usize, usize)) -> Vec<BoundingBox> {
    if (pass.width, pass.height) == frame || pass.width == 0 || pass.height == 0 {
        return pass.boxes();
    }
    let sx = frame.0 as f32 / pass.width as f32;
    let sy = frame.1 as f32 / pass.height as f32;
    pass.entries
        .iter()
        .map(|e| e.detection.bbox.scaled(sx, sy))
        .collect()
}

/// Index of the first maximum, like `argmax`.
fn first_max(indices: impl Iterator<Item = usize>, key: impl Fn(usize) -> f32) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for idx in indices {
        let v = key(idx);
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((idx, v));
        }
    }
    best.map(|(idx, _)| idx)
}

fn first_min(indices: impl Iterator<Item = usize>, key: impl Fn(usize) -> f32) -> Option<usize> {
    first_max(indices, |idx| -key(idx))
}
