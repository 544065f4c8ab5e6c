//! Class-agnostic non-max suppression with a containment filter.
//!
//! Plain IoU suppression misses a small box nested inside a large one, since
//! the area mismatch keeps IoU low. The containment ratio (intersection over
//! the smaller box's own area) catches that case.

use serde::{Deserialize, Serialize};

use crate::detect::result::Detection;
use crate::geometry::BoundingBox;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.5;
pub const DEFAULT_CONTAINMENT_THRESHOLD: f32 = 0.9;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxSuppressor {
    /// Drop a lower-scoring box whose IoU with a kept box exceeds this.
    pub iou_threshold: f32,
    /// Drop a box when more than this fraction of its area lies inside
    /// another box.
    pub containment_threshold: f32,
}

impl Default for BoxSuppressor {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            containment_threshold: DEFAULT_CONTAINMENT_THRESHOLD,
        }
    }
}

impl BoxSuppressor {
    pub fn new(iou_threshold: f32, containment_threshold: f32) -> Self {
        Self {
            iou_threshold,
            containment_threshold,
        }
    }

    /// Greedy suppression over `boxes` ranked by `scores`.
    ///
    /// Returns kept indices in ascending order. Equal scores keep their input
    /// order. After the greedy pass, a kept box nested inside a strictly
    /// larger kept box is dropped, even when it outscores that box.
    pub fn suppress(&self, boxes: &[BoundingBox], scores: &[f32]) -> Vec<usize> {
        let n = boxes.len().min(scores.len());
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]));

        let mut greedy = Vec::new();
        while let Some((&i, rest)) = order.split_first() {
            greedy.push(i);
            order = rest
                .iter()
                .copied()
                .filter(|&j| {
                    let iou = boxes[i].iou(&boxes[j]);
                    let contained = boxes[j]
                        .containment_in(&boxes[i])
                        .is_some_and(|c| c > self.containment_threshold);
                    iou <= self.iou_threshold && !contained
                })
                .collect();
        }

        let mut keep: Vec<usize> = greedy
            .iter()
            .copied()
            .filter(|&i| {
                let nested = greedy
                    .iter()
                    .any(|&j| j != i && self.is_nested(&boxes[i], &boxes[j]));
                if nested {
                    log::debug!("suppress: box {} is nested in a kept box", i);
                }
                !nested
            })
            .collect();
        keep.sort_unstable();
        keep
    }

    /// Suppresses detections, returning survivors in their input order.
    pub fn apply(&self, detections: Vec<Detection>) -> Vec<Detection> {
        let boxes: Vec<BoundingBox> = detections.iter().map(|d| d.bbox).collect();
        let scores: Vec<f32> = detections.iter().map(|d| d.score).collect();
        let keep = self.suppress(&boxes, &scores);
        let before = detections.len();
        let kept: Vec<Detection> = detections
            .into_iter()
            .enumerate()
            .filter(|(idx, _)| keep.binary_search(idx).is_ok())
            .map(|(_, d)| d)
            .collect();
        log::debug!("suppress: kept {} of {} detections", kept.len(), before);
        kept
    }

    /// `inner` sits inside the strictly larger `outer` beyond the containment
    /// threshold. Same-size pairs are left to the IoU test so the higher score
    /// wins.
    fn is_nested(&self, inner: &BoundingBox, outer: &BoundingBox) -> bool {
        inner.area() < outer.area()
            && inner
                .containment_in(outer)
                .is_some_and(|c| c > self.containment_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox::new(x1, y1, x2, y2)
    }

    #[test]
    fn overlapping_duplicates_keep_highest_score() {
        let boxes = [b(0.0, 0.0, 10.0, 10.0), b(1.0, 1.0, 11.0, 11.0), b(50.0, 50.0, 60.0, 60.0)];
        let scores = [0.6, 0.9, 0.5];
        let keep = BoxSuppressor::default().suppress(&boxes, &scores);
        assert_eq!(keep, vec![1, 2]);
    }

    #[test]
    fn output_is_ascending_not_by_score() {
        let boxes = [b(0.0, 0.0, 10.0, 10.0), b(20.0, 0.0, 30.0, 10.0), b(40.0, 0.0, 50.0, 10.0)];
        let scores = [0.1, 0.9, 0.5];
        assert_eq!(BoxSuppressor::default().suppress(&boxes, &scores), vec![0, 1, 2]);
    }

    #[test]
    fn nested_box_dropped_when_outer_scores_higher() {
        let boxes = [b(0.0, 0.0, 100.0, 100.0), b(10.0, 10.0, 20.0, 20.0)];
        let scores = [0.95, 0.9];
        // IoU is only 0.01, containment catches it.
        assert!(boxes[0].iou(&boxes[1]) < 0.5);
        assert_eq!(BoxSuppressor::default().suppress(&boxes, &scores), vec![0]);
    }

    #[test]
    fn nested_box_dropped_even_when_it_outscores_outer() {
        let boxes = [b(0.0, 0.0, 100.0, 100.0), b(10.0, 10.0, 20.0, 20.0)];
        let scores = [0.9, 0.95];
        assert_eq!(BoxSuppressor::new(0.5, 0.9).suppress(&boxes, &scores), vec![0]);
    }

    #[test]
    fn nested_box_survives_when_its_container_is_suppressed() {
        // The inner box sits in the outer box, which a third box suppresses
        // by IoU (~0.54). Nothing kept contains the inner box any more.
        let boxes = [
            b(0.0, 0.0, 100.0, 100.0),
            b(10.0, 10.0, 20.0, 20.0),
            b(30.0, 0.0, 130.0, 100.0),
        ];
        let scores = [0.5, 0.95, 0.9];
        assert!(boxes[0].iou(&boxes[2]) > 0.5);
        assert_eq!(BoxSuppressor::default().suppress(&boxes, &scores), vec![1, 2]);
    }

    #[test]
    fn partially_nested_box_below_threshold_survives() {
        // Half of the small box lies outside the large one.
        let boxes = [b(0.0, 0.0, 100.0, 100.0), b(90.0, 10.0, 110.0, 20.0)];
        let scores = [0.9, 0.8];
        assert_eq!(BoxSuppressor::default().suppress(&boxes, &scores), vec![0, 1]);
    }

    #[test]
    fn iou_axis_suppresses_without_containment() {
        // Same-size shifted boxes: containment 0.8 < 0.9 but IoU ~0.67 > 0.5.
        let boxes = [b(0.0, 0.0, 10.0, 10.0), b(0.0, 2.0, 10.0, 12.0)];
        let scores = [0.7, 0.8];
        assert_eq!(BoxSuppressor::default().suppress(&boxes, &scores), vec![1]);

        let lenient = BoxSuppressor::new(0.9, 0.9);
        assert_eq!(lenient.suppress(&boxes, &scores), vec![0, 1]);
    }

    #[test]
    fn equal_scores_prefer_first_seen() {
        let boxes = [b(0.0, 0.0, 10.0, 10.0), b(0.0, 0.0, 10.0, 10.0)];
        let scores = [0.5, 0.5];
        assert_eq!(BoxSuppressor::default().suppress(&boxes, &scores), vec![0]);
    }

    #[test]
    fn zero_area_box_is_never_contained() {
        let boxes = [b(0.0, 0.0, 100.0, 100.0), b(10.0, 10.0, 10.0, 50.0)];
        let scores = [0.9, 0.8];
        assert_eq!(BoxSuppressor::default().suppress(&boxes, &scores), vec![0, 1]);
    }

    #[test]
    fn kept_set_has_no_pair_above_thresholds() {
        let boxes: Vec<BoundingBox> = (0..12)
            .map(|i| {
                let o = (i * 7 % 30) as f32;
                b(o, o / 2.0, o + 20.0 + i as f32, o / 2.0 + 15.0)
            })
            .collect();
        let scores: Vec<f32> = (0..12).map(|i| ((i * 37) % 11) as f32 / 10.0).collect();
        let s = BoxSuppressor::default();
        let keep = s.suppress(&boxes, &scores);
        assert!(!keep.is_empty() && keep.len() <= boxes.len());
        assert!(keep.windows(2).all(|w| w[0] < w[1]));
        for &a in &keep {
            for &c in &keep {
                if a != c {
                    assert!(boxes[a].iou(&boxes[c]) <= s.iou_threshold);
                    let contained = boxes[a]
                        .containment_in(&boxes[c])
                        .is_some_and(|r| r > s.containment_threshold);
                    assert!(!contained);
                }
            }
        }
    }

    #[test]
    fn apply_preserves_input_order() {
        let dets = vec![
            Detection::new("onion", b(0.0, 0.0, 10.0, 10.0), 0.4),
            Detection::new("tomato", b(0.0, 0.0, 11.0, 11.0), 0.9),
            Detection::new("onion", b(40.0, 0.0, 50.0, 10.0), 0.3),
        ];
        let kept = BoxSuppressor::default().apply(dets);
        let labels: Vec<&str> = kept.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["tomato", "onion"]);
    }
}
