//! Stock reports and their derived views.
//!
//! - `StockReport`: class name -> sections, in detection order per class.
//! - Summary lines `"{class} - section {n}: {fullness:.1f}%"`, a committed
//!   text format that downstream consumers parse back.
//! - Stock level classification and confidence.
//! - Blending of external refinement estimates.
//! - `MultiImageReport`: time-key ("T0", "T1", ...) -> per-image outcome.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};

use crate::error::StockError;
use crate::geometry::BoundingBox;
use crate::raster::Mask;

// -------------------- Sections --------------------

/// One reconciled, evaluated region of the display.
#[derive(Clone, Debug, Serialize)]
pub struct Section {
    pub class: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    #[serde(skip)]
    pub mask: Mask,
    /// Fullness in [0, 100].
    pub fullness_pct: f64,
    /// Whether the section holds any stock.
    pub occupied: bool,
}

impl Section {
    pub fn fraction(&self) -> f64 {
        self.fullness_pct / 100.0
    }

    /// Stock level of this section alone.
    pub fn level(&self, thresholds: &StockThresholds) -> StockLevel {
        thresholds.classify(self.fraction())
    }
}

#[derive(Clone, Debug)]
struct ClassSections {
    class: String,
    sections: Vec<Section>,
}

/// Sections grouped by class. Classes keep first-appearance order and
/// sections keep insertion order within their class.
#[derive(Clone, Debug, Default)]
pub struct StockReport {
    classes: Vec<ClassSections>,
}

impl StockReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, section: Section) {
        match self.classes.iter_mut().find(|c| c.class == section.class) {
            Some(group) => group.sections.push(section),
            None => self.classes.push(ClassSections {
                class: section.class.clone(),
                sections: vec![section],
            }),
        }
    }

    pub fn get(&self, class: &str) -> Option<&[Section]> {
        self.classes
            .iter()
            .find(|c| c.class == class)
            .map(|c| c.sections.as_slice())
    }

    pub fn get_mut(&mut self, class: &str) -> Option<&mut Vec<Section>> {
        self.classes
            .iter_mut()
            .find(|c| c.class == class)
            .map(|c| &mut c.sections)
    }

    /// Classes with their sections, in report order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Section])> {
        self.classes
            .iter()
            .map(|c| (c.class.as_str(), c.sections.as_slice()))
    }

    pub fn class_names(&self) -> Vec<&str> {
        self.classes.iter().map(|c| c.class.as_str()).collect()
    }

    pub fn section_count(&self) -> usize {
        self.classes.iter().map(|c| c.sections.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.section_count() == 0
    }

    /// One summary line per section, numbered per class from 1.
    pub fn summary_lines(&self) -> Vec<String> {
        self.iter()
            .flat_map(|(class, sections)| {
                sections
                    .iter()
                    .enumerate()
                    .map(move |(i, s)| summary_line(class, i + 1, s.fullness_pct))
            })
            .collect()
    }
}

impl Serialize for StockReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.classes.len()))?;
        for group in &self.classes {
            map.serialize_entry(&group.class, &group.sections)?;
        }
        map.end()
    }
}

// -------------------- Summary lines --------------------

pub fn summary_line(class: &str, section: usize, fullness_pct: f64) -> String {
    format!("{} - section {}: {:.1}%", class, section, fullness_pct)
}

/// A parsed summary line.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryLine {
    pub class: String,
    /// 1-based, per class.
    pub section: usize,
    pub fullness_pct: f64,
}

impl fmt::Display for SummaryLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&summary_line(&self.class, self.section, self.fullness_pct))
    }
}

impl FromStr for SummaryLine {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        static SUMMARY_RE: OnceLock<regex::Regex> = OnceLock::new();
        let re = SUMMARY_RE.get_or_init(|| {
            regex::Regex::new(r"^(?P<class>.+) - section (?P<n>[0-9]+): (?P<pct>[0-9]+(?:\.[0-9]+)?)%$")
                .unwrap()
        });
        let bad = || StockError::InvalidInput(format!("not a section summary line: '{s}'"));
        let caps = re.captures(s.trim_end()).ok_or_else(bad)?;
        let section: usize = caps["n"].parse().map_err(|_| bad())?;
        let fullness_pct: f64 = caps["pct"].parse().map_err(|_| bad())?;
        if section == 0 {
            return Err(bad());
        }
        Ok(SummaryLine {
            class: caps["class"].to_string(),
            section,
            fullness_pct,
        })
    }
}

// -------------------- Classification --------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockLevel {
    Low,
    Normal,
    Overstocked,
}

impl fmt::Display for StockLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StockLevel::Low => f.write_str("LOW"),
            StockLevel::Normal => f.write_str("NORMAL"),
            StockLevel::Overstocked => f.write_str("OVERSTOCKED"),
        }
    }
}

/// Thresholds on the 0..=1 fullness fraction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StockThresholds {
    /// Strictly below is LOW.
    pub low: f64,
    /// Strictly above is OVERSTOCKED.
    pub overstock: f64,
}

impl Default for StockThresholds {
    fn default() -> Self {
        Self {
            low: 0.30,
            overstock: 0.80,
        }
    }
}

impl StockThresholds {
    pub fn classify(&self, fraction: f64) -> StockLevel {
        if fraction < self.low {
            StockLevel::Low
        } else if fraction > self.overstock {
            StockLevel::Overstocked
        } else {
            StockLevel::Normal
        }
    }
}

/// Fixed confidence mapping for report schemas that require one.
pub fn confidence(fraction: f64) -> f64 {
    (fraction * 1.1).min(0.95)
}

/// Per-class rollup of a report.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProductSummary {
    pub product: String,
    /// Mean section fullness as a 0..=1 fraction.
    pub stock_fraction: f64,
    pub level: StockLevel,
    pub confidence: f64,
    pub reasoning: String,
}

impl ProductSummary {
    pub fn from_report(report: &StockReport, thresholds: &StockThresholds) -> Vec<ProductSummary> {
        report
            .iter()
            .filter(|(_, sections)| !sections.is_empty())
            .map(|(class, sections)| {
                let mean = sections.iter().map(Section::fraction).sum::<f64>() / sections.len() as f64;
                ProductSummary {
                    product: class.to_string(),
                    stock_fraction: mean,
                    level: thresholds.classify(mean),
                    confidence: confidence(mean),
                    reasoning: format!(
                        "depth analysis estimated {} at {:.1}% across {} section(s)",
                        class,
                        mean * 100.0,
                        sections.len()
                    ),
                }
            })
            .collect()
    }
}

// -------------------- Refinement --------------------

/// Sections of one class sent for external re-estimation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RefinementTargets {
    pub class: String,
    /// 0-based positions within the class.
    pub positions: Vec<usize>,
    pub boxes: Vec<BoundingBox>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RefinementRequest {
    pub targets: Vec<RefinementTargets>,
}

impl RefinementRequest {
    /// Every section the depth heuristic scored exactly 0%.
    pub fn empty_sections(report: &StockReport) -> Self {
        let targets = report
            .iter()
            .filter_map(|(class, sections)| {
                let (positions, boxes): (Vec<usize>, Vec<BoundingBox>) = sections
                    .iter()
                    .enumerate()
                    .filter(|(_, s)| s.fullness_pct == 0.0)
                    .map(|(i, s)| (i, s.bbox))
                    .unzip();
                (!positions.is_empty()).then(|| RefinementTargets {
                    class: class.to_string(),
                    positions,
                    boxes,
                })
            })
            .collect();
        Self { targets }
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Combines an external estimate with the heuristic one.
///
/// `None` means the external scorer gave no opinion and the heuristic value
/// stands. `Some(0.0)` is a real "empty" opinion and is averaged like any
/// other value.
pub fn blend(external: Option<f64>, heuristic: f64) -> f64 {
    match external {
        Some(ext) => (ext + heuristic) / 2.0,
        None => heuristic,
    }
}

/// Maps a legacy scorer that reports "no opinion" as 0 onto the explicit
/// sentinel.
pub fn legacy_zero_as_missing(value: f64) -> Option<f64> {
    (value != 0.0).then_some(value)
}

/// Blends refinement answers into the targeted sections. Answers are matched
/// by position order; missing answers count as no opinion. Returns the number
/// of sections changed.
pub fn apply_refinement(
    report: &mut StockReport,
    request: &RefinementRequest,
    answers: &HashMap<String, Vec<Option<f64>>>,
) -> usize {
    let mut changed = 0;
    for target in &request.targets {
        let Some(values) = answers.get(&target.class) else {
            continue;
        };
        let Some(sections) = report.get_mut(&target.class) else {
            continue;
        };
        for (slot, &pos) in target.positions.iter().enumerate() {
            let Some(section) = sections.get_mut(pos) else {
                continue;
            };
            let external = values
                .get(slot)
                .copied()
                .flatten()
                .map(|v| v.clamp(0.0, 100.0));
            if external.is_none() {
                continue;
            }
            let blended = blend(external, section.fullness_pct);
            section.fullness_pct = blended;
            section.occupied = blended > 1.0;
            changed += 1;
        }
    }
    changed
}

// -------------------- Multi-image --------------------

/// Time-key for the image at `index` in input order.
pub fn time_key(index: usize) -> String {
    format!("T{}", index)
}

#[derive(Clone, Debug)]
pub enum ImageOutcome {
    Ok(StockReport),
    Failed { error: String },
}

impl ImageOutcome {
    pub fn report(&self) -> Option<&StockReport> {
        match self {
            ImageOutcome::Ok(report) => Some(report),
            ImageOutcome::Failed { .. } => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ImageOutcome::Ok(_))
    }
}

impl Serialize for ImageOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("ImageOutcome", 2)?;
        match self {
            ImageOutcome::Ok(report) => {
                st.serialize_field("status", "ok")?;
                st.serialize_field("report", report)?;
            }
            ImageOutcome::Failed { error } => {
                st.serialize_field("status", "failed")?;
                st.serialize_field("error", error)?;
            }
        }
        st.end()
    }
}

/// Per-image outcomes keyed "T0", "T1", ... in input order.
#[derive(Clone, Debug, Default)]
pub struct MultiImageReport {
    entries: Vec<(String, ImageOutcome)>,
}

impl MultiImageReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the next image's outcome under the next time-key.
    pub fn push(&mut self, outcome: ImageOutcome) -> &str {
        let key = time_key(self.entries.len());
        self.entries.push((key, outcome));
        &self.entries[self.entries.len() - 1].0
    }

    pub fn get(&self, key: &str) -> Option<&ImageOutcome> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, o)| o)
    }

    pub fn keys(&self) -> Vec<&str> {
        self.entries.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ImageOutcome)> {
        self.entries.iter().map(|(k, o)| (k.as_str(), o))
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.iter().filter(|(_, o)| o.is_ok()).map(|(k, _)| k).collect()
    }

    pub fn failed(&self) -> Vec<&str> {
        self.iter().filter(|(_, o)| !o.is_ok()).map(|(k, _)| k).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<ImageOutcome> for MultiImageReport {
    fn from_iter<I: IntoIterator<Item = ImageOutcome>>(iter: I) -> Self {
        let mut report = MultiImageReport::new();
        for outcome in iter {
            report.push(outcome);
        }
        report
    }
}

impl Serialize for MultiImageReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, outcome) in &self.entries {
            map.serialize_entry(key, outcome)?;
        }
        map.end()
    }
}
