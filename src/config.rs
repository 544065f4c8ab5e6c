use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::detect::BoxSuppressor;
use crate::occupancy::OccupancyParams;
use crate::reconcile::{MergeMode, ReconcileParams};
use crate::report::StockThresholds;

const DEFAULT_CLASSES: [&str; 5] = ["potato section", "onion", "eggplant section", "tomato", "cucumber"];
const DEFAULT_SCORE_THRESHOLD: f32 = 0.0;
const MAX_KERNEL: usize = 31;

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    classes: Option<Vec<String>>,
    refine_empty_sections: Option<bool>,
    suppression: Option<SuppressionConfigFile>,
    reconcile: Option<ReconcileConfigFile>,
    occupancy: Option<OccupancyConfigFile>,
    classification: Option<ClassificationConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SuppressionConfigFile {
    iou_threshold: Option<f32>,
    containment_threshold: Option<f32>,
    score_threshold: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct ReconcileConfigFile {
    iou_threshold: Option<f32>,
    center_rel_tolerance: Option<f32>,
    source_threshold: Option<f32>,
    merge_mode: Option<MergeMode>,
    dilate_kernel: Option<usize>,
    close_kernel: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct OccupancyConfigFile {
    min_depth_diff: Option<f32>,
    min_object_pixels: Option<usize>,
    min_fullness_pixels: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassificationConfigFile {
    low_threshold: Option<f64>,
    overstock_threshold: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Product classes queried from the detector, in report grouping order.
    pub classes: Vec<String>,
    /// Send 0% sections to the refinement service when one is configured.
    pub refine_empty_sections: bool,
    pub suppression: SuppressionSettings,
    pub reconcile: ReconcileParams,
    pub occupancy: OccupancyParams,
    pub classification: StockThresholds,
}

#[derive(Debug, Clone, Copy)]
pub struct SuppressionSettings {
    pub suppressor: BoxSuppressor,
    /// Detections scoring below this are dropped before suppression.
    pub score_threshold: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            classes: DEFAULT_CLASSES.iter().map(|c| c.to_string()).collect(),
            refine_empty_sections: true,
            suppression: SuppressionSettings {
                suppressor: BoxSuppressor::default(),
                score_threshold: DEFAULT_SCORE_THRESHOLD,
            },
            reconcile: ReconcileParams::default(),
            occupancy: OccupancyParams::default(),
            classification: StockThresholds::default(),
        }
    }
}

impl EngineConfig {
    /// Loads `STOCK_CONFIG` (if set), then applies `STOCK_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("STOCK_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads one file without consulting the environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Self {
        let defaults = Self::default();
        let suppression = file.suppression.unwrap_or_default();
        let reconcile = file.reconcile.unwrap_or_default();
        let occupancy = file.occupancy.unwrap_or_default();
        let classification = file.classification.unwrap_or_default();

        Self {
            classes: file.classes.unwrap_or(defaults.classes),
            refine_empty_sections: file
                .refine_empty_sections
                .unwrap_or(defaults.refine_empty_sections),
            suppression: SuppressionSettings {
                suppressor: BoxSuppressor::new(
                    suppression
                        .iou_threshold
                        .unwrap_or(defaults.suppression.suppressor.iou_threshold),
                    suppression
                        .containment_threshold
                        .unwrap_or(defaults.suppression.suppressor.containment_threshold),
                ),
                score_threshold: suppression
                    .score_threshold
                    .unwrap_or(defaults.suppression.score_threshold),
            },
            reconcile: ReconcileParams {
                iou_threshold: reconcile
                    .iou_threshold
                    .unwrap_or(defaults.reconcile.iou_threshold),
                center_rel_tolerance: reconcile
                    .center_rel_tolerance
                    .unwrap_or(defaults.reconcile.center_rel_tolerance),
                source_threshold: reconcile
                    .source_threshold
                    .unwrap_or(defaults.reconcile.source_threshold),
                merge_mode: reconcile.merge_mode.unwrap_or(defaults.reconcile.merge_mode),
                dilate_kernel: reconcile
                    .dilate_kernel
                    .unwrap_or(defaults.reconcile.dilate_kernel),
                close_kernel: reconcile
                    .close_kernel
                    .unwrap_or(defaults.reconcile.close_kernel),
            },
            occupancy: OccupancyParams {
                min_depth_diff: occupancy
                    .min_depth_diff
                    .unwrap_or(defaults.occupancy.min_depth_diff),
                min_object_pixels: occupancy
                    .min_object_pixels
                    .unwrap_or(defaults.occupancy.min_object_pixels),
                min_fullness_pixels: occupancy
                    .min_fullness_pixels
                    .unwrap_or(defaults.occupancy.min_fullness_pixels),
            },
            classification: StockThresholds {
                low: classification
                    .low_threshold
                    .unwrap_or(defaults.classification.low),
                overstock: classification
                    .overstock_threshold
                    .unwrap_or(defaults.classification.overstock),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(classes) = std::env::var("STOCK_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.classes = parsed;
            }
        }
        if let Ok(mode) = std::env::var("STOCK_MERGE_MODE") {
            if !mode.trim().is_empty() {
                self.reconcile.merge_mode = mode.parse()?;
            }
        }
        if let Some(v) = env_f32("STOCK_IOU_THRESHOLD")? {
            self.suppression.suppressor.iou_threshold = v;
        }
        if let Some(v) = env_f32("STOCK_CONTAINMENT_THRESHOLD")? {
            self.suppression.suppressor.containment_threshold = v;
        }
        if let Some(v) = env_f32("STOCK_MIN_DEPTH_DIFF")? {
            self.occupancy.min_depth_diff = v;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        self.classes = self
            .classes
            .iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if self.classes.is_empty() {
            return Err(anyhow!("at least one product class must be configured"));
        }

        let unit = [
            ("suppression.iou_threshold", self.suppression.suppressor.iou_threshold),
            (
                "suppression.containment_threshold",
                self.suppression.suppressor.containment_threshold,
            ),
            ("suppression.score_threshold", self.suppression.score_threshold),
            ("reconcile.iou_threshold", self.reconcile.iou_threshold),
            ("reconcile.source_threshold", self.reconcile.source_threshold),
            ("occupancy.min_depth_diff", self.occupancy.min_depth_diff),
        ];
        for (name, value) in unit {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if !(self.reconcile.center_rel_tolerance >= 0.0) {
            return Err(anyhow!("reconcile.center_rel_tolerance must be >= 0"));
        }
        for (name, kernel) in [
            ("reconcile.dilate_kernel", self.reconcile.dilate_kernel),
            ("reconcile.close_kernel", self.reconcile.close_kernel),
        ] {
            if kernel > MAX_KERNEL {
                return Err(anyhow!("{} must be <= {}, got {}", name, MAX_KERNEL, kernel));
            }
        }

        let t = self.classification;
        if !(0.0..=1.0).contains(&t.low) || !(0.0..=1.0).contains(&t.overstock) || t.low >= t.overstock {
            return Err(anyhow!(
                "classification thresholds must satisfy 0 <= low < overstock <= 1 (low={}, overstock={})",
                t.low,
                t.overstock
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_f32(key: &str) -> Result<Option<f32>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<f32>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a number", key)),
        _ => Ok(None),
    }
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.classes.len(), 5);
        assert_eq!(cfg.reconcile.merge_mode, MergeMode::Union);
        assert_eq!(cfg.occupancy.min_object_pixels, 200);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file: EngineConfigFile = toml::from_str(
            r#"
            classes = ["onion"]
            [reconcile]
            merge_mode = "overwrite"
            "#,
        )
        .unwrap();
        let cfg = EngineConfig::from_file(file);
        assert_eq!(cfg.classes, vec!["onion"]);
        assert_eq!(cfg.reconcile.merge_mode, MergeMode::Overwrite);
        assert_eq!(cfg.reconcile.dilate_kernel, 3);
        assert_eq!(cfg.suppression.suppressor.iou_threshold, 0.5);
    }

    #[test]
    fn rejects_inverted_classification_thresholds() {
        let mut cfg = EngineConfig::default();
        cfg.classification = StockThresholds {
            low: 0.9,
            overstock: 0.3,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut cfg = EngineConfig::default();
        cfg.suppression.suppressor.containment_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn blank_classes_are_dropped() {
        let mut cfg = EngineConfig::default();
        cfg.classes = vec![" onion ".into(), "".into()];
        cfg.validate().unwrap();
        assert_eq!(cfg.classes, vec!["onion"]);
    }
}
