use std::io::Write;
use std::sync::Mutex;

use tempfile::{Builder, NamedTempFile};

use shelf_stock::{EngineConfig, MergeMode};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "STOCK_CONFIG",
        "STOCK_CLASSES",
        "STOCK_MERGE_MODE",
        "STOCK_IOU_THRESHOLD",
        "STOCK_CONTAINMENT_THRESHOLD",
        "STOCK_MIN_DEPTH_DIFF",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = EngineConfig::load().expect("load defaults");
    assert_eq!(
        cfg.classes,
        vec!["potato section", "onion", "eggplant section", "tomato", "cucumber"]
    );
    assert_eq!(cfg.suppression.suppressor.iou_threshold, 0.5);
    assert_eq!(cfg.suppression.suppressor.containment_threshold, 0.9);
    assert_eq!(cfg.reconcile.iou_threshold, 0.15);
    assert_eq!(cfg.reconcile.center_rel_tolerance, 0.20);
    assert_eq!(cfg.reconcile.source_threshold, 0.4);
    assert_eq!(cfg.reconcile.merge_mode, MergeMode::Union);
    assert_eq!(cfg.occupancy.min_depth_diff, 0.01);
    assert_eq!(cfg.occupancy.min_fullness_pixels, 50);
    assert_eq!(cfg.classification.low, 0.30);
    assert_eq!(cfg.classification.overstock, 0.80);
    assert!(cfg.refine_empty_sections);
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "classes": ["onion", "tomato"],
        "refine_empty_sections": false,
        "suppression": { "iou_threshold": 0.6, "score_threshold": 0.25 },
        "reconcile": { "merge_mode": "union", "dilate_kernel": 5 },
        "occupancy": { "min_object_pixels": 120 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("STOCK_CONFIG", file.path());
    std::env::set_var("STOCK_MERGE_MODE", "overwrite");
    std::env::set_var("STOCK_MIN_DEPTH_DIFF", "0.05");

    let cfg = EngineConfig::load().expect("load config");
    assert_eq!(cfg.classes, vec!["onion", "tomato"]);
    assert!(!cfg.refine_empty_sections);
    assert_eq!(cfg.suppression.suppressor.iou_threshold, 0.6);
    assert_eq!(cfg.suppression.suppressor.containment_threshold, 0.9);
    assert_eq!(cfg.suppression.score_threshold, 0.25);
    assert_eq!(cfg.reconcile.merge_mode, MergeMode::Overwrite);
    assert_eq!(cfg.reconcile.dilate_kernel, 5);
    assert_eq!(cfg.reconcile.close_kernel, 3);
    assert_eq!(cfg.occupancy.min_object_pixels, 120);
    assert_eq!(cfg.occupancy.min_depth_diff, 0.05);

    clear_env();
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
classes = ["cucumber"]

[classification]
low_threshold = 0.2
overstock_threshold = 0.9
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    // `load_from` ignores the environment.
    std::env::set_var("STOCK_CLASSES", "onion");
    let cfg = EngineConfig::load_from(file.path()).expect("load config");
    assert_eq!(cfg.classes, vec!["cucumber"]);
    assert_eq!(cfg.classification.low, 0.2);
    assert_eq!(cfg.classification.overstock, 0.9);

    clear_env();
}

#[test]
fn env_class_list_is_comma_separated() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("STOCK_CLASSES", " onion , ,tomato ");
    let cfg = EngineConfig::load().expect("load config");
    assert_eq!(cfg.classes, vec!["onion", "tomato"]);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("STOCK_IOU_THRESHOLD", "1.7");
    assert!(EngineConfig::load().is_err());
    clear_env();

    std::env::set_var("STOCK_MERGE_MODE", "average");
    assert!(EngineConfig::load().is_err());
    clear_env();

    std::env::set_var("STOCK_CONTAINMENT_THRESHOLD", "high");
    assert!(EngineConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "classes": [] }"#).expect("write config");
    std::env::set_var("STOCK_CONFIG", file.path());
    assert!(EngineConfig::load().is_err());

    clear_env();
}
