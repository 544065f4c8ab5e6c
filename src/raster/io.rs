//! Loading rasters from grayscale image files (feature `image-io`).

use std::path::Path;

use anyhow::{Context, Result};

use super::{DepthMap, SoftMask};

/// Loads a segmentation score map; luma 0..=255 maps to 0.0..=1.0.
pub fn load_soft_mask(path: &Path) -> Result<SoftMask> {
    let img = image::open(path)
        .with_context(|| format!("decode mask image {}", path.display()))?
        .into_luma8();
    let (w, h) = img.dimensions();
    let values = img.pixels().map(|p| p.0[0] as f32 / 255.0).collect();
    Ok(SoftMask::from_values(w as usize, h as usize, values)?)
}

/// Loads a raw depth image (8 or 16 bit luma) and normalizes it per image.
pub fn load_depth_map(path: &Path) -> Result<DepthMap> {
    let img = image::open(path)
        .with_context(|| format!("decode depth image {}", path.display()))?
        .into_luma16();
    let (w, h) = img.dimensions();
    let raw = img.pixels().map(|p| p.0[0] as f32).collect();
    Ok(DepthMap::normalized(w as usize, h as usize, raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_gray_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mask.png");
        let img = image::GrayImage::from_fn(4, 2, |x, _| image::Luma([if x < 2 { 255 } else { 0 }]));
        img.save(&path).unwrap();

        let mask = load_soft_mask(&path).unwrap();
        assert_eq!(mask.dims(), (4, 2));
        assert_eq!(mask.binarize(0.5).count(), 4);

        let depth = load_depth_map(&path).unwrap();
        assert_eq!(depth.get(0, 0), 1.0);
        assert_eq!(depth.get(3, 1), 0.0);
    }
}
