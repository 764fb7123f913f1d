//! Bounding-box annotations emitted by the text+bbox model.
//!
//! The model writes `![image](image_1.png)x1,y1,x2,y2` with coordinates
//! normalised to `[0, BBOX_COORD_MAX]`. We strip the coordinates, crop each
//! region out of the page, and point the reference at the saved crop.

use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use image::DynamicImage;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Upper bound of normalised model coordinates
pub const BBOX_COORD_MAX: u32 = 1000;

/// One image region reported by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Reference the model used in the Markdown, e.g. `image_1.png`
    pub image_ref: String,
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

/// Pixel rectangle inside an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

fn bbox_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"!\[image\]\(([^)]+)\)\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*(\d+)")
            .expect("static regex")
    })
}

fn image_ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"!\[image\]\(([^)]+)\)").expect("static regex"))
}

/// Strip coordinates from raw model output.
///
/// Returns the cleaned text (references kept, coordinates removed) and the
/// boxes in order of appearance.
pub fn parse_bbox_output(raw: &str) -> (String, Vec<BoundingBox>) {
    let mut boxes = Vec::new();

    let cleaned = bbox_pattern().replace_all(raw, |caps: &regex::Captures| {
        let coord = |i: usize| caps[i].parse::<u32>().unwrap_or(u32::MAX);
        let bbox = BoundingBox {
            image_ref: caps[1].to_string(),
            x1: coord(2),
            y1: coord(3),
            x2: coord(4),
            y2: coord(5),
        };
        tracing::debug!(
            image_ref = %bbox.image_ref,
            "Parsed bbox ({},{},{},{})",
            bbox.x1,
            bbox.y1,
            bbox.x2,
            bbox.y2
        );
        boxes.push(bbox);
        format!("![image]({})", &caps[1])
    });

    (cleaned.into_owned(), boxes)
}

/// Map a normalised box onto an image of `width` x `height` pixels.
///
/// Coordinates are clamped to the image and swapped if reversed. Returns
/// `None` when the region has no area.
pub fn denormalize(bbox: &BoundingBox, width: u32, height: u32) -> Option<PixelRect> {
    let scale = |v: u32, extent: u32| -> u32 {
        let v = v.min(BBOX_COORD_MAX) as u64;
        (v * extent as u64 / BBOX_COORD_MAX as u64) as u32
    };

    let (x1, x2) = (scale(bbox.x1, width), scale(bbox.x2, width));
    let (y1, y2) = (scale(bbox.y1, height), scale(bbox.y2, height));
    let (left, right) = (x1.min(x2), x1.max(x2));
    let (top, bottom) = (y1.min(y2), y1.max(y2));

    if right == left || bottom == top {
        return None;
    }
    Some(PixelRect {
        x: left,
        y: top,
        width: right - left,
        height: bottom - top,
    })
}

/// Crop every box out of `image` and save it as `<prefix>image_<n>.png`.
///
/// Returns the model reference to saved file name mapping and the paths
/// written. Boxes with no area are skipped and keep their original reference.
pub fn crop_regions(
    image: &DynamicImage,
    boxes: &[BoundingBox],
    out_dir: &Path,
    prefix: &str,
) -> Result<(HashMap<String, String>, Vec<std::path::PathBuf>)> {
    let mut mapping = HashMap::new();
    let mut written = Vec::new();

    if boxes.is_empty() {
        return Ok((mapping, written));
    }
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    for (i, bbox) in boxes.iter().enumerate() {
        let Some(rect) = denormalize(bbox, image.width(), image.height()) else {
            tracing::warn!(image_ref = %bbox.image_ref, "Skipping empty image region");
            continue;
        };

        let filename = format!("{}image_{}.png", prefix, i + 1);
        let path = out_dir.join(&filename);
        let saved = image
            .crop_imm(rect.x, rect.y, rect.width, rect.height)
            .save(&path)
            .with_context(|| format!("Failed to save {}", path.display()));
        if let Err(e) = saved {
            // A failed save may leave a truncated file behind
            let _ = std::fs::remove_file(&path);
            discard(&written);
            return Err(e);
        }

        mapping.insert(bbox.image_ref.clone(), filename);
        written.push(path);
    }

    Ok((mapping, written))
}

fn discard(paths: &[std::path::PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove crop {}: {}", path.display(), e);
            }
        }
    }
}

/// Point image references at their saved crops in a single pass
pub fn rewrite_refs(text: &str, mapping: &HashMap<String, String>) -> String {
    if mapping.is_empty() {
        return text.to_string();
    }
    image_ref_pattern()
        .replace_all(text, |caps: &regex::Captures| {
            let target = mapping.get(&caps[1]).map(String::as_str).unwrap_or(&caps[1]);
            format!("![image]({})", target)
        })
        .into_owned()
}
