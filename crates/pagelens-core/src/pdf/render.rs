//! PDF page rasterisation with MuPDF.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, RgbImage};
use mupdf::{Colorspace, Matrix};

/// PDF user space is 72 units per inch
const PDF_BASE_DPI: f32 = 72.0;

/// Render the requested 1-based pages at `dpi`.
///
/// Pages past the end of the document are skipped. Images are RGB without
/// alpha, which is what the model's processor expects.
pub fn render_pages(path: &Path, pages: &[u32], dpi: u32) -> Result<Vec<(u32, DynamicImage)>> {
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow!("PDF path is not valid UTF-8: {}", path.display()))?;
    let doc = mupdf::Document::open(path_str)
        .with_context(|| format!("Failed to open PDF: {}", path.display()))?;
    let total = doc.page_count()? as u32;

    let scale = dpi as f32 / PDF_BASE_DPI;
    let mut rendered = Vec::with_capacity(pages.len());

    for &page_num in pages {
        if page_num == 0 || page_num > total {
            tracing::debug!(page = page_num, total, "Skipping page outside document");
            continue;
        }
        let image = render_one(&doc, page_num, scale)
            .with_context(|| format!("Failed to render page {} of {}", page_num, path.display()))?;
        rendered.push((page_num, image));
    }

    Ok(rendered)
}

/// Render a single 1-based page
pub fn render_page(path: &Path, page: u32, dpi: u32) -> Result<DynamicImage> {
    render_pages(path, &[page], dpi)?
        .pop()
        .map(|(_, image)| image)
        .ok_or_else(|| anyhow!("Page {} is outside {}", page, path.display()))
}

fn render_one(doc: &mupdf::Document, page_num: u32, scale: f32) -> Result<DynamicImage> {
    let page = doc.load_page(page_num as i32 - 1)?;
    let matrix = Matrix::new_scale(scale, scale);
    let colorspace = Colorspace::device_rgb();
    let pixmap = page.to_pixmap(&matrix, &colorspace, false, true)?;
    pixmap_to_rgb(&pixmap)
}

fn pixmap_to_rgb(pixmap: &mupdf::Pixmap) -> Result<DynamicImage> {
    let width = pixmap.width() as u32;
    let height = pixmap.height() as u32;
    let samples = pixmap.samples();
    let n = pixmap.n() as usize;

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height as usize {
        for x in 0..width as usize {
            let offset = (y * width as usize + x) * n;
            let r = samples.get(offset).copied().unwrap_or(0);
            let g = samples.get(offset + 1).copied().unwrap_or(r);
            let b = samples.get(offset + 2).copied().unwrap_or(r);
            rgb.extend_from_slice(&[r, g, b]);
        }
    }

    let buffer = RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| anyhow!("Failed to create image buffer"))?;
    Ok(DynamicImage::ImageRgb8(buffer))
}
