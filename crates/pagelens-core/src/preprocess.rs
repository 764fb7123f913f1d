//! Turns input files into model-ready RGB images.

use std::path::Path;

use image::DynamicImage;

use crate::input::InputError;

/// Decode an image file and normalise it to RGB8.
pub fn load_image(path: &Path) -> Result<DynamicImage, InputError> {
    if !path.is_file() {
        return Err(InputError::NotFound(path.to_path_buf()));
    }
    let corrupt = |reason: String| InputError::Corrupt {
        path: path.to_path_buf(),
        reason,
    };
    // Sniff the format from content; extensions on scans are often wrong
    let image = image::ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| corrupt(e.to_string()))?
        .decode()
        .map_err(|e| corrupt(e.to_string()))?;
    Ok(to_rgb(image))
}

fn to_rgb(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) => image,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn test_load_image_converts_to_rgb() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("alpha.png");
        RgbaImage::from_pixel(4, 3, Rgba([10, 20, 30, 128]))
            .save(&path)
            .unwrap();

        let image = load_image(&path).unwrap();
        assert!(matches!(image, DynamicImage::ImageRgb8(_)));
        assert_eq!((image.width(), image.height()), (4, 3));
    }

    #[test]
    fn test_load_corrupt_image() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let err = load_image(&path).unwrap_err();
        assert!(matches!(err, InputError::Corrupt { .. }));
    }

    #[test]
    fn test_load_missing_image() {
        let err = load_image(Path::new("/nonexistent/scan.png")).unwrap_err();
        assert!(matches!(err, InputError::NotFound(_)));
    }
}
