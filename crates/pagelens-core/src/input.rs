//! Input validation and discovery.
//!
//! Everything a user hands us (CLI arguments, dropped files, uploads) passes
//! through here before a model is ever touched.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Image extensions the model's processor accepts (lowercase, without dot)
pub const SUPPORTED_IMAGE_EXTENSIONS: &[&str] =
    &["png", "jpg", "jpeg", "webp", "bmp", "tiff", "tif", "gif"];

/// PDF extension
pub const SUPPORTED_PDF_EXTENSION: &str = "pdf";

/// Errors raised while validating user input
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("Path is not a file: {0}")]
    NotAFile(PathBuf),
    #[error("Unsupported file format: {extension}. Supported formats: {}", supported_list())]
    Unsupported { path: PathBuf, extension: String },
    #[error("Invalid or corrupted file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Kind of input document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Image,
    Pdf,
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileKind::Image => write!(f, "image"),
            FileKind::Pdf => write!(f, "pdf"),
        }
    }
}

fn supported_list() -> String {
    let mut all: Vec<String> = SUPPORTED_IMAGE_EXTENSIONS
        .iter()
        .chain(std::iter::once(&SUPPORTED_PDF_EXTENSION))
        .map(|ext| format!(".{}", ext))
        .collect();
    all.sort();
    all.join(", ")
}

fn extension_of(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default()
}

/// Classify a path by extension. Returns `None` for unsupported files.
pub fn file_kind(path: &Path) -> Option<FileKind> {
    let ext = extension_of(path);
    if ext == SUPPORTED_PDF_EXTENSION {
        Some(FileKind::Pdf)
    } else if SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(FileKind::Image)
    } else {
        None
    }
}

/// Whether a file name has a supported extension
pub fn is_supported(path: &Path) -> bool {
    file_kind(path).is_some()
}

/// Strip whitespace and surrounding quotes left behind by drag-and-drop
/// or shell copy/paste.
pub fn normalize_path(raw: &str) -> PathBuf {
    let trimmed = raw.trim().trim_matches('"').trim_matches('\'');
    PathBuf::from(trimmed)
}

/// Check that a file exists and has a supported format.
pub fn validate_input_file(path: &Path) -> Result<FileKind, InputError> {
    if !path.exists() {
        return Err(InputError::NotFound(path.to_path_buf()));
    }
    if !path.is_file() {
        return Err(InputError::NotAFile(path.to_path_buf()));
    }
    file_kind(path).ok_or_else(|| InputError::Unsupported {
        path: path.to_path_buf(),
        extension: match extension_of(path) {
            ext if ext.is_empty() => "(none)".to_string(),
            ext => format!(".{}", ext),
        },
    })
}

/// All supported files in a directory, sorted by path.
pub fn supported_files_in_dir(dir: &Path, recursive: bool) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        for entry in std::fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                if recursive {
                    pending.push(path);
                }
            } else if is_supported(&path) {
                files.push(path);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Result of expanding user-supplied paths
#[derive(Debug, Default)]
pub struct CollectedInputs {
    /// Valid, supported files in argument order
    pub files: Vec<PathBuf>,
    /// Arguments that were skipped and why
    pub rejected: Vec<(PathBuf, InputError)>,
}

/// Expand CLI-style arguments: files are validated, directories expand to
/// their supported files, anything else is rejected.
pub fn collect_inputs<S: AsRef<str>>(args: &[S]) -> CollectedInputs {
    let mut collected = CollectedInputs::default();

    for arg in args {
        let path = normalize_path(arg.as_ref());

        if path.is_dir() {
            match supported_files_in_dir(&path, false) {
                Ok(files) => {
                    tracing::debug!("Expanded {:?} to {} file(s)", path, files.len());
                    collected.files.extend(files);
                }
                Err(e) => {
                    tracing::warn!("Cannot read directory {:?}: {}", path, e);
                    collected
                        .rejected
                        .push((path.clone(), InputError::NotFound(path)));
                }
            }
            continue;
        }

        match validate_input_file(&path) {
            Ok(_) => collected.files.push(path),
            Err(e) => {
                tracing::warn!("Skipping {:?}: {}", path, e);
                collected.rejected.push((path, e));
            }
        }
    }

    collected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_kind_is_case_insensitive() {
        assert_eq!(file_kind(Path::new("scan.PNG")), Some(FileKind::Image));
        assert_eq!(file_kind(Path::new("a/b/report.Pdf")), Some(FileKind::Pdf));
        assert_eq!(file_kind(Path::new("photo.tif")), Some(FileKind::Image));
        assert_eq!(file_kind(Path::new("notes.txt")), None);
        assert_eq!(file_kind(Path::new("README")), None);
    }

    #[test]
    fn test_normalize_path_strips_quotes() {
        assert_eq!(normalize_path("  \"/tmp/a b.png\" "), PathBuf::from("/tmp/a b.png"));
        assert_eq!(normalize_path("'scan.pdf'"), PathBuf::from("scan.pdf"));
    }

    #[test]
    fn test_validate_input_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let image = temp_dir.path().join("page.jpg");
        let text = temp_dir.path().join("page.txt");
        std::fs::write(&image, b"x").unwrap();
        std::fs::write(&text, b"x").unwrap();

        assert_eq!(validate_input_file(&image).unwrap(), FileKind::Image);

        let err = validate_input_file(&text).unwrap_err();
        assert!(matches!(err, InputError::Unsupported { .. }));
        assert!(err.to_string().contains(".txt"));
        assert!(err.to_string().contains(".pdf"));

        let missing = validate_input_file(&temp_dir.path().join("gone.png")).unwrap_err();
        assert!(matches!(missing, InputError::NotFound(_)));

        let dir = validate_input_file(temp_dir.path()).unwrap_err();
        assert!(matches!(dir, InputError::NotAFile(_)));
    }

    #[test]
    fn test_supported_files_in_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let nested = temp_dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        for name in ["b.pdf", "a.png", "skip.docx"] {
            std::fs::write(temp_dir.path().join(name), b"x").unwrap();
        }
        std::fs::write(nested.join("c.jpeg"), b"x").unwrap();

        let flat = supported_files_in_dir(temp_dir.path(), false).unwrap();
        let names: Vec<_> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.png", "b.pdf"]);

        let deep = supported_files_in_dir(temp_dir.path(), true).unwrap();
        assert_eq!(deep.len(), 3);
    }

    #[test]
    fn test_collect_inputs_mixes_files_and_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("scans");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("one.png"), b"x").unwrap();
        std::fs::write(dir.join("two.webp"), b"x").unwrap();
        let pdf = temp_dir.path().join("doc.pdf");
        let bad = temp_dir.path().join("sheet.xlsx");
        std::fs::write(&pdf, b"x").unwrap();
        std::fs::write(&bad, b"x").unwrap();

        let args = vec![
            pdf.to_string_lossy().to_string(),
            dir.to_string_lossy().to_string(),
            bad.to_string_lossy().to_string(),
            temp_dir.path().join("missing.png").to_string_lossy().to_string(),
        ];
        let collected = collect_inputs(&args);

        assert_eq!(collected.files.len(), 3);
        assert_eq!(collected.files[0], pdf);
        assert_eq!(collected.rejected.len(), 2);
    }
}
