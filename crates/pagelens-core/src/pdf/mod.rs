//! PDF handling: page counting, page extraction, and rasterisation.

mod pages;
mod render;

pub use pages::{parse_page_selection, PageSelection};
pub use render::{render_page, render_pages};

use std::path::Path;

use anyhow::{bail, Context, Result};

/// Number of pages in a PDF file
pub fn page_count(path: &Path) -> Result<u32> {
    let doc = lopdf::Document::load(path)
        .with_context(|| format!("Failed to read PDF: {}", path.display()))?;
    Ok(doc.get_pages().len() as u32)
}

/// Build a standalone PDF containing only `page` (1-based) of the source.
///
/// Browsers' PDF viewers then show exactly that page.
pub fn extract_page(path: &Path, page: u32) -> Result<Vec<u8>> {
    let mut doc = lopdf::Document::load(path)
        .with_context(|| format!("Failed to read PDF: {}", path.display()))?;

    let total = doc.get_pages().len() as u32;
    if page == 0 || page > total {
        bail!("Invalid page number {} (document has {} pages)", page, total);
    }

    let others: Vec<u32> = (1..=total).filter(|&p| p != page).collect();
    if !others.is_empty() {
        doc.delete_pages(&others);
        doc.prune_objects();
    }

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).context("Failed to write single-page PDF")?;
    Ok(buffer)
}

#[cfg(test)]
pub(crate) mod test_support {
    use lopdf::{dictionary, Document, Object, Stream};

    /// Create a multi-page PDF with one line of text per page
    pub fn create_multipage_pdf(page_texts: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.4");

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });

        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! {
                "F1" => font_id,
            },
        });

        let mut page_ids = Vec::new();

        for text in page_texts {
            let content = format!(
                "BT /F1 12 Tf 100 700 Td ({}) Tj ET",
                text.replace('\\', "\\\\")
                    .replace('(', "\\(")
                    .replace(')', "\\)")
            );
            let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            page_ids.push(page_id);
        }

        let kids: Vec<Object> = page_ids.iter().map(|&id| id.into()).collect();
        let pages_id = doc.add_object(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(page_texts.len() as i64),
        });

        for page_id in &page_ids {
            if let Ok(Object::Dictionary(ref mut dict)) = doc.get_object_mut(*page_id) {
                dict.set("Parent", pages_id);
            }
        }

        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });

        doc.trailer.set("Root", catalog_id);

        let mut buffer = Vec::new();
        doc.save_to(&mut buffer).unwrap();
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::create_multipage_pdf;
    use super::*;

    #[test]
    fn test_page_count() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pdf_path = temp_dir.path().join("three.pdf");
        std::fs::write(&pdf_path, create_multipage_pdf(&["One", "Two", "Three"])).unwrap();

        assert_eq!(page_count(&pdf_path).unwrap(), 3);
    }

    #[test]
    fn test_page_count_invalid_pdf() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pdf_path = temp_dir.path().join("invalid.pdf");
        std::fs::write(&pdf_path, b"this is not a valid pdf file").unwrap();

        let err = page_count(&pdf_path).unwrap_err();
        assert!(err.to_string().contains("Failed to read PDF"));
    }

    #[test]
    fn test_extract_page() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pdf_path = temp_dir.path().join("multi.pdf");
        std::fs::write(&pdf_path, create_multipage_pdf(&["A", "B", "C"])).unwrap();

        let single = extract_page(&pdf_path, 2).unwrap();
        let doc = lopdf::Document::load_mem(&single).unwrap();
        assert_eq!(doc.get_pages().len(), 1);

        let text = doc.extract_text(&[1]).unwrap_or_default();
        assert!(text.contains('B'), "unexpected page text: {text:?}");
    }

    #[test]
    fn test_extract_page_out_of_range() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pdf_path = temp_dir.path().join("one.pdf");
        std::fs::write(&pdf_path, create_multipage_pdf(&["Only"])).unwrap();

        assert!(extract_page(&pdf_path, 0).is_err());
        assert!(extract_page(&pdf_path, 2).is_err());
        assert!(extract_page(&pdf_path, 1).is_ok());
    }
}
