//! PDF metadata extraction

use std::path::Path;

use crate::error::{Error, Result};
use crate::layout::PageDimensions;
use crate::model::Document;

/// PDF metadata
#[derive(Debug, Clone, PartialEq)]
pub struct PdfMetadata {
    /// Header version, e.g. "1.7"
    pub version: String,
    /// Number of pages in the PDF
    pub page_count: usize,
    /// Document title (if present)
    pub title: Option<String>,
    /// Document author (if present)
    pub author: Option<String>,
    /// MediaBox size of each page, in page order
    pub page_sizes: Vec<PageDimensions>,
}

/// Read metadata from a loaded document
pub fn inspect(doc: &Document) -> Result<PdfMetadata> {
    let page_sizes = doc
        .pages()
        .iter()
        .map(|page| {
            doc.media_box(*page).map(|rect| PageDimensions {
                width: rect.width(),
                height: rect.height(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(PdfMetadata {
        version: doc.version().to_string(),
        page_count: doc.page_count(),
        title: doc.info_string(b"Title").filter(|s| !s.is_empty()),
        author: doc.info_string(b"Author").filter(|s| !s.is_empty()),
        page_sizes,
    })
}

/// Extract metadata from a PDF file
pub fn extract_metadata(path: &Path) -> Result<PdfMetadata> {
    if !path.exists() {
        return Err(Error::FileNotFound(path.to_path_buf()));
    }
    inspect(&Document::load_file(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_metadata_nonexistent_file() {
        let result = extract_metadata(Path::new("nonexistent.pdf"));
        assert!(matches!(result, Err(Error::FileNotFound(_))));
    }

    #[test]
    fn test_inspect_new_document() {
        let metadata = inspect(&Document::new()).expect("inspect");
        assert_eq!(metadata.version, "1.7");
        assert_eq!(metadata.page_count, 0);
        assert_eq!(metadata.title, None);
    }
}
