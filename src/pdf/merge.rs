//! Merging documents page by page

use tracing::info;

use crate::error::{Error, Result};
use crate::model::{Document, PageCopier};

/// Concatenate the pages of `sources` into a new document
///
/// Each source gets its own dedupe table: a resource shared by two pages of
/// one source is copied once, but equal resources from different sources
/// are never merged into one object.
pub fn merge_documents(sources: &[Document]) -> Result<Document> {
    if sources.is_empty() {
        return Err(Error::Validation("No PDF files provided".to_string()));
    }

    let mut merged = Document::new();
    for source in sources {
        PageCopier::new(source).copy_all(&mut merged)?;
    }
    if merged.page_count() == 0 {
        return Err(Error::Validation("The uploaded PDFs contain no pages".to_string()));
    }

    info!(sources = sources.len(), pages = merged.page_count(), "merged documents");
    Ok(merged)
}

/// Merge PDF byte buffers in order
pub fn merge_pdfs(inputs: &[Vec<u8>]) -> Result<Vec<u8>> {
    let sources = inputs
        .iter()
        .map(|bytes| Document::load(bytes.as_slice()))
        .collect::<Result<Vec<_>>>()?;
    merge_documents(&sources)?.save()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_nothing_is_rejected() {
        assert!(matches!(merge_documents(&[]), Err(Error::Validation(_))));
        assert!(matches!(merge_pdfs(&[]), Err(Error::Validation(_))));
    }
}
