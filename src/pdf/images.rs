//! Raster images to PDF, one A4 page per image

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::layout::PageDimensions;
use crate::model::raster::{add_image_page, decode_image};
use crate::model::Document;

/// Lay out each image on its own page, fitted and centered on an A4 canvas
///
/// Images in an unsupported format are skipped with a warning. The batch
/// fails only when nothing could be placed.
pub fn images_to_pdf<B: AsRef<[u8]>>(images: &[B]) -> Result<Document> {
    if images.is_empty() {
        return Err(Error::Validation("No images provided".to_string()));
    }

    let mut doc = Document::new();
    let mut skipped = 0;
    for (index, bytes) in images.iter().enumerate() {
        let Some(image) = decode_image(bytes.as_ref())? else {
            warn!(index, "skipping unsupported image");
            skipped += 1;
            continue;
        };
        add_image_page(&mut doc, &image, PageDimensions::a4())?;
    }

    if doc.page_count() == 0 {
        return Err(Error::Validation("None of the uploaded images could be converted".to_string()));
    }
    info!(pages = doc.page_count(), skipped, "converted images");
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_images() {
        let empty: [Vec<u8>; 0] = [];
        assert!(matches!(images_to_pdf(&empty), Err(Error::Validation(_))));
    }

    #[test]
    fn test_all_skipped_is_an_error() {
        let result = images_to_pdf(&[b"RIFF\0\0\0\0WEBPVP8 ".to_vec()]);
        assert!(matches!(result, Err(Error::Validation(_))));
    }
}
