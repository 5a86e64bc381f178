//! Document operations built on the page copier and content composer

pub mod images;
pub mod merge;
pub mod metadata;
pub mod overlay;
pub mod select;

// Re-export commonly used items
pub use images::images_to_pdf;
pub use merge::{merge_documents, merge_pdfs};
pub use metadata::{extract_metadata, inspect, PdfMetadata};
pub use overlay::{add_page_numbers, add_watermark, NumberingOptions, WatermarkOptions};
pub use select::{extract, parse_page_list, remove, split, validate_pages, validate_range};
