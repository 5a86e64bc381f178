//! PDF Pages Library
//!
//! A page-composition engine for PDF documents. This library provides
//! functionality to:
//! - Load and save PDFs through its own object model (classic xref tables,
//!   xref streams, object streams)
//! - Copy pages between documents with their full dependency closure
//! - Merge, split, extract and remove pages
//! - Stamp page numbers and text watermarks onto existing pages
//! - Turn JPEG and PNG images into one-page-per-image PDFs
//! - Run each request in its own temporary job namespace
//!
//! # Example
//!
//! ```no_run
//! use pdf_pages::model::Document;
//! use pdf_pages::pdf::{add_page_numbers, merge_documents, NumberingOptions};
//! use std::path::Path;
//!
//! let sources = vec![
//!     Document::load_file(Path::new("1. intro.pdf"))?,
//!     Document::load_file(Path::new("2. advanced.pdf"))?,
//! ];
//!
//! let mut merged = merge_documents(&sources)?;
//! add_page_numbers(&mut merged, &NumberingOptions::default())?;
//! merged.save_to(Path::new("merged.pdf"))?;
//! # Ok::<(), pdf_pages::Error>(())
//! ```

pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod layout;
pub mod model;
pub mod pdf;
pub mod service;

// Re-export commonly used items
pub use config::{Config, UploadPolicy};
pub use error::{Error, Result};
pub use model::{Document, PageHandle};
pub use service::{respond, Payload, Response, Service};
