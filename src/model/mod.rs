//! PDF object model and page-composition engine

pub mod content;
pub mod copier;
pub mod document;
pub mod filter;
pub mod lexer;
pub mod object;
pub mod raster;
pub mod store;
pub mod writer;
pub mod xref;

pub use copier::{copy_page, DedupeTable, PageCopier};
pub use document::{Document, DocumentState, PageHandle};
pub use object::{Dictionary, Object, ObjectId, Stream, StringFormat};
pub use store::ObjectStore;
