//! Error types for the PDF page engine

use std::path::PathBuf;
use thiserror::Error;

use crate::model::ObjectId;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the PDF page engine
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or malformed request fields
    #[error("{0}")]
    Validation(String),

    /// Source PDF could not be parsed
    #[error("Failed to parse PDF: {0}")]
    Parse(#[from] ParseError),

    /// Requested page indices fall outside the document
    #[error("{0}")]
    InvalidRange(#[from] RangeError),

    /// The selection would leave a document with no pages
    #[error("Cannot remove all {page_count} pages: at least one page must remain")]
    EmptySelection { page_count: usize },

    /// Internal 0-based page index outside the document
    #[error("Page index {index} out of range for document with {page_count} pages")]
    PageOutOfRange { index: usize, page_count: usize },

    /// Object lookup failed
    #[error("Object {0} is not present in the document")]
    MissingObject(ObjectId),

    /// Indirect reference that cannot be followed
    #[error("Reference {0} cannot be resolved")]
    UnresolvedReference(ObjectId),

    /// Internal invariant violation while writing a document
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Failure reported by the external conversion service
    #[error("Conversion service failed: {0}")]
    ExternalService(String),

    /// Raster image decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File not found
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),
}

/// Structural failures while loading a PDF
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("missing or malformed %PDF header")]
    MalformedHeader,

    #[error("unsupported PDF version {0}")]
    UnsupportedVersion(String),

    #[error("no trailer or startxref found")]
    MissingTrailer,

    #[error("corrupt cross-reference data: {0}")]
    CorruptXref(String),

    #[error("malformed object at byte {offset}: {detail}")]
    MalformedObject { offset: usize, detail: String },

    #[error("trailer does not name a document catalog with a page tree")]
    MissingCatalog,

    #[error("corrupt page tree: {0}")]
    CorruptPageTree(String),

    #[error("encrypted documents are not supported")]
    Encrypted,
}

/// Page selection errors, reported with the valid bound
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RangeError {
    #[error("Invalid range: page {page} requested but PDF has {page_count} pages. Pages must be between 1 and {page_count}.")]
    OutOfBounds { page: i64, page_count: usize },

    #[error("Start page cannot be greater than end page ({start} > {end}).")]
    StartAfterEnd { start: usize, end: usize },
}

impl Error {
    /// HTTP-style status for this error: 400 for caller problems, 500 otherwise
    pub fn status(&self) -> u16 {
        match self {
            Error::Validation(_)
            | Error::Parse(_)
            | Error::InvalidRange(_)
            | Error::EmptySelection { .. }
            | Error::MissingObject(_)
            | Error::UnresolvedReference(_)
            | Error::Image(_)
            | Error::FileNotFound(_) => 400,
            Error::PageOutOfRange { .. }
            | Error::Serialization(_)
            | Error::ExternalService(_)
            | Error::Io(_) => 500,
        }
    }

    /// Message safe to hand back to a caller
    ///
    /// Internal failures collapse to a generic message; their detail
    /// belongs in the log, not the response.
    pub fn public_message(&self) -> String {
        match self.status() {
            400 => match self {
                Error::MissingObject(_) | Error::UnresolvedReference(_) => {
                    "Failed to parse PDF: the document references missing objects".to_string()
                }
                _ => self.to_string(),
            },
            _ => match self {
                Error::ExternalService(_) => "Conversion service is unavailable".to_string(),
                _ => "Internal error while processing the document".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_message_names_bound() {
        let err = Error::from(RangeError::OutOfBounds { page: 11, page_count: 10 });
        assert!(err.to_string().contains("between 1 and 10"));
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_internal_errors_are_generic() {
        let err = Error::Serialization("dangling 4 0 R".to_string());
        assert_eq!(err.status(), 500);
        assert!(!err.public_message().contains("4 0 R"));
    }

    #[test]
    fn test_unresolved_reference_hides_identifier() {
        let err = Error::UnresolvedReference(ObjectId::new(12, 0));
        assert_eq!(err.status(), 400);
        assert!(!err.public_message().contains("12 0 R"));
    }
}
