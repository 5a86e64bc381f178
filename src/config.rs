//! Runtime configuration and upload limits

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::job::Upload;

/// Environment variable naming the root directory for job namespaces
pub const TEMP_DIR_ENV: &str = "PDF_PAGES_TEMP_DIR";
/// Environment variable naming the external conversion program
pub const CONVERTER_ENV: &str = "PDF_PAGES_CONVERTER";

const MIB: u64 = 1024 * 1024;

/// Which uploads a request may carry
#[derive(Debug, Clone, PartialEq)]
pub struct UploadPolicy {
    pub pdf_extensions: Vec<String>,
    pub max_pdf_bytes: u64,
    pub max_pdf_files: usize,
    pub image_extensions: Vec<String>,
    pub max_image_bytes: u64,
    pub max_image_files: usize,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self {
            pdf_extensions: vec!["pdf".to_string()],
            max_pdf_bytes: 50 * MIB,
            max_pdf_files: 5,
            image_extensions: ["jpg", "jpeg", "png", "webp"].map(String::from).to_vec(),
            max_image_bytes: 10 * MIB,
            max_image_files: 20,
        }
    }
}

impl UploadPolicy {
    /// Check one PDF upload
    pub fn check_pdf(&self, upload: &Upload) -> Result<()> {
        check_file(upload, &self.pdf_extensions, self.max_pdf_bytes, "PDF")
    }

    /// Check one image upload
    pub fn check_image(&self, upload: &Upload) -> Result<()> {
        check_file(upload, &self.image_extensions, self.max_image_bytes, "image")
    }

    /// Check a batch of PDFs
    pub fn check_pdf_batch(&self, uploads: &[Upload]) -> Result<()> {
        check_count(uploads.len(), self.max_pdf_files, "PDF")?;
        uploads.iter().try_for_each(|upload| self.check_pdf(upload))
    }

    /// Check a batch of images
    pub fn check_image_batch(&self, uploads: &[Upload]) -> Result<()> {
        check_count(uploads.len(), self.max_image_files, "image")?;
        uploads.iter().try_for_each(|upload| self.check_image(upload))
    }
}

fn check_count(count: usize, max: usize, kind: &str) -> Result<()> {
    if count == 0 {
        return Err(Error::Validation(format!("No {kind} uploaded")));
    }
    if count > max {
        return Err(Error::Validation(format!(
            "Too many files: {count} {kind} files uploaded, at most {max} allowed"
        )));
    }
    Ok(())
}

fn check_file(upload: &Upload, extensions: &[String], max_bytes: u64, kind: &str) -> Result<()> {
    let extension = Path::new(&upload.filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if !extensions.iter().any(|allowed| *allowed == extension) {
        return Err(Error::Validation(format!(
            "{}: only {} files are allowed ({})",
            upload.filename,
            kind,
            extensions.iter().map(|e| format!(".{e}")).collect::<Vec<_>>().join(", ")
        )));
    }
    if upload.bytes.len() as u64 > max_bytes {
        return Err(Error::Validation(format!(
            "{}: file exceeds the {} MiB limit",
            upload.filename,
            max_bytes / MIB
        )));
    }
    Ok(())
}

/// Process-wide settings
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory under which each job gets its own namespace
    pub temp_root: PathBuf,
    pub upload: UploadPolicy,
    /// Program implementing the external conversions, if any
    pub converter: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            temp_root: std::env::temp_dir().join("pdf-pages"),
            upload: UploadPolicy::default(),
            converter: None,
        }
    }
}

impl Config {
    /// Defaults overridden by `PDF_PAGES_TEMP_DIR` and `PDF_PAGES_CONVERTER`
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(dir) = std::env::var_os(TEMP_DIR_ENV).filter(|v| !v.is_empty()) {
            config.temp_root = PathBuf::from(dir);
        }
        config.converter = std::env::var_os(CONVERTER_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, size: usize) -> Upload {
        Upload::new(name, vec![0; size])
    }

    #[test]
    fn test_extension_check_is_case_insensitive() {
        let policy = UploadPolicy::default();
        assert!(policy.check_pdf(&upload("Report.PDF", 10)).is_ok());
        assert!(policy.check_image(&upload("photo.JPeG", 10)).is_ok());
        assert!(matches!(policy.check_pdf(&upload("notes.txt", 10)), Err(Error::Validation(_))));
        assert!(matches!(policy.check_image(&upload("no_extension", 10)), Err(Error::Validation(_))));
    }

    #[test]
    fn test_size_limit() {
        let policy = UploadPolicy { max_pdf_bytes: 100, ..Default::default() };
        assert!(policy.check_pdf(&upload("a.pdf", 100)).is_ok());
        let err = policy.check_pdf(&upload("a.pdf", 101)).expect_err("too big");
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn test_batch_limits() {
        let policy = UploadPolicy::default();
        assert!(policy.check_pdf_batch(&[]).is_err());
        let six: Vec<Upload> = (0..6).map(|i| upload(&format!("{i}.pdf"), 1)).collect();
        assert!(policy.check_pdf_batch(&six).is_err());
        assert!(policy.check_pdf_batch(&six[..5]).is_ok());
    }
}
