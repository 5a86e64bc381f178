//! Request-scoped job context
//!
//! Every request gets its own directory under the configured temp root.
//! The directory and everything staged in it is removed when the context is
//! dropped, whichever way the request ends.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// One uploaded file as handed over by the upload boundary
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    /// Build an upload, guessing the content type from the file name
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        let filename = filename.into();
        let content_type = content_type_for(&filename).to_string();
        Self { filename, content_type, bytes }
    }

    /// Read an upload from disk
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::FileNotFound(path.to_path_buf()));
        }
        let bytes = fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self::new(filename, bytes))
    }

    fn extension(&self) -> Option<String> {
        Path::new(&self.filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
    }
}

fn content_type_for(filename: &str) -> &'static str {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Isolated working namespace of one request
#[derive(Debug)]
pub struct JobContext {
    id: String,
    path: PathBuf,
    dir: Option<TempDir>,
}

impl JobContext {
    /// Allocate a fresh `job-<timestamp>-<random>` directory under `root`
    pub fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%3fZ");
        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{stamp}-"))
            .tempdir_in(root)?;
        let path = dir.path().to_path_buf();
        let id = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!(job = %id, "created job namespace");
        Ok(Self { id, path, dir: Some(dir) })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write an upload into the namespace under a collision-free name
    pub fn stage(&self, upload: &Upload) -> Result<PathBuf> {
        let suffix = upload.extension().map(|e| format!(".{e}")).unwrap_or_default();
        let mut file = tempfile::Builder::new()
            .prefix("upload-")
            .suffix(&suffix)
            .tempfile_in(&self.path)?;
        file.write_all(&upload.bytes)?;
        let (_, path) = file.keep().map_err(|err| err.error)?;
        debug!(job = %self.id, file = %upload.filename, staged = %path.display(), "staged upload");
        Ok(path)
    }

    /// Remove the namespace now, reporting failures
    pub fn close(mut self) -> Result<()> {
        match self.dir.take() {
            Some(dir) => Ok(dir.close()?),
            None => Ok(()),
        }
    }
}

impl Drop for JobContext {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(err) = dir.close() {
                warn!(job = %self.id, error = %err, "failed to remove job namespace");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_removed_on_drop() {
        let root = TempDir::new().expect("root");
        let path = {
            let job = JobContext::create(root.path()).expect("job");
            assert!(job.id().starts_with("job-"));
            let staged = job.stage(&Upload::new("a.pdf", b"%PDF-".to_vec())).expect("stage");
            assert!(staged.starts_with(job.path()));
            assert_eq!(staged.extension().and_then(|e| e.to_str()), Some("pdf"));
            job.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_two_jobs_never_share_a_directory() {
        let root = TempDir::new().expect("root");
        let first = JobContext::create(root.path()).expect("first");
        let second = JobContext::create(root.path()).expect("second");
        assert_ne!(first.path(), second.path());
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_staging_same_name_twice() {
        let root = TempDir::new().expect("root");
        let job = JobContext::create(root.path()).expect("job");
        let upload = Upload::new("same.png", vec![1, 2, 3]);
        let a = job.stage(&upload).expect("a");
        let b = job.stage(&upload).expect("b");
        assert_ne!(a, b);
        assert_eq!(fs::read(&b).expect("read"), vec![1, 2, 3]);
        job.close().expect("close");
    }

    #[test]
    fn test_content_type_guess() {
        assert_eq!(Upload::new("x.PDF", Vec::new()).content_type, "application/pdf");
        assert_eq!(Upload::new("x.jpeg", Vec::new()).content_type, "image/jpeg");
        assert_eq!(Upload::new("x", Vec::new()).content_type, "application/octet-stream");
    }
}
