//! External conversion collaborator
//!
//! Rasterizing, compression, office import, PDF/A, and password handling
//! are delegated to another program. The engine only sees one input file
//! going out and one output blob coming back.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use tracing::{debug, error};

use crate::error::{Error, Result};

/// Conversions handled outside this crate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
    /// Rasterize every page; output is a zip of JPEG files
    PdfToJpg,
    Compress,
    OfficeToPdf,
    PdfToPdfA,
    Protect,
    Unlock,
}

impl ConversionMode {
    pub const ALL: [ConversionMode; 6] = [
        ConversionMode::PdfToJpg,
        ConversionMode::Compress,
        ConversionMode::OfficeToPdf,
        ConversionMode::PdfToPdfA,
        ConversionMode::Protect,
        ConversionMode::Unlock,
    ];

    /// Name passed to the converter program
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversionMode::PdfToJpg => "pdfjpg",
            ConversionMode::Compress => "compress",
            ConversionMode::OfficeToPdf => "officepdf",
            ConversionMode::PdfToPdfA => "pdfa",
            ConversionMode::Protect => "protect",
            ConversionMode::Unlock => "unlock",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ConversionMode::PdfToJpg => "application/zip",
            _ => "application/pdf",
        }
    }

    /// Suggested name of the converted file
    pub fn output_filename(&self) -> &'static str {
        match self {
            ConversionMode::PdfToJpg => "converted.zip",
            _ => "converted.pdf",
        }
    }

    /// Whether the input must be a PDF
    pub fn takes_pdf(&self) -> bool {
        !matches!(self, ConversionMode::OfficeToPdf)
    }
}

impl fmt::Display for ConversionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConversionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        let aliases: &[(&str, ConversionMode)] = &[
            ("pdf-to-jpg", ConversionMode::PdfToJpg),
            ("office-to-pdf", ConversionMode::OfficeToPdf),
            ("pdf-to-pdfa", ConversionMode::PdfToPdfA),
        ];
        ConversionMode::ALL
            .iter()
            .map(|mode| (mode.as_str(), *mode))
            .chain(aliases.iter().copied())
            .find(|(name, _)| *name == wanted)
            .map(|(_, mode)| mode)
            .ok_or_else(|| {
                let known: Vec<&str> = ConversionMode::ALL.iter().map(|m| m.as_str()).collect();
                format!("Unknown conversion '{s}'. Expected one of: {}", known.join(", "))
            })
    }
}

/// One conversion call
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionRequest {
    pub mode: ConversionMode,
    /// Free-form options forwarded to the converter, e.g. `password=...`
    pub options: BTreeMap<String, String>,
}

impl ConversionRequest {
    pub fn new(mode: ConversionMode) -> Self {
        Self { mode, options: BTreeMap::new() }
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }
}

/// A service able to run a conversion
pub trait Converter: Send + Sync {
    /// Convert `input`, using `workdir` for any files, and return the output bytes
    fn convert(&self, input: &Path, request: &ConversionRequest, workdir: &Path) -> Result<Vec<u8>>;
}

/// Converter that runs an external program
///
/// Invoked as `<program> <mode> <input> <output> [key=value...]`; the program
/// must exit successfully and leave the result at `<output>`.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    program: PathBuf,
}

impl CommandConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into() }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl Converter for CommandConverter {
    fn convert(&self, input: &Path, request: &ConversionRequest, workdir: &Path) -> Result<Vec<u8>> {
        let output_path = workdir.join(format!("output-{}", request.mode.output_filename()));

        let mut command = Command::new(&self.program);
        command.arg(request.mode.as_str()).arg(input).arg(&output_path);
        for (key, value) in &request.options {
            command.arg(format!("{key}={value}"));
        }
        debug!(program = %self.program.display(), mode = %request.mode, "running converter");

        let output = command.output().map_err(|err| {
            error!(program = %self.program.display(), error = %err, "failed to start converter");
            Error::ExternalService(format!("failed to start {}: {err}", self.program.display()))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(status = %output.status, stderr = %stderr.trim(), "converter failed");
            return Err(Error::ExternalService(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        std::fs::read(&output_path).map_err(|err| {
            error!(path = %output_path.display(), error = %err, "converter produced no output");
            Error::ExternalService(format!("no output at {}: {err}", output_path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("compress".parse::<ConversionMode>(), Ok(ConversionMode::Compress));
        assert_eq!("PDF-to-JPG".parse::<ConversionMode>(), Ok(ConversionMode::PdfToJpg));
        assert!("ocr".parse::<ConversionMode>().is_err());
        for mode in ConversionMode::ALL {
            assert_eq!(mode.as_str().parse::<ConversionMode>(), Ok(mode));
        }
    }

    #[test]
    fn test_only_raster_output_is_zip() {
        assert_eq!(ConversionMode::PdfToJpg.content_type(), "application/zip");
        assert_eq!(ConversionMode::Unlock.content_type(), "application/pdf");
        assert!(!ConversionMode::OfficeToPdf.takes_pdf());
    }

    #[test]
    fn test_missing_program_is_external_error() {
        let dir = tempfile::tempdir().expect("dir");
        let converter = CommandConverter::new(dir.path().join("no-such-converter"));
        let result = converter.convert(
            &dir.path().join("in.pdf"),
            &ConversionRequest::new(ConversionMode::Compress),
            dir.path(),
        );
        assert!(matches!(result, Err(Error::ExternalService(_))));
    }
}
