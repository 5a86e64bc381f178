//! Request handlers
//!
//! Each handler validates its uploads against the [`UploadPolicy`], stages
//! them in a fresh [`JobContext`], runs one operation, and hands back a
//! single [`Payload`]. The job namespace is gone by the time a handler
//! returns, on success and on every error path.
//!
//! [`UploadPolicy`]: crate::config::UploadPolicy

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::convert::{CommandConverter, ConversionMode, ConversionRequest, Converter};
use crate::error::{Error, Result};
use crate::job::{JobContext, Upload};
use crate::layout::Position;
use crate::model::Document;
use crate::pdf::{
    add_page_numbers, add_watermark, extract, images_to_pdf, merge_documents, parse_page_list,
    remove, split, NumberingOptions, WatermarkOptions,
};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// A produced file
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Suggested download name
    pub filename: String,
}

impl Payload {
    pub fn pdf(bytes: Vec<u8>, filename: &str) -> Self {
        Self { bytes, content_type: PDF_CONTENT_TYPE.to_string(), filename: filename.to_string() }
    }
}

/// JSON body of every rejected request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

/// What goes back to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Payload(Payload),
    Error { status: u16, body: ErrorBody },
}

impl Response {
    pub fn status(&self) -> u16 {
        match self {
            Response::Payload(_) => 200,
            Response::Error { status, .. } => *status,
        }
    }

    /// Serialized error body, if this is an error
    pub fn error_json(&self) -> Option<String> {
        match self {
            Response::Payload(_) => None,
            Response::Error { body, .. } => {
                Some(serde_json::to_string(body).unwrap_or_else(|_| r#"{"error":"Internal error"}"#.to_string()))
            }
        }
    }
}

/// Map an operation result to a response, logging internal detail
pub fn respond(result: Result<Payload>) -> Response {
    match result {
        Ok(payload) => Response::Payload(payload),
        Err(err) => {
            let status = err.status();
            if status >= 500 {
                error!(error = %err, "request failed");
            } else {
                warn!(error = %err, "request rejected");
            }
            Response::Error { status, body: ErrorBody { error: err.public_message() } }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MergeRequest {
    pub files: Vec<Upload>,
}

#[derive(Debug, Clone, Default)]
pub struct SplitRequest {
    pub file: Option<Upload>,
    pub start_page: Option<String>,
    pub ending_page: Option<String>,
}

/// Extract or remove request; `pages` is a JSON array or a `1,3,5-7` list
#[derive(Debug, Clone, Default)]
pub struct PagesRequest {
    pub file: Option<Upload>,
    pub pages: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ImagesRequest {
    pub files: Vec<Upload>,
}

#[derive(Debug, Clone, Default)]
pub struct NumberRequest {
    pub file: Option<Upload>,
    pub position: Option<String>,
    pub font_size: Option<f32>,
    pub template: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WatermarkRequest {
    pub file: Option<Upload>,
    pub text: Option<String>,
    pub position: Option<String>,
    pub font_size: Option<f32>,
    pub opacity: Option<f32>,
}

#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub file: Option<Upload>,
    pub mode: ConversionMode,
    pub options: BTreeMap<String, String>,
}

/// Entry point for all operations
pub struct Service {
    config: Config,
    converter: Option<Box<dyn Converter>>,
}

impl Service {
    /// Build a service; the configured converter program, if any, backs
    /// the conversion operations
    pub fn new(config: Config) -> Self {
        let converter = config
            .converter
            .clone()
            .map(|program| Box::new(CommandConverter::new(program)) as Box<dyn Converter>);
        Self { config, converter }
    }

    pub fn with_converter(config: Config, converter: Box<dyn Converter>) -> Self {
        Self { config, converter: Some(converter) }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn job(&self, operation: &str) -> Result<JobContext> {
        let job = JobContext::create(&self.config.temp_root)?;
        info!(job = %job.id(), operation, "starting job");
        Ok(job)
    }

    /// Stage a PDF upload and load it
    fn load_pdf(&self, job: &JobContext, file: Option<&Upload>) -> Result<Document> {
        let upload = file.ok_or_else(|| Error::Validation("No PDF uploaded".to_string()))?;
        self.config.upload.check_pdf(upload)?;
        let path = job.stage(upload)?;
        Document::load_file(&path)
    }

    pub fn merge(&self, request: &MergeRequest) -> Result<Payload> {
        self.config.upload.check_pdf_batch(&request.files)?;
        let job = self.job("merge")?;
        let sources = request
            .files
            .iter()
            .map(|upload| self.load_pdf(&job, Some(upload)))
            .collect::<Result<Vec<_>>>()?;
        let bytes = merge_documents(&sources)?.save()?;
        Ok(Payload::pdf(bytes, "merged.pdf"))
    }

    pub fn split(&self, request: &SplitRequest) -> Result<Payload> {
        let job = self.job("split")?;
        let source = self.load_pdf(&job, request.file.as_ref())?;
        let (Some(start), Some(end)) = (non_empty(&request.start_page), non_empty(&request.ending_page)) else {
            return Err(Error::Validation("Start and end page numbers are required".to_string()));
        };
        let (Ok(start), Ok(end)) = (start.parse::<i64>(), end.parse::<i64>()) else {
            return Err(Error::Validation("Start and end pages must be numbers".to_string()));
        };
        let bytes = split(&source, start, end)?.save()?;
        Ok(Payload::pdf(bytes, "split.pdf"))
    }

    pub fn extract(&self, request: &PagesRequest) -> Result<Payload> {
        let job = self.job("extract")?;
        let source = self.load_pdf(&job, request.file.as_ref())?;
        let pages = parse_page_list(request.pages.as_deref().unwrap_or_default())?;
        let bytes = extract(&source, &pages)?.save()?;
        Ok(Payload::pdf(bytes, "extracted.pdf"))
    }

    pub fn remove(&self, request: &PagesRequest) -> Result<Payload> {
        let job = self.job("remove")?;
        let source = self.load_pdf(&job, request.file.as_ref())?;
        let pages = parse_page_list(request.pages.as_deref().unwrap_or_default())?;
        let bytes = remove(&source, &pages)?.save()?;
        Ok(Payload::pdf(bytes, "removed.pdf"))
    }

    pub fn images_to_pdf(&self, request: &ImagesRequest) -> Result<Payload> {
        self.config.upload.check_image_batch(&request.files)?;
        let job = self.job("images")?;
        let mut images = Vec::with_capacity(request.files.len());
        for upload in &request.files {
            let path = job.stage(upload)?;
            images.push(std::fs::read(path)?);
        }
        let bytes = images_to_pdf(&images)?.save()?;
        Ok(Payload::pdf(bytes, "converted.pdf"))
    }

    pub fn number_pages(&self, request: &NumberRequest) -> Result<Payload> {
        let job = self.job("number")?;
        let mut doc = self.load_pdf(&job, request.file.as_ref())?;
        let defaults = NumberingOptions::default();
        let options = NumberingOptions {
            position: parse_position(request.position.as_deref(), defaults.position)?,
            font_size: request.font_size.unwrap_or(defaults.font_size),
            template: non_empty(&request.template).map(str::to_string).unwrap_or(defaults.template),
            ..defaults
        };
        add_page_numbers(&mut doc, &options)?;
        Ok(Payload::pdf(doc.save()?, "numbered.pdf"))
    }

    pub fn watermark(&self, request: &WatermarkRequest) -> Result<Payload> {
        let job = self.job("watermark")?;
        let mut doc = self.load_pdf(&job, request.file.as_ref())?;
        let defaults = WatermarkOptions::default();
        let options = WatermarkOptions {
            text: request.text.clone().unwrap_or_default(),
            position: parse_position(request.position.as_deref(), defaults.position)?,
            font_size: request.font_size.unwrap_or(defaults.font_size),
            opacity: request.opacity.unwrap_or(defaults.opacity),
            ..defaults
        };
        add_watermark(&mut doc, &options)?;
        Ok(Payload::pdf(doc.save()?, "watermarked.pdf"))
    }

    /// Hand a file to the external converter
    pub fn convert(&self, request: &ConvertRequest) -> Result<Payload> {
        let converter = self
            .converter
            .as_ref()
            .ok_or_else(|| Error::ExternalService("no converter configured".to_string()))?;
        let upload = request
            .file
            .as_ref()
            .ok_or_else(|| Error::Validation("No file uploaded".to_string()))?;
        if request.mode.takes_pdf() {
            self.config.upload.check_pdf(upload)?;
        }

        let job = self.job(request.mode.as_str())?;
        let input = job.stage(upload)?;
        let conversion = ConversionRequest { mode: request.mode, options: request.options.clone() };
        let bytes = converter.convert(&input, &conversion, job.path())?;
        Ok(Payload {
            bytes,
            content_type: request.mode.content_type().to_string(),
            filename: request.mode.output_filename().to_string(),
        })
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_position(value: Option<&str>, default: Position) -> Result<Position> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(text) => text.parse().map_err(Error::Validation),
        None => Ok(default),
    }
}
