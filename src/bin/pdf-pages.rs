//! PDF Pages CLI tool
//!
//! A command-line front end for the page engine. Every command runs as one
//! job through the same service the library exposes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use glob::glob;
use tracing::warn;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use pdf_pages::convert::ConversionMode;
use pdf_pages::job::Upload;
use pdf_pages::service::{
    ConvertRequest, ImagesRequest, MergeRequest, NumberRequest, PagesRequest, SplitRequest,
    WatermarkRequest,
};
use pdf_pages::{respond, Config, Payload, Response, Service};

/// PDF Pages - Merge, split and stamp PDF pages
#[derive(Parser)]
#[command(name = "pdf-pages")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Merge numbered PDFs in order
    pdf-pages merge -o handout.pdf \"[0-9]*.pdf\"

    # Keep pages 3 to 7
    pdf-pages split input.pdf 3 7 -o part.pdf

    # Drop pages 1 and 4 to 6
    pdf-pages remove input.pdf 1,4-6 -o trimmed.pdf

    # Number pages at the bottom right
    pdf-pages number input.pdf --position bottom-right --template \"Page {page}\"

    # One page per photo
    pdf-pages images -o album.pdf photos/*.jpg")]
struct Cli {
    /// Root directory for per-job temporary files
    #[arg(long, global = true, env = "PDF_PAGES_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Program that performs the external conversions
    #[arg(long, global = true, env = "PDF_PAGES_CONVERTER")]
    converter: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge multiple PDF files into one
    Merge {
        /// Input PDF files (in order). Supports glob patterns like "*.pdf"
        #[arg(required = true)]
        inputs: Vec<String>,

        /// Output PDF file path (defaults to merged.pdf)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Open the output file after creation
        #[arg(long)]
        open: bool,
    },

    /// Keep an inclusive page range
    Split {
        /// Input PDF file
        input: PathBuf,

        /// First page to keep (1-based)
        start: String,

        /// Last page to keep (1-based)
        end: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Keep the listed pages, in document order
    Extract {
        /// Input PDF file
        input: PathBuf,

        /// Pages as "1,3,5-7" or a JSON array
        pages: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Drop the listed pages
    Remove {
        /// Input PDF file
        input: PathBuf,

        /// Pages as "1,3,5-7" or a JSON array
        pages: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build a PDF with one page per JPEG or PNG image
    Images {
        /// Input images (in order). Supports glob patterns like "*.jpg"
        #[arg(required = true)]
        inputs: Vec<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Open the output file after creation
        #[arg(long)]
        open: bool,
    },

    /// Stamp page numbers onto every page
    Number {
        /// Input PDF file
        input: PathBuf,

        /// Anchor such as "bottom-center" or "top-right"
        #[arg(long)]
        position: Option<String>,

        #[arg(long)]
        font_size: Option<f32>,

        /// Label template; "{page}" is replaced by the page number
        #[arg(long)]
        template: Option<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Stamp a rotated, translucent text watermark onto every page
    Watermark {
        /// Input PDF file
        input: PathBuf,

        /// Watermark text
        #[arg(long)]
        text: String,

        /// Anchor such as "center" or "top-left"
        #[arg(long)]
        position: Option<String>,

        #[arg(long)]
        font_size: Option<f32>,

        /// Fill and stroke opacity between 0 and 1
        #[arg(long)]
        opacity: Option<f32>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a conversion through the external converter
    Convert {
        /// One of: pdfjpg, compress, officepdf, pdfa, protect, unlock
        mode: ConversionMode,

        /// Input file
        input: PathBuf,

        /// Extra converter options as key=value
        #[arg(long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show information about a PDF file
    Info {
        /// PDF file to inspect
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = Config::from_env();
    if let Some(dir) = cli.temp_dir {
        config.temp_root = dir;
    }
    if cli.converter.is_some() {
        config.converter = cli.converter;
    }
    let service = Service::new(config);

    let (result, output, open) = match cli.command {
        Commands::Merge { inputs, output, open } => {
            let files = uploads(expand_globs(inputs)?)?;
            eprintln!("Merging {} PDF files...", files.len());
            (service.merge(&MergeRequest { files }), output, open)
        }
        Commands::Split { input, start, end, output } => {
            let request = SplitRequest {
                file: Some(upload(&input)?),
                start_page: Some(start),
                ending_page: Some(end),
            };
            (service.split(&request), output, false)
        }
        Commands::Extract { input, pages, output } => {
            let request = PagesRequest { file: Some(upload(&input)?), pages: Some(pages) };
            (service.extract(&request), output, false)
        }
        Commands::Remove { input, pages, output } => {
            let request = PagesRequest { file: Some(upload(&input)?), pages: Some(pages) };
            (service.remove(&request), output, false)
        }
        Commands::Images { inputs, output, open } => {
            let files = uploads(expand_globs(inputs)?)?;
            eprintln!("Converting {} images...", files.len());
            (service.images_to_pdf(&ImagesRequest { files }), output, open)
        }
        Commands::Number { input, position, font_size, template, output } => {
            let request = NumberRequest { file: Some(upload(&input)?), position, font_size, template };
            (service.number_pages(&request), output, false)
        }
        Commands::Watermark { input, text, position, font_size, opacity, output } => {
            let request = WatermarkRequest {
                file: Some(upload(&input)?),
                text: Some(text),
                position,
                font_size,
                opacity,
            };
            (service.watermark(&request), output, false)
        }
        Commands::Convert { mode, input, options, output } => {
            let request = ConvertRequest {
                file: Some(upload(&input)?),
                mode,
                options: parse_options(&options)?,
            };
            (service.convert(&request), output, false)
        }
        Commands::Info { input } => {
            cmd_info(&input)?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    deliver(respond(result), output, open)
}

/// Write a payload to disk, or report a rejected request as JSON on stdout
fn deliver(response: Response, output: Option<PathBuf>, open: bool) -> anyhow::Result<ExitCode> {
    match response {
        Response::Payload(payload) => {
            let path = write_payload(&payload, output)?;
            eprintln!("Output: {}", path.display());
            if open {
                open_file(&path)?;
            }
            Ok(ExitCode::SUCCESS)
        }
        error => {
            if let Some(body) = error.error_json() {
                println!("{}", body);
            }
            Ok(if error.status() < 500 { ExitCode::from(2) } else { ExitCode::FAILURE })
        }
    }
}

fn write_payload(payload: &Payload, output: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    let path = output.unwrap_or_else(|| PathBuf::from(&payload.filename));
    std::fs::write(&path, &payload.bytes)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn upload(path: &Path) -> anyhow::Result<Upload> {
    Upload::from_path(path).with_context(|| format!("reading {}", path.display()))
}

fn uploads(paths: Vec<PathBuf>) -> anyhow::Result<Vec<Upload>> {
    paths.iter().map(|path| upload(path)).collect()
}

fn parse_options(pairs: &[String]) -> anyhow::Result<BTreeMap<String, String>> {
    let mut options = BTreeMap::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Option must be KEY=VALUE, got '{}'", pair);
        };
        options.insert(key.trim().to_string(), value.to_string());
    }
    Ok(options)
}

/// Expand glob patterns in input paths
fn expand_globs(patterns: Vec<String>) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();

    for pattern in patterns {
        if pattern.contains('*') || pattern.contains('?') || pattern.contains('[') {
            let mut matched = Vec::new();
            for entry in glob(&pattern)? {
                match entry {
                    Ok(path) => matched.push(path),
                    Err(e) => warn!(pattern = %pattern, error = %e, "glob error"),
                }
            }
            if matched.is_empty() {
                bail!("No files matched pattern: {}", pattern);
            }
            // Order within one pattern is by name; patterns keep the order given
            matched.sort();
            paths.extend(matched);
        } else {
            paths.push(PathBuf::from(pattern));
        }
    }

    Ok(paths)
}

/// Open a file with the system default application
fn open_file(path: &Path) -> anyhow::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(path).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(path).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", &path.display().to_string()])
            .spawn()?;
    }
    Ok(())
}

/// Show information about a PDF
fn cmd_info(input: &Path) -> anyhow::Result<()> {
    let metadata = pdf_pages::pdf::extract_metadata(input)?;

    println!("File: {}", input.display());
    println!("Version: {}", metadata.version);
    println!("Pages: {}", metadata.page_count);

    if let Some(title) = metadata.title {
        println!("Title: {}", title);
    }
    if let Some(author) = metadata.author {
        println!("Author: {}", author);
    }
    for (index, size) in metadata.page_sizes.iter().enumerate() {
        println!("  Page {}: {} x {} pt", index + 1, size.width, size.height);
    }

    Ok(())
}
