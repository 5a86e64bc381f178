//! Page-number and watermark overlays
//!
//! Both overlays append one new content stream per page, wrapped in `q`/`Q`,
//! and leave every existing stream untouched.

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::layout::{Position, Rect};
use crate::model::content::{
    add_resource, append_content, opacity_state, page_content, scan_open_state, standard_font,
    ContentBuilder, OpenState, ResourceKind,
};
use crate::model::{Document, PageHandle};

/// Font used for every overlay
pub const OVERLAY_FONT: &str = "Helvetica";

/// Helvetica advance widths for characters 32..=126, in 1/1000 em
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '../
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // 0..9
    278, 278, 584, 584, 584, 556, 1015, // :..@
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // A..M
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // N..Z
    278, 278, 278, 469, 556, 333, // [..`
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // a..m
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // n..z
    334, 260, 334, 584, // {..~
];

/// Width of `text` set in Helvetica at `font_size`
pub fn helvetica_text_width(text: &str, font_size: f32) -> f32 {
    let units: u32 = text
        .chars()
        .map(|c| {
            let code = u32::from(c);
            if (32..=126).contains(&code) {
                u32::from(HELVETICA_WIDTHS[(code - 32) as usize])
            } else {
                556
            }
        })
        .sum();
    units as f32 * font_size / 1000.0
}

/// Options for numbering pages
#[derive(Debug, Clone)]
pub struct NumberingOptions {
    pub position: Position,
    /// Font size in points
    pub font_size: f32,
    /// Distance from the page edge in points
    pub margin: f32,
    /// Label text; `{page}` and `{total}` are substituted
    pub template: String,
    /// Number printed on the first page
    pub first_number: usize,
}

impl Default for NumberingOptions {
    fn default() -> Self {
        Self {
            position: Position::BOTTOM_CENTER,
            font_size: 12.0,
            margin: 30.0,
            template: "{page}".to_string(),
            first_number: 1,
        }
    }
}

/// Options for stamping a watermark on every page
#[derive(Debug, Clone)]
pub struct WatermarkOptions {
    pub text: String,
    pub position: Position,
    /// Font size in points
    pub font_size: f32,
    /// Fill opacity between 0 and 1
    pub opacity: f32,
    /// Counter-clockwise rotation in degrees
    pub rotation: f32,
    /// Distance from the page edge in points, for edge anchors
    pub margin: f32,
}

impl Default for WatermarkOptions {
    fn default() -> Self {
        Self {
            text: String::new(),
            position: Position::CENTER,
            font_size: 48.0,
            opacity: 0.3,
            rotation: 45.0,
            margin: 30.0,
        }
    }
}

fn check_font_size(font_size: f32) -> Result<()> {
    if font_size.is_finite() && font_size > 0.0 {
        Ok(())
    } else {
        Err(Error::Validation(format!("Invalid font size: {font_size}")))
    }
}

/// Draw a page number on every page
///
/// The label width is estimated as one em per character, which is what the
/// anchor math uses to keep right-aligned numbers inside the margin.
pub fn add_page_numbers(doc: &mut Document, options: &NumberingOptions) -> Result<()> {
    check_font_size(options.font_size)?;
    let total = doc.page_count();
    if total == 0 {
        return Err(Error::Validation("PDF has no pages".to_string()));
    }

    let font = standard_font(doc, OVERLAY_FONT);
    for (index, page) in doc.pages().to_vec().into_iter().enumerate() {
        let number = options.first_number + index;
        let label = options
            .template
            .replace("{page}", &number.to_string())
            .replace("{total}", &total.to_string());

        let media_box = doc.media_box(page)?;
        let width = options.font_size * label.chars().count() as f32;
        let (x, y) = options.position.place(media_box, width, options.font_size, options.margin);

        let font_name = add_resource(doc, page, ResourceKind::Font, "F", font)?;
        let mut content = begin_overlay(doc, page)?;
        content
            .fill_gray(0.0)
            .begin_text()
            .font(&font_name, options.font_size)
            .text_matrix([1.0, 0.0, 0.0, 1.0, x, y])
            .show_text(&label)
            .end_text()
            .restore_state();
        append_content(doc, page, leading_newline(content))?;
    }

    info!(pages = total, position = %options.position, "numbered pages");
    Ok(())
}

/// Stamp rotated, translucent text on every page
pub fn add_watermark(doc: &mut Document, options: &WatermarkOptions) -> Result<()> {
    if options.text.trim().is_empty() {
        return Err(Error::Validation("Watermark text is required".to_string()));
    }
    check_font_size(options.font_size)?;
    if !(0.0..=1.0).contains(&options.opacity) {
        return Err(Error::Validation(format!("Opacity must be between 0 and 1, got {}", options.opacity)));
    }
    if doc.page_count() == 0 {
        return Err(Error::Validation("PDF has no pages".to_string()));
    }

    let font = standard_font(doc, OVERLAY_FONT);
    let state = opacity_state(doc, options.opacity);
    let (sin, cos) = options.rotation.to_radians().sin_cos();
    let width = helvetica_text_width(&options.text, options.font_size);
    // Cap height plus a little descent
    let height = options.font_size * 0.7;

    for page in doc.pages().to_vec() {
        let media_box = doc.media_box(page)?;
        let (x, y) = rotated_origin(media_box, options, width, height, sin, cos);

        let font_name = add_resource(doc, page, ResourceKind::Font, "F", font)?;
        let state_name = add_resource(doc, page, ResourceKind::ExtGState, "GS", state)?;
        let mut content = begin_overlay(doc, page)?;
        content
            .graphics_state(&state_name)
            .fill_gray(0.5)
            .begin_text()
            .font(&font_name, options.font_size)
            .text_matrix([cos, sin, -sin, cos, x, y])
            .show_text(&options.text)
            .end_text()
            .restore_state();
        append_content(doc, page, leading_newline(content))?;
    }

    info!(pages = doc.page_count(), position = %options.position, "watermarked pages");
    Ok(())
}

/// Start an overlay in default user space
///
/// Any `q` the existing content leaves open is closed first, and a
/// transformation it leaves in force is undone, so overlay coordinates are
/// page coordinates. The returned builder has already issued its `q`.
fn begin_overlay(doc: &Document, page: PageHandle) -> Result<ContentBuilder> {
    let state = match page_content(doc, page) {
        Ok(content) => scan_open_state(&content),
        Err(err) => {
            warn!(page = %page.id(), error = %err, "cannot read page content, assuming a clean state");
            OpenState::default()
        }
    };

    let mut content = ContentBuilder::new();
    for _ in 0..state.unclosed {
        content.restore_state();
    }
    content.save_state();
    if !state.ctm.is_identity() {
        match state.ctm.inverse() {
            Some(inverse) => {
                debug!(page = %page.id(), ctm = ?state.ctm.to_array(), "undoing leftover transformation");
                content.transform(inverse.to_array());
            }
            None => warn!(page = %page.id(), "page leaves a singular transformation in force"),
        }
    }
    Ok(content)
}

/// Text origin that puts the rotated text's bounding box at the anchor
fn rotated_origin(
    page: Rect,
    options: &WatermarkOptions,
    width: f32,
    height: f32,
    sin: f32,
    cos: f32,
) -> (f32, f32) {
    let corners = [(0.0, 0.0), (width, 0.0), (0.0, height), (width, height)]
        .map(|(px, py)| (px * cos - py * sin, px * sin + py * cos));
    let min_x = corners.iter().map(|c| c.0).fold(f32::INFINITY, f32::min);
    let max_x = corners.iter().map(|c| c.0).fold(f32::NEG_INFINITY, f32::max);
    let min_y = corners.iter().map(|c| c.1).fold(f32::INFINITY, f32::min);
    let max_y = corners.iter().map(|c| c.1).fold(f32::NEG_INFINITY, f32::max);

    let (box_x, box_y) = options.position.place(page, max_x - min_x, max_y - min_y, options.margin);
    (box_x - min_x, box_y - min_y)
}

/// Start the stream on a fresh line so it never fuses with the previous
/// stream's last token
fn leading_newline(content: ContentBuilder) -> Vec<u8> {
    let mut bytes = vec![b'\n'];
    bytes.extend(content.into_bytes());
    bytes
}
