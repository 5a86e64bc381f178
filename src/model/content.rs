//! Content Stream Composer
//!
//! Overlays never touch existing content streams. New drawing goes into a
//! fresh stream appended to the page's `Contents`, so the original bytes
//! stay an unbroken prefix of what a reader concatenates.

use std::fmt::Write as _;

use crate::error::{Error, Result};
use crate::layout::TransformMatrix;
use crate::model::document::{Document, PageHandle};
use crate::model::filter::{decode_stream, deflate};
use crate::model::lexer::Lexer;
use crate::model::object::{Dictionary, Object, ObjectId, Stream};
use crate::model::writer::format_number;

/// Builder for content stream operators
#[derive(Debug, Default)]
pub struct ContentBuilder {
    ops: String,
}

impl ContentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn op(&mut self, operands: &[f32], operator: &str) -> &mut Self {
        for value in operands {
            self.ops.push_str(&format_number(*value));
            self.ops.push(' ');
        }
        self.ops.push_str(operator);
        self.ops.push('\n');
        self
    }

    /// `q`
    pub fn save_state(&mut self) -> &mut Self {
        self.op(&[], "q")
    }

    /// `Q`
    pub fn restore_state(&mut self) -> &mut Self {
        self.op(&[], "Q")
    }

    /// `cm`
    pub fn transform(&mut self, matrix: [f32; 6]) -> &mut Self {
        self.op(&matrix, "cm")
    }

    /// `/name gs`
    pub fn graphics_state(&mut self, name: &str) -> &mut Self {
        let _ = writeln!(self.ops, "/{name} gs");
        self
    }

    /// `g`, gray fill
    pub fn fill_gray(&mut self, gray: f32) -> &mut Self {
        self.op(&[gray], "g")
    }

    pub fn begin_text(&mut self) -> &mut Self {
        self.op(&[], "BT")
    }

    pub fn end_text(&mut self) -> &mut Self {
        self.op(&[], "ET")
    }

    /// `/font size Tf`
    pub fn font(&mut self, name: &str, size: f32) -> &mut Self {
        let _ = writeln!(self.ops, "/{name} {} Tf", format_number(size));
        self
    }

    /// `Tm`, text matrix
    pub fn text_matrix(&mut self, matrix: [f32; 6]) -> &mut Self {
        self.op(&matrix, "Tm")
    }

    /// `(text) Tj`, text in WinAnsi encoding
    pub fn show_text(&mut self, text: &str) -> &mut Self {
        self.ops.push('(');
        self.ops.push_str(&escape_pdf_string(text));
        self.ops.push_str(") Tj\n");
        self
    }

    /// `/name Do`
    pub fn draw_xobject(&mut self, name: &str) -> &mut Self {
        let _ = writeln!(self.ops, "/{name} Do");
        self
    }

    /// Operator bytes, each string byte mapped to one WinAnsi code
    pub fn into_bytes(self) -> Vec<u8> {
        self.ops.chars().map(win_ansi_byte).collect()
    }
}

/// Map a character to its single-byte code; characters outside Latin-1
/// become `?`
fn win_ansi_byte(c: char) -> u8 {
    u8::try_from(u32::from(c)).unwrap_or(b'?')
}

/// Escape special characters for a literal string
pub fn escape_pdf_string(s: &str) -> String {
    s.replace('\\', "\\\\")
        .replace('(', "\\(")
        .replace(')', "\\)")
        .replace('\r', "\\r")
        .replace('\n', "\\n")
}

/// Resource categories an overlay may register on a page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Font,
    XObject,
    ExtGState,
}

impl ResourceKind {
    fn key(self) -> &'static str {
        match self {
            ResourceKind::Font => "Font",
            ResourceKind::XObject => "XObject",
            ResourceKind::ExtGState => "ExtGState",
        }
    }
}

/// Register `target` in the page's resources and return its resource name
///
/// The page gets its own inline copy of its (possibly shared or inherited)
/// resources before the entry is added, so other pages never see it. The
/// name is `prefix` followed by the first free counter.
pub fn add_resource(
    doc: &mut Document,
    page: PageHandle,
    kind: ResourceKind,
    prefix: &str,
    target: ObjectId,
) -> Result<String> {
    let mut resources = match doc.inherited(page, b"Resources")? {
        Some(value) => doc.resolve(value)?.as_dict().cloned().unwrap_or_default(),
        None => Dictionary::new(),
    };
    let mut category = match resources.get(kind.key().as_bytes()) {
        Some(value) => doc.resolve(value)?.as_dict().cloned().unwrap_or_default(),
        None => Dictionary::new(),
    };

    let name = (0..)
        .map(|n| format!("{prefix}{n}"))
        .find(|candidate| !category.contains_key(candidate.as_bytes()))
        .unwrap_or_else(|| prefix.to_string());
    category.set(name.as_bytes(), target);
    resources.set(kind.key(), Object::Dictionary(category));

    doc.page_dict_mut(page)?.set("Resources", Object::Dictionary(resources));
    Ok(name)
}

/// Store `content` as a new Flate-compressed stream and append it to the page
pub fn append_content(doc: &mut Document, page: PageHandle, content: Vec<u8>) -> Result<ObjectId> {
    let mut dict = Dictionary::new();
    dict.set("Filter", Object::name("FlateDecode"));
    let stream_id = doc.add_object(Stream::new(dict, deflate(&content)).into());

    let contents = match doc.page_dict(page)?.get(b"Contents").cloned() {
        None | Some(Object::Null) => Object::Array(vec![stream_id.into()]),
        Some(Object::Reference(existing)) => match doc.get_object(existing)? {
            Object::Array(items) => {
                let mut items = items.clone();
                items.push(stream_id.into());
                Object::Array(items)
            }
            Object::Stream(_) => Object::Array(vec![existing.into(), stream_id.into()]),
            other => {
                return Err(Error::Validation(format!(
                    "page {} has contents of type {}",
                    page.id(),
                    other.kind()
                )))
            }
        },
        Some(Object::Array(mut items)) => {
            items.push(stream_id.into());
            Object::Array(items)
        }
        Some(other) => {
            return Err(Error::Validation(format!(
                "page {} has contents of type {}",
                page.id(),
                other.kind()
            )))
        }
    };
    doc.page_dict_mut(page)?.set("Contents", contents);
    Ok(stream_id)
}

/// Graphics state still in force after a page's existing content runs
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OpenState {
    /// `q` operators with no matching `Q`
    pub unclosed: usize,
    /// CTM left once those saves are restored
    pub ctm: TransformMatrix,
}

impl Default for OpenState {
    fn default() -> Self {
        Self { unclosed: 0, ctm: TransformMatrix::identity() }
    }
}

/// Track `q`, `Q` and `cm` through decoded content
///
/// Operands that fail to parse are skipped a byte at a time, so damaged
/// content still yields a best-effort state.
pub fn scan_open_state(content: &[u8]) -> OpenState {
    let mut lexer = Lexer::new(content);
    let mut ctm = TransformMatrix::identity();
    let mut saved = Vec::new();
    let mut operands: Vec<f32> = Vec::new();

    loop {
        lexer.skip_whitespace();
        if lexer.is_eof() {
            break;
        }
        if let Some(operator) = lexer.read_operator() {
            match operator {
                b"q" => saved.push(ctm),
                b"Q" => {
                    if let Some(previous) = saved.pop() {
                        ctm = previous;
                    }
                }
                b"cm" => {
                    let matrix = operands
                        .get(operands.len().saturating_sub(6)..)
                        .and_then(|m| <[f32; 6]>::try_from(m).ok())
                        .filter(|m| m.iter().all(|v| v.is_finite()));
                    if let Some(matrix) = matrix {
                        ctm = TransformMatrix::from_array(matrix).then(&ctm);
                    }
                }
                b"ID" => lexer.skip_inline_image(),
                _ => {}
            }
            operands.clear();
            continue;
        }

        let start = lexer.pos();
        match lexer.parse_object() {
            Ok(object) => operands.push(object.as_f32().unwrap_or(f32::NAN)),
            Err(_) => lexer.seek(start + 1),
        }
    }

    OpenState { unclosed: saved.len(), ctm: saved.first().copied().unwrap_or(ctm) }
}

/// Decoded bytes of every content stream of `page`, in order
pub fn page_content(doc: &Document, page: PageHandle) -> Result<Vec<u8>> {
    let Some(contents) = doc.page_dict(page)?.get(b"Contents") else {
        return Ok(Vec::new());
    };
    let parts: Vec<&Object> = match doc.resolve(contents)? {
        Object::Array(items) => items.iter().collect(),
        single => vec![single],
    };

    let mut out = Vec::new();
    for part in parts {
        if let Object::Stream(stream) = doc.resolve(part)? {
            let bytes = decode_stream(stream).map_err(|detail| {
                Error::Validation(format!("page {} content cannot be decoded: {detail}", page.id()))
            })?;
            out.extend_from_slice(&bytes);
            out.push(b'\n');
        }
    }
    Ok(out)
}

/// Add a standard Type1 font dictionary (no embedding needed)
pub fn standard_font(doc: &mut Document, base_font: &str) -> ObjectId {
    let mut font = Dictionary::new();
    font.set("Type", Object::name("Font"));
    font.set("Subtype", Object::name("Type1"));
    font.set("BaseFont", Object::name(base_font));
    font.set("Encoding", Object::name("WinAnsiEncoding"));
    doc.add_object(font.into())
}

/// Add an ExtGState with the given fill and stroke opacity
pub fn opacity_state(doc: &mut Document, opacity: f32) -> ObjectId {
    let mut state = Dictionary::new();
    state.set("Type", Object::name("ExtGState"));
    state.set("ca", Object::Real(opacity));
    state.set("CA", Object::Real(opacity));
    doc.add_object(state.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::filter::inflate;

    fn page_with_contents(doc: &mut Document, contents: Option<Object>) -> PageHandle {
        let mut page = Dictionary::new();
        page.set("Type", Object::name("Page"));
        if let Some(contents) = contents {
            page.set("Contents", contents);
        }
        let handle = PageHandle::new(doc.add_object(page.into()));
        doc.insert_pages(0, &[handle]).expect("insert");
        handle
    }

    #[test]
    fn test_builder_output() {
        let mut builder = ContentBuilder::new();
        builder
            .save_state()
            .begin_text()
            .font("F0", 12.0)
            .text_matrix([1.0, 0.0, 0.0, 1.0, 30.5, 30.0])
            .show_text("3 (of 4)")
            .end_text()
            .restore_state();
        let text = String::from_utf8(builder.into_bytes()).expect("ascii");
        assert_eq!(text, "q\nBT\n/F0 12 Tf\n1 0 0 1 30.5 30 Tm\n(3 \\(of 4\\)) Tj\nET\nQ\n");
    }

    #[test]
    fn test_scan_balanced_content() {
        let state = scan_open_state(b"q 2 0 0 2 0 0 cm BT (a) Tj ET Q 0 0 m");
        assert_eq!(state, OpenState::default());
    }

    #[test]
    fn test_scan_unwrapped_transform() {
        let state = scan_open_state(b".24 0 0 -.24 0 792 cm\nBT /F1 12 Tf (Hi) Tj ET");
        assert_eq!(state.unclosed, 0);
        assert_eq!(state.ctm, TransformMatrix::from_array([0.24, 0.0, 0.0, -0.24, 0.0, 792.0]));
    }

    #[test]
    fn test_scan_unclosed_saves() {
        // The outer cm stays in force after both saves are restored
        let state = scan_open_state(b"0.5 0 0 0.5 0 0 cm q 3 0 0 3 0 0 cm q (Q cm) Tj [1 2] 0 d");
        assert_eq!(state.unclosed, 2);
        assert_eq!(state.ctm, TransformMatrix::from_array([0.5, 0.0, 0.0, 0.5, 0.0, 0.0]));
    }

    #[test]
    fn test_scan_survives_damaged_content() {
        let state = scan_open_state(b") ] >> q 1 0 0 1 5 5 cm { BI /W 2 ID Q\x00EI Q q");
        assert_eq!(state.unclosed, 1);
        assert_eq!(state.ctm, TransformMatrix::identity());
    }

    #[test]
    fn test_page_content_joins_streams() {
        let mut doc = Document::new();
        let first = doc.add_object(Stream::new(Dictionary::new(), b"q".to_vec()).into());
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::name("FlateDecode"));
        let second = doc.add_object(Stream::new(dict, deflate(b"Q")).into());
        let page = page_with_contents(&mut doc, Some(Object::Array(vec![first.into(), second.into()])));
        assert_eq!(page_content(&doc, page).expect("content"), b"q\nQ\n");
    }

    #[test]
    fn test_non_latin_text_becomes_question_mark() {
        let mut builder = ContentBuilder::new();
        builder.show_text("é☃");
        assert_eq!(builder.into_bytes(), b"(\xE9?) Tj\n");
    }

    #[test]
    fn test_append_turns_single_reference_into_array() {
        let mut doc = Document::new();
        let original = doc.add_object(Stream::new(Dictionary::new(), b"0 0 m".to_vec()).into());
        let page = page_with_contents(&mut doc, Some(original.into()));

        let added = append_content(&mut doc, page, b"q Q".to_vec()).expect("append");
        let contents = doc.page_dict(page).expect("page").get(b"Contents").cloned();
        assert_eq!(contents, Some(Object::Array(vec![original.into(), added.into()])));

        let stream = doc.get_object(added).expect("stream").as_stream().expect("stream");
        assert_eq!(inflate(&stream.content).expect("inflate"), b"q Q");
    }

    #[test]
    fn test_append_to_missing_contents() {
        let mut doc = Document::new();
        let page = page_with_contents(&mut doc, None);
        let added = append_content(&mut doc, page, Vec::new()).expect("append");
        let contents = doc.page_dict(page).expect("page").get(b"Contents").cloned();
        assert_eq!(contents, Some(Object::Array(vec![added.into()])));
    }

    #[test]
    fn test_add_resource_does_not_touch_shared_dictionary() {
        let mut doc = Document::new();
        let mut fonts = Dictionary::new();
        fonts.set("F0", ObjectId::new(90, 0));
        let mut shared = Dictionary::new();
        shared.set("Font", Object::Dictionary(fonts));
        let shared_id = doc.add_object(shared.clone().into());

        let page = page_with_contents(&mut doc, None);
        doc.page_dict_mut(page).expect("page").set("Resources", shared_id);

        let font = standard_font(&mut doc, "Helvetica");
        let name = add_resource(&mut doc, page, ResourceKind::Font, "F", font).expect("add");
        assert_eq!(name, "F1");

        assert_eq!(doc.get_object(shared_id).expect("shared"), &Object::Dictionary(shared));
        let resources = doc.page_dict(page).expect("page").get(b"Resources").expect("inline");
        let fonts = resources.as_dict().and_then(|r| r.get(b"Font")).and_then(Object::as_dict);
        assert_eq!(fonts.and_then(|f| f.get(b"F1")), Some(&Object::Reference(font)));
    }
}
