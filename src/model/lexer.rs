//! Tokenizer and object parser for PDF syntax

use crate::error::ParseError;
use crate::model::object::{Dictionary, Object, ObjectId, Stream, StringFormat};

type Result<T> = std::result::Result<T, ParseError>;

pub(crate) fn is_whitespace(byte: u8) -> bool {
    matches!(byte, b' ' | b'\t' | b'\n' | b'\r' | b'\x0c' | b'\0')
}

pub(crate) fn is_delimiter(byte: u8) -> bool {
    matches!(byte, b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%')
}

fn is_regular(byte: u8) -> bool {
    !is_whitespace(byte) && !is_delimiter(byte)
}

/// Deepest array/dictionary nesting accepted in one object
pub const MAX_NESTING: usize = 256;

/// Cursor over a byte buffer that understands PDF tokens
pub struct Lexer<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0, depth: 0 }
    }

    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos: pos.min(data.len()), depth: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn is_eof(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }

    fn error(&self, detail: impl Into<String>) -> ParseError {
        ParseError::MalformedObject { offset: self.pos, detail: detail.into() }
    }

    pub fn skip_whitespace(&mut self) {
        while let Some(byte) = self.peek() {
            if is_whitespace(byte) {
                self.pos += 1;
            } else if byte == b'%' {
                while let Some(c) = self.peek() {
                    if c == b'\n' || c == b'\r' {
                        break;
                    }
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// True if the next token is exactly `keyword`
    pub fn peek_keyword(&mut self, keyword: &[u8]) -> bool {
        self.skip_whitespace();
        let end = self.pos + keyword.len();
        self.data.get(self.pos..end) == Some(keyword)
            && self.data.get(end).map_or(true, |&b| !is_regular(b))
    }

    /// Consume `keyword` if it is the next token
    pub fn eat_keyword(&mut self, keyword: &[u8]) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    pub fn expect_keyword(&mut self, keyword: &[u8]) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", String::from_utf8_lossy(keyword))))
        }
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.data.len());
    }

    /// Read a bare content operator such as `cm`, `Tj` or `'`
    pub fn read_operator(&mut self) -> Option<&'a [u8]> {
        self.skip_whitespace();
        let start = self.pos;
        match self.peek() {
            Some(b'0'..=b'9' | b'+' | b'-' | b'.') => return None,
            Some(byte) if is_regular(byte) => {}
            _ => return None,
        }
        while self.peek().map_or(false, is_regular) {
            self.pos += 1;
        }
        Some(&self.data[start..self.pos])
    }

    /// Skip the binary data of an inline image, just past its `EI`
    pub fn skip_inline_image(&mut self) {
        let mut at = (self.pos + 1).min(self.data.len());
        while let Some(found) = find(&self.data[at..], b"EI") {
            let start = at + found;
            let end = start + 2;
            let before = start == 0 || is_whitespace(self.data[start - 1]);
            let after = self.data.get(end).map_or(true, |&b| !is_regular(b));
            if before && after {
                self.pos = end;
                return;
            }
            at = start + 1;
        }
        self.pos = self.data.len();
    }

    /// Read an unsigned decimal integer token
    pub fn read_unsigned(&mut self) -> Option<u64> {
        self.skip_whitespace();
        let start = self.pos;
        while matches!(self.peek(), Some(b'0'..=b'9')) {
            self.pos += 1;
        }
        if start == self.pos || self.peek().map_or(false, is_regular) {
            self.pos = start;
            return None;
        }
        std::str::from_utf8(&self.data[start..self.pos]).ok()?.parse().ok()
    }

    /// Parse `<num> <gen> obj`
    pub fn parse_object_header(&mut self) -> Result<ObjectId> {
        let number = self.read_unsigned().ok_or_else(|| self.error("expected object number"))?;
        let generation = self.read_unsigned().ok_or_else(|| self.error("expected generation"))?;
        self.expect_keyword(b"obj")?;
        let number = u32::try_from(number).map_err(|_| self.error("object number too large"))?;
        let generation =
            u16::try_from(generation).map_err(|_| self.error("generation too large"))?;
        Ok(ObjectId::new(number, generation))
    }

    /// Parse a complete indirect object, including stream data
    ///
    /// `resolve_length` is consulted when a stream's `/Length` is an
    /// indirect reference.
    pub fn parse_indirect_object<F>(&mut self, resolve_length: F) -> Result<(ObjectId, Object)>
    where
        F: Fn(ObjectId) -> Option<i64>,
    {
        let id = self.parse_object_header()?;
        let object = self.parse_object()?;

        let object = match object {
            Object::Dictionary(dict) if self.peek_keyword(b"stream") => {
                self.pos += b"stream".len();
                let content = self.read_stream_data(&dict, &resolve_length)?;
                Object::Stream(Stream::new(dict, content))
            }
            other => other,
        };

        // Some writers omit endobj; tolerate it
        self.eat_keyword(b"endobj");
        Ok((id, object))
    }

    fn read_stream_data<F>(&mut self, dict: &Dictionary, resolve_length: &F) -> Result<Vec<u8>>
    where
        F: Fn(ObjectId) -> Option<i64>,
    {
        match (self.peek(), self.peek_at(1)) {
            (Some(b'\r'), Some(b'\n')) => self.pos += 2,
            (Some(b'\n'), _) | (Some(b'\r'), _) => self.pos += 1,
            _ => {}
        }
        let start = self.pos;

        let declared = match dict.get(b"Length") {
            Some(Object::Integer(n)) => Some(*n),
            Some(Object::Reference(id)) => resolve_length(*id),
            _ => None,
        };

        if let Some(length) = declared.and_then(|n| usize::try_from(n).ok()) {
            let end = start.saturating_add(length);
            if end <= self.data.len() {
                self.pos = end;
                if self.eat_keyword(b"endstream") {
                    return Ok(self.data[start..end].to_vec());
                }
            }
            self.pos = start;
        }

        // Declared length missing or wrong: scan for the terminator
        let found = find(&self.data[start..], b"endstream")
            .ok_or_else(|| self.error("unterminated stream"))?;
        let mut end = start + found;
        if end > start && self.data[end - 1] == b'\n' {
            end -= 1;
        }
        if end > start && self.data[end - 1] == b'\r' {
            end -= 1;
        }
        self.pos = start + found + b"endstream".len();
        Ok(self.data[start..end].to_vec())
    }

    /// Parse one direct object (references appear as `Object::Reference`)
    pub fn parse_object(&mut self) -> Result<Object> {
        self.skip_whitespace();
        match self.peek() {
            None => Err(self.error("unexpected end of data")),
            Some(b'/') => self.parse_name().map(Object::Name),
            Some(b'(') => self.parse_literal_string(),
            Some(b'<') if self.peek_at(1) == Some(b'<') => {
                self.nested(|lexer| lexer.parse_dictionary().map(Object::Dictionary))
            }
            Some(b'<') => self.parse_hex_string(),
            Some(b'[') => self.nested(Self::parse_array),
            Some(b'0'..=b'9' | b'+' | b'-' | b'.') => self.parse_number_or_reference(),
            Some(_) => {
                if self.eat_keyword(b"true") {
                    Ok(Object::Boolean(true))
                } else if self.eat_keyword(b"false") {
                    Ok(Object::Boolean(false))
                } else if self.eat_keyword(b"null") {
                    Ok(Object::Null)
                } else {
                    Err(self.error("unexpected token"))
                }
            }
        }
    }

    fn nested(&mut self, parse: impl FnOnce(&mut Self) -> Result<Object>) -> Result<Object> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("objects nested deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn parse_name(&mut self) -> Result<Vec<u8>> {
        self.pos += 1;
        let mut name = Vec::new();
        while let Some(byte) = self.peek() {
            if !is_regular(byte) {
                break;
            }
            if byte == b'#' {
                let hex = self.data.get(self.pos + 1..self.pos + 3);
                if let Some(value) = hex.and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok())
                {
                    name.push(value);
                    self.pos += 3;
                    continue;
                }
            }
            name.push(byte);
            self.pos += 1;
        }
        Ok(name)
    }

    fn parse_literal_string(&mut self) -> Result<Object> {
        self.pos += 1;
        let mut out = Vec::new();
        let mut depth = 1usize;
        loop {
            let byte = self.peek().ok_or_else(|| self.error("unterminated string"))?;
            self.pos += 1;
            match byte {
                b'(' => {
                    depth += 1;
                    out.push(byte);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    out.push(byte);
                }
                b'\\' => {
                    let escaped = self.peek().ok_or_else(|| self.error("unterminated escape"))?;
                    self.pos += 1;
                    match escaped {
                        b'n' => out.push(b'\n'),
                        b'r' => out.push(b'\r'),
                        b't' => out.push(b'\t'),
                        b'b' => out.push(0x08),
                        b'f' => out.push(0x0c),
                        b'\r' => {
                            if self.peek() == Some(b'\n') {
                                self.pos += 1;
                            }
                        }
                        b'\n' => {}
                        b'0'..=b'7' => {
                            let mut value = u32::from(escaped - b'0');
                            for _ in 0..2 {
                                match self.peek() {
                                    Some(d @ b'0'..=b'7') => {
                                        value = value * 8 + u32::from(d - b'0');
                                        self.pos += 1;
                                    }
                                    _ => break,
                                }
                            }
                            out.push((value & 0xff) as u8);
                        }
                        other => out.push(other),
                    }
                }
                _ => out.push(byte),
            }
        }
        Ok(Object::String(out, StringFormat::Literal))
    }

    fn parse_hex_string(&mut self) -> Result<Object> {
        self.pos += 1;
        let mut digits = Vec::new();
        loop {
            let byte = self.peek().ok_or_else(|| self.error("unterminated hex string"))?;
            self.pos += 1;
            match byte {
                b'>' => break,
                b if is_whitespace(b) => {}
                b if b.is_ascii_hexdigit() => digits.push(b),
                _ => return Err(self.error("invalid hex digit")),
            }
        }
        if digits.len() % 2 == 1 {
            digits.push(b'0');
        }
        let bytes = digits
            .chunks(2)
            .map(|pair| {
                let text = std::str::from_utf8(pair).unwrap_or("00");
                u8::from_str_radix(text, 16).unwrap_or(0)
            })
            .collect();
        Ok(Object::String(bytes, StringFormat::Hexadecimal))
    }

    fn parse_array(&mut self) -> Result<Object> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(self.error("unterminated array")),
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Object::Array(items));
                }
                Some(_) => items.push(self.parse_object()?),
            }
        }
    }

    fn parse_dictionary(&mut self) -> Result<Dictionary> {
        self.pos += 2;
        let mut dict = Dictionary::new();
        loop {
            self.skip_whitespace();
            match (self.peek(), self.peek_at(1)) {
                (None, _) => return Err(self.error("unterminated dictionary")),
                (Some(b'>'), Some(b'>')) => {
                    self.pos += 2;
                    return Ok(dict);
                }
                (Some(b'/'), _) => {
                    let key = self.parse_name()?;
                    let value = self.parse_object()?;
                    // A null value is equivalent to an absent entry
                    if value != Object::Null {
                        dict.set(key, value);
                    }
                }
                _ => return Err(self.error("dictionary key must be a name")),
            }
        }
    }

    fn parse_number_or_reference(&mut self) -> Result<Object> {
        let start = self.pos;
        if matches!(self.peek(), Some(b'+' | b'-')) {
            self.pos += 1;
        }
        let mut is_real = false;
        while let Some(byte) = self.peek() {
            match byte {
                b'0'..=b'9' => self.pos += 1,
                b'.' if !is_real => {
                    is_real = true;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        let text = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| self.error("invalid number"))?;

        if is_real {
            let value = if text == "." || text == "-." || text == "+." {
                0.0
            } else {
                text.parse::<f32>().map_err(|_| self.error("invalid real number"))?
            };
            return Ok(Object::Real(value));
        }

        let value = match text.parse::<i64>() {
            Ok(v) => v,
            Err(_) => {
                let real = text.parse::<f32>().map_err(|_| self.error("invalid number"))?;
                return Ok(Object::Real(real));
            }
        };

        // Lookahead for `<num> <gen> R`
        if value >= 0 && !text.starts_with('+') {
            let save = self.pos;
            if let Some(generation) = self.read_unsigned() {
                if self.eat_keyword(b"R") {
                    if let (Ok(number), Ok(generation)) =
                        (u32::try_from(value), u16::try_from(generation))
                    {
                        return Ok(Object::Reference(ObjectId::new(number, generation)));
                    }
                }
            }
            self.pos = save;
        }
        Ok(Object::Integer(value))
    }
}

/// First occurrence of `needle` in `haystack`
pub(crate) fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Last occurrence of `needle` in `haystack`
pub(crate) fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Object {
        Lexer::new(text.as_bytes()).parse_object().expect("parse")
    }

    #[test]
    fn test_parse_dictionary_with_reference() {
        let obj = parse("<< /Type /Page /Parent 3 0 R /MediaBox [0 0 612 792.5] >>");
        let dict = obj.as_dict().expect("dict");
        assert!(dict.has_type(b"Page"));
        assert_eq!(dict.get(b"Parent"), Some(&Object::Reference(ObjectId::new(3, 0))));
        let media_box = dict.get(b"MediaBox").and_then(Object::as_array).expect("array");
        assert_eq!(media_box[3], Object::Real(792.5));
    }

    #[test]
    fn test_integers_are_not_references_without_r() {
        let obj = parse("[1 2 3]");
        assert_eq!(
            obj,
            Object::Array(vec![Object::Integer(1), Object::Integer(2), Object::Integer(3)])
        );
    }

    #[test]
    fn test_literal_string_escapes() {
        let obj = parse(r"(a\(b\)c\\ \101 (nested))");
        assert_eq!(obj.as_str(), Some(&b"a(b)c\\ A (nested)"[..]));
    }

    #[test]
    fn test_hex_string_odd_length() {
        assert_eq!(parse("<48656C6C6F7>").as_str(), Some(&b"Hellop"[..]));
    }

    #[test]
    fn test_name_hex_escape() {
        assert_eq!(parse("/A#20B").as_name(), Some(&b"A B"[..]));
    }

    #[test]
    fn test_indirect_stream_with_wrong_length() {
        let data = b"4 0 obj\n<< /Length 99 >>\nstream\nBT ET\nendstream\nendobj\n";
        let mut lexer = Lexer::new(data);
        let (id, obj) = lexer.parse_indirect_object(|_| None).expect("object");
        assert_eq!(id, ObjectId::new(4, 0));
        assert_eq!(obj.as_stream().map(|s| s.content.as_slice()), Some(&b"BT ET"[..]));
    }

    #[test]
    fn test_indirect_length_is_resolved() {
        let data = b"5 0 obj\n<< /Length 6 0 R >>\nstream\r\nabc\nendstream\nendobj";
        let mut lexer = Lexer::new(data);
        let (_, obj) = lexer
            .parse_indirect_object(|id| (id == ObjectId::new(6, 0)).then_some(3))
            .expect("object");
        assert_eq!(obj.as_stream().map(|s| s.content.as_slice()), Some(&b"abc"[..]));
    }

    #[test]
    fn test_content_operators() {
        let mut lexer = Lexer::new(b"0.5 g (x) ' BI /W 1 ID \xffEIx EI Q");
        assert_eq!(lexer.read_operator(), None);
        assert_eq!(lexer.parse_object().expect("number"), Object::Real(0.5));
        assert_eq!(lexer.read_operator(), Some(&b"g"[..]));
        assert!(lexer.parse_object().is_ok());
        assert_eq!(lexer.read_operator(), Some(&b"'"[..]));
        assert_eq!(lexer.read_operator(), Some(&b"BI"[..]));
        assert_eq!(lexer.parse_object().expect("key"), Object::name("W"));
        assert_eq!(lexer.parse_object().expect("value"), Object::Integer(1));
        assert_eq!(lexer.read_operator(), Some(&b"ID"[..]));
        lexer.skip_inline_image();
        assert_eq!(lexer.read_operator(), Some(&b"Q"[..]));
        assert!(lexer.is_eof());
    }

    #[test]
    fn test_nesting_limit() {
        let shallow = format!("{}{}", "[".repeat(MAX_NESTING), "]".repeat(MAX_NESTING));
        assert!(Lexer::new(shallow.as_bytes()).parse_object().is_ok());

        let deep = format!("<< /X {} >>", "[".repeat(200_000));
        assert!(matches!(
            Lexer::new(deep.as_bytes()).parse_object(),
            Err(ParseError::MalformedObject { .. })
        ));
    }

    #[test]
    fn test_comments_are_skipped() {
        let obj = parse("% leading comment\n[ /A % trailing\n /B ]");
        assert_eq!(obj, Object::Array(vec![Object::name("A"), Object::name("B")]));
    }
}
