//! File structure: header, trailer and cross-reference sections

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use crate::error::ParseError;
use crate::model::filter::decode_stream;
use crate::model::lexer::{find, is_whitespace, rfind, Lexer};
use crate::model::object::{Dictionary, Object};

/// Where the bytes of one object live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XrefEntry {
    Free,
    /// Stored at a byte offset in the file
    InUse { offset: usize, generation: u16 },
    /// Stored inside an object stream
    Compressed { container: u32, index: u32 },
}

/// Merged cross-reference data of a file, newest section first
#[derive(Debug, Clone, Default)]
pub struct XrefTable {
    pub entries: BTreeMap<u32, XrefEntry>,
    pub trailer: Dictionary,
}

impl XrefTable {
    /// Merge an older section: existing (newer) entries win
    fn merge_older(&mut self, section: BTreeMap<u32, XrefEntry>) {
        for (number, entry) in section {
            self.entries.entry(number).or_insert(entry);
        }
    }
}

/// Parse the `%PDF-x.y` header and return the version
pub fn parse_header(data: &[u8]) -> Result<String, ParseError> {
    let window = &data[..data.len().min(1024)];
    let start = find(window, b"%PDF-").ok_or(ParseError::MalformedHeader)?;
    let rest = &data[start + 5..];
    let end = rest
        .iter()
        .position(|&b| is_whitespace(b) || b == b'%')
        .unwrap_or(rest.len());
    let version = std::str::from_utf8(&rest[..end]).map_err(|_| ParseError::MalformedHeader)?;

    let (major, minor) = version.split_once('.').ok_or(ParseError::MalformedHeader)?;
    if major.is_empty()
        || minor.is_empty()
        || !major.bytes().all(|b| b.is_ascii_digit())
        || !minor.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(ParseError::MalformedHeader);
    }
    if major != "1" && major != "2" {
        return Err(ParseError::UnsupportedVersion(version.to_string()));
    }
    Ok(version.to_string())
}

/// Locate and read every cross-reference section of the file
pub fn read_xref(data: &[u8]) -> Result<XrefTable, ParseError> {
    let Some(startxref) = rfind(data, b"startxref") else {
        return reconstruct(data);
    };

    let mut lexer = Lexer::at(data, startxref + b"startxref".len());
    let offset = lexer
        .read_unsigned()
        .and_then(|o| usize::try_from(o).ok())
        .ok_or_else(|| ParseError::CorruptXref("startxref offset is not a number".into()))?;

    let mut table = XrefTable::default();
    let mut visited = HashSet::new();
    let mut next = Some(offset);
    let mut newest = true;

    while let Some(offset) = next.take() {
        if !visited.insert(offset) {
            return Err(ParseError::CorruptXref(format!("xref /Prev loop at offset {offset}")));
        }
        if offset >= data.len() {
            return Err(ParseError::CorruptXref(format!("offset {offset} is past end of file")));
        }

        let (section, trailer) = read_section(data, offset)?;
        debug!(offset, entries = section.len(), "read xref section");
        table.merge_older(section);

        next = trailer
            .get(b"Prev")
            .and_then(Object::as_i64)
            .and_then(|p| usize::try_from(p).ok());
        if newest {
            table.trailer = trailer;
            newest = false;
        }
    }

    Ok(table)
}

fn read_section(
    data: &[u8],
    offset: usize,
) -> Result<(BTreeMap<u32, XrefEntry>, Dictionary), ParseError> {
    let mut lexer = Lexer::at(data, offset);
    if lexer.eat_keyword(b"xref") {
        let (mut section, trailer) = read_table(&mut lexer)?;

        // Hybrid files keep compressed objects in a side xref stream
        if let Some(stm) = trailer.get(b"XRefStm").and_then(Object::as_i64) {
            let stm = usize::try_from(stm)
                .map_err(|_| ParseError::CorruptXref("negative /XRefStm".into()))?;
            let (side, _) = read_stream_section(data, stm)?;
            for (number, entry) in side {
                let slot = section.entry(number).or_insert(XrefEntry::Free);
                if *slot == XrefEntry::Free {
                    *slot = entry;
                }
            }
        }
        Ok((section, trailer))
    } else {
        read_stream_section(data, offset)
    }
}

fn read_table(lexer: &mut Lexer) -> Result<(BTreeMap<u32, XrefEntry>, Dictionary), ParseError> {
    let corrupt = |what: &str| ParseError::CorruptXref(what.to_string());
    let mut section = BTreeMap::new();

    while !lexer.peek_keyword(b"trailer") {
        let first = lexer.read_unsigned().ok_or_else(|| corrupt("expected subsection start"))?;
        let count = lexer.read_unsigned().ok_or_else(|| corrupt("expected subsection count"))?;
        for i in 0..count {
            let offset = lexer.read_unsigned().ok_or_else(|| corrupt("expected entry offset"))?;
            let generation =
                lexer.read_unsigned().ok_or_else(|| corrupt("expected entry generation"))?;
            let number = u32::try_from(first + i).map_err(|_| corrupt("object number overflow"))?;
            let entry = if lexer.eat_keyword(b"n") {
                XrefEntry::InUse {
                    offset: usize::try_from(offset).map_err(|_| corrupt("offset overflow"))?,
                    generation: u16::try_from(generation).unwrap_or(u16::MAX),
                }
            } else if lexer.eat_keyword(b"f") {
                XrefEntry::Free
            } else {
                return Err(corrupt("entry type must be 'n' or 'f'"));
            };
            section.entry(number).or_insert(entry);
        }
    }

    lexer.expect_keyword(b"trailer").map_err(|_| ParseError::MissingTrailer)?;
    let trailer = match lexer.parse_object() {
        Ok(Object::Dictionary(dict)) => dict,
        _ => return Err(ParseError::MissingTrailer),
    };
    Ok((section, trailer))
}

fn read_stream_section(
    data: &[u8],
    offset: usize,
) -> Result<(BTreeMap<u32, XrefEntry>, Dictionary), ParseError> {
    let mut lexer = Lexer::at(data, offset);
    let (_, object) = lexer
        .parse_indirect_object(|_| None)
        .map_err(|e| ParseError::CorruptXref(format!("no xref section at offset {offset}: {e}")))?;
    let stream = match object {
        Object::Stream(stream) if stream.dict.has_type(b"XRef") => stream,
        _ => {
            return Err(ParseError::CorruptXref(format!(
                "object at offset {offset} is not a cross-reference stream"
            )))
        }
    };

    let widths: Vec<usize> = stream
        .dict
        .get(b"W")
        .and_then(Object::as_array)
        .map(|w| w.iter().filter_map(Object::as_i64).map(|n| n.max(0) as usize).collect())
        .unwrap_or_default();
    if widths.len() != 3 {
        return Err(ParseError::CorruptXref("xref stream /W must have three entries".into()));
    }
    // Fields are big-endian integers of at most eight bytes
    if let Some(width) = widths.iter().find(|&&w| w > 8) {
        return Err(ParseError::CorruptXref(format!("xref stream field width {width} is too large")));
    }

    let size = stream.dict.get(b"Size").and_then(Object::as_i64).unwrap_or(0);
    let index: Vec<i64> = match stream.dict.get(b"Index").and_then(Object::as_array) {
        Some(items) => items.iter().filter_map(Object::as_i64).collect(),
        None => vec![0, size],
    };

    let body = decode_stream(&stream).map_err(ParseError::CorruptXref)?;
    let row_len: usize = widths.iter().sum();
    if row_len == 0 {
        return Err(ParseError::CorruptXref("xref stream rows are empty".into()));
    }

    let mut rows = body.chunks_exact(row_len);
    let mut section = BTreeMap::new();
    for pair in index.chunks(2) {
        let [first, count] = pair else {
            return Err(ParseError::CorruptXref("odd /Index array".into()));
        };
        for i in 0..(*count).max(0) {
            let row = rows
                .next()
                .ok_or_else(|| ParseError::CorruptXref("xref stream is truncated".into()))?;
            let (a, rest) = row.split_at(widths[0]);
            let (b, c) = rest.split_at(widths[1]);
            let kind = if widths[0] == 0 { 1 } else { be_number(a) };
            let number = first
                .checked_add(i)
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| ParseError::CorruptXref("object number overflow".into()))?;
            let entry = match kind {
                0 => XrefEntry::Free,
                1 => XrefEntry::InUse {
                    offset: be_number(b) as usize,
                    generation: u16::try_from(be_number(c)).unwrap_or(u16::MAX),
                },
                2 => XrefEntry::Compressed {
                    container: be_number(b) as u32,
                    index: be_number(c) as u32,
                },
                // Unknown types are treated as null objects
                _ => XrefEntry::Free,
            };
            section.entry(number).or_insert(entry);
        }
    }

    Ok((section, stream.dict))
}

fn be_number(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b))
}

/// Rebuild the table by scanning for `N G obj` when no startxref exists
///
/// The trailer is taken from the last `trailer` keyword in the file.
fn reconstruct(data: &[u8]) -> Result<XrefTable, ParseError> {
    let trailer_pos = rfind(data, b"trailer").ok_or(ParseError::MissingTrailer)?;
    let mut lexer = Lexer::at(data, trailer_pos + b"trailer".len());
    let trailer = match lexer.parse_object() {
        Ok(Object::Dictionary(dict)) => dict,
        _ => return Err(ParseError::MissingTrailer),
    };

    let mut entries = BTreeMap::new();
    let mut search = 0;
    while let Some(found) = find(&data[search..], b" obj") {
        let keyword = search + found + 1;
        search = keyword + 3;
        if let Some((number, generation, offset)) = header_before(data, keyword) {
            // Later definitions belong to incremental updates and win
            entries.insert(number, XrefEntry::InUse { offset, generation });
        }
    }
    debug!(objects = entries.len(), "reconstructed xref by scanning");
    Ok(XrefTable { entries, trailer })
}

fn header_before(data: &[u8], keyword: usize) -> Option<(u32, u16, usize)> {
    let mut start = keyword;
    // Walk back over "<num> <gen> "
    for _ in 0..2 {
        while start > 0 && is_whitespace(data[start - 1]) {
            start -= 1;
        }
        let end = start;
        while start > 0 && data[start - 1].is_ascii_digit() {
            start -= 1;
        }
        if start == end {
            return None;
        }
    }
    let mut lexer = Lexer::at(data, start);
    let id = lexer.parse_object_header().ok()?;
    Some((id.number, id.generation, start))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_versions() {
        assert_eq!(parse_header(b"%PDF-1.7\n").expect("header"), "1.7");
        assert_eq!(parse_header(b"junk%PDF-2.0\r").expect("header"), "2.0");
        assert_eq!(parse_header(b"hello"), Err(ParseError::MalformedHeader));
        assert_eq!(parse_header(b"%PDF-x.y\n"), Err(ParseError::MalformedHeader));
        assert_eq!(
            parse_header(b"%PDF-3.0\n"),
            Err(ParseError::UnsupportedVersion("3.0".to_string()))
        );
    }

    #[test]
    fn test_classic_table_and_trailer() {
        let body = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\n";
        let xref_at = body.len();
        let mut data = body.to_vec();
        data.extend_from_slice(
            format!(
                "xref\n0 2\n0000000000 65535 f \n0000000009 00000 n \ntrailer\n<< /Size 2 /Root 1 0 R >>\nstartxref\n{xref_at}\n%%EOF\n"
            )
            .as_bytes(),
        );

        let table = read_xref(&data).expect("xref");
        assert_eq!(table.entries.get(&0), Some(&XrefEntry::Free));
        assert_eq!(table.entries.get(&1), Some(&XrefEntry::InUse { offset: 9, generation: 0 }));
        assert!(table.trailer.contains_key(b"Root"));
    }

    #[test]
    fn test_missing_trailer() {
        let data = b"%PDF-1.4\n1 0 obj\n<< >>\nendobj\n";
        assert!(matches!(read_xref(data), Err(ParseError::MissingTrailer)));
    }

    #[test]
    fn test_bad_startxref_offset() {
        let data = b"%PDF-1.4\nstartxref\n99999\n%%EOF";
        assert!(matches!(read_xref(data), Err(ParseError::CorruptXref(_))));
    }

    fn xref_stream_file(dict: &str, body: &[u8]) -> Vec<u8> {
        let mut data = b"%PDF-1.5\n".to_vec();
        data.extend_from_slice(
            format!("1 0 obj\n<< /Type /XRef {dict} /Length {} >>\nstream\n", body.len()).as_bytes(),
        );
        data.extend_from_slice(body);
        data.extend_from_slice(b"\nendstream\nendobj\nstartxref\n9\n%%EOF\n");
        data
    }

    #[test]
    fn test_xref_stream_rejects_huge_field_widths() {
        let data = xref_stream_file("/W [1 9223372036854775807 9223372036854775807] /Size 1", &[0; 4]);
        assert!(matches!(read_xref(&data), Err(ParseError::CorruptXref(_))));
    }

    #[test]
    fn test_xref_stream_rejects_object_number_overflow() {
        let data = xref_stream_file("/W [1 2 1] /Index [9223372036854775807 2] /Size 2", &[1, 0, 9, 0, 1, 0, 9, 0]);
        assert!(matches!(read_xref(&data), Err(ParseError::CorruptXref(_))));
    }

    #[test]
    fn test_reconstruct_without_startxref() {
        let data = b"%PDF-1.4\n1 0 obj\n<< /Type /Catalog >>\nendobj\ntrailer\n<< /Root 1 0 R >>\n";
        let table = read_xref(data).expect("reconstructed");
        assert_eq!(table.entries.get(&1), Some(&XrefEntry::InUse { offset: 9, generation: 0 }));
    }
}
