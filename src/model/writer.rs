//! Serializer: reachable objects to PDF bytes

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::document::Document;
use crate::model::lexer::{is_delimiter, is_whitespace};
use crate::model::object::{Dictionary, Object, ObjectId, StringFormat};

/// Serialize every object reachable from the trailer's Root and Info
///
/// Objects are written in ascending identifier order with generation 0, and
/// stream `/Length` is always rewritten as a direct integer.
pub fn write_document(doc: &Document) -> Result<Vec<u8>> {
    let reachable = reachable_objects(doc)?;

    let mut generations: BTreeMap<u32, u16> = BTreeMap::new();
    for id in &reachable {
        if let Some(existing) = generations.insert(id.number, id.generation) {
            return Err(Error::Serialization(format!(
                "object number {} is reachable with generations {existing} and {}",
                id.number, id.generation
            )));
        }
    }

    let mut out = Vec::new();
    write!(out, "%PDF-{}\n%", doc.version())?;
    out.extend_from_slice(&[0xE2, 0xE3, 0xCF, 0xD3, b'\n']);

    let mut offsets: BTreeMap<u32, usize> = BTreeMap::new();
    for id in &reachable {
        let object = match doc.store().get(*id) {
            Ok(object) => object,
            Err(Error::MissingObject(_)) => {
                return Err(Error::Serialization(format!("reachable object {id} is missing")))
            }
            Err(other) => return Err(other),
        };
        offsets.insert(id.number, out.len());
        write!(out, "{} 0 obj\n", id.number)?;
        write_indirect_body(&mut out, object)?;
        out.extend_from_slice(b"\nendobj\n");
    }

    let xref_offset = out.len();
    let size = offsets.keys().next_back().map_or(1, |max| max + 1);
    write_xref(&mut out, &offsets)?;

    let mut trailer = Dictionary::new();
    trailer.set("Size", Object::Integer(i64::from(size)));
    for key in [&b"Root"[..], &b"Info"[..], &b"ID"[..]] {
        if let Some(value) = doc.trailer().get(key) {
            trailer.set(key, normalize_generation(value.clone()));
        }
    }
    out.extend_from_slice(b"trailer\n");
    write_object(&mut out, &Object::Dictionary(trailer))?;
    write!(out, "\nstartxref\n{xref_offset}\n%%EOF\n")?;

    debug!(objects = reachable.len(), bytes = out.len(), "serialized document");
    Ok(out)
}

/// Identifiers reachable from Root and Info, ascending
fn reachable_objects(doc: &Document) -> Result<BTreeSet<ObjectId>> {
    let mut seen = BTreeSet::new();
    let mut stack: Vec<ObjectId> = Vec::new();
    for key in [&b"Root"[..], &b"Info"[..]] {
        if let Some(id) = doc.trailer().get(key).and_then(Object::as_reference) {
            stack.push(id);
        }
    }

    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        match doc.store().get(id) {
            Ok(object) => collect_references(object, &mut stack),
            Err(Error::MissingObject(_)) => {
                return Err(Error::Serialization(format!("reachable object {id} is missing")))
            }
            Err(other) => return Err(other),
        }
    }
    Ok(seen)
}

/// Push every reference nested in `object` onto `out`
pub(crate) fn collect_references(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => items.iter().for_each(|item| collect_references(item, out)),
        Object::Dictionary(dict) => dict.iter().for_each(|(_, value)| collect_references(value, out)),
        Object::Stream(stream) => {
            stream.dict.iter().for_each(|(_, value)| collect_references(value, out))
        }
        _ => {}
    }
}

fn normalize_generation(object: Object) -> Object {
    match object {
        Object::Reference(id) => Object::Reference(ObjectId::new(id.number, 0)),
        other => other,
    }
}

/// Write the xref table as runs of consecutive object numbers
fn write_xref(out: &mut Vec<u8>, offsets: &BTreeMap<u32, usize>) -> Result<()> {
    out.extend_from_slice(b"xref\n0 1\n0000000000 65535 f \n");
    let numbers: Vec<u32> = offsets.keys().copied().collect();
    let mut start = 0;
    while start < numbers.len() {
        let mut end = start + 1;
        while end < numbers.len() && numbers[end] == numbers[end - 1] + 1 {
            end += 1;
        }
        write!(out, "{} {}\n", numbers[start], end - start)?;
        for number in &numbers[start..end] {
            write!(out, "{:010} 00000 n \n", offsets[number])?;
        }
        start = end;
    }
    Ok(())
}

fn write_indirect_body(out: &mut Vec<u8>, object: &Object) -> Result<()> {
    match object {
        Object::Stream(stream) => {
            let mut dict = stream.dict.clone();
            dict.set("Length", Object::Integer(stream.content.len() as i64));
            write_dictionary(out, &dict)?;
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(&stream.content);
            out.extend_from_slice(b"\nendstream");
            Ok(())
        }
        other => write_object(out, other),
    }
}

/// Write a direct object
pub(crate) fn write_object(out: &mut Vec<u8>, object: &Object) -> Result<()> {
    match object {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(value) => out.extend_from_slice(if *value { &b"true"[..] } else { &b"false"[..] }),
        Object::Integer(value) => write!(out, "{value}")?,
        Object::Real(value) => out.extend_from_slice(format_number(*value).as_bytes()),
        Object::String(bytes, StringFormat::Literal) => write_literal_string(out, bytes),
        Object::String(bytes, StringFormat::Hexadecimal) => {
            out.push(b'<');
            for byte in bytes {
                write!(out, "{byte:02X}")?;
            }
            out.push(b'>');
        }
        Object::Name(name) => write_name(out, name),
        Object::Array(items) => {
            out.push(b'[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(b' ');
                }
                write_object(out, item)?;
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => write_dictionary(out, dict)?,
        Object::Stream(_) => {
            return Err(Error::Serialization("stream nested inside a direct object".into()))
        }
        Object::Reference(id) => write!(out, "{} 0 R", id.number)?,
    }
    Ok(())
}

fn write_dictionary(out: &mut Vec<u8>, dict: &Dictionary) -> Result<()> {
    out.extend_from_slice(b"<<");
    for (key, value) in dict.iter() {
        out.push(b' ');
        write_name(out, key);
        out.push(b' ');
        write_object(out, value)?;
    }
    out.extend_from_slice(b" >>");
    Ok(())
}

fn write_name(out: &mut Vec<u8>, name: &[u8]) {
    out.push(b'/');
    for &byte in name {
        if byte == b'#' || is_whitespace(byte) || is_delimiter(byte) || !(0x21..=0x7E).contains(&byte) {
            out.extend_from_slice(format!("#{byte:02X}").as_bytes());
        } else {
            out.push(byte);
        }
    }
}

fn write_literal_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'(');
    for &byte in bytes {
        match byte {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(byte);
            }
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\n' => out.extend_from_slice(b"\\n"),
            _ => out.push(byte),
        }
    }
    out.push(b')');
}

/// Format a number for content streams and object bodies
///
/// Whole values print without a decimal point; others keep at most five
/// decimals with trailing zeros trimmed.
pub(crate) fn format_number(value: f32) -> String {
    if value.fract() == 0.0 && value.abs() < 1e9 {
        return format!("{}", value as i64);
    }
    let text = format!("{value:.5}");
    let trimmed = text.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::object::Stream;

    fn serialize(object: &Object) -> String {
        let mut out = Vec::new();
        write_object(&mut out, object).expect("write");
        String::from_utf8_lossy(&out).into_owned()
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(612.0), "612");
        assert_eq!(format_number(0.5), "0.5");
        assert_eq!(format_number(-12.25), "-12.25");
        assert_eq!(format_number(0.707_106_8), "0.70711");
    }

    #[test]
    fn test_name_and_string_escaping() {
        assert_eq!(serialize(&Object::Name(b"A B#C".to_vec())), "/A#20B#23C");
        assert_eq!(serialize(&Object::string_literal("a(b)\\")), "(a\\(b\\)\\\\)");
        assert_eq!(
            serialize(&Object::String(vec![0xFE, 0xFF], StringFormat::Hexadecimal)),
            "<FEFF>"
        );
    }

    #[test]
    fn test_references_drop_generation() {
        let object = Object::Array(vec![Object::Reference(ObjectId::new(4, 2)), Object::Null]);
        assert_eq!(serialize(&object), "[4 0 R null]");
    }

    #[test]
    fn test_nested_stream_is_rejected() {
        let stream = Stream::new(Dictionary::new(), Vec::new());
        let mut out = Vec::new();
        let result = write_object(&mut out, &Object::Array(vec![stream.into()]));
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[test]
    fn test_unreachable_objects_are_skipped() {
        let mut doc = Document::new();
        let orphan = doc.add_object(Object::string_literal("orphan"));
        let bytes = doc.save().expect("save");
        let text = String::from_utf8_lossy(&bytes);
        assert!(!text.contains(&format!("{} 0 obj", orphan.number)));
        assert!(text.starts_with("%PDF-1.7\n"));
        assert!(text.ends_with("%%EOF\n"));
    }

    #[test]
    fn test_xref_subsections_follow_gaps() {
        let offsets = BTreeMap::from([(1, 15), (2, 40), (5, 90)]);
        let mut out = Vec::new();
        write_xref(&mut out, &offsets).expect("xref");
        let text = String::from_utf8(out).expect("ascii");
        assert!(text.contains("1 2\n0000000015 00000 n \n0000000040 00000 n \n5 1\n"));
    }

    #[test]
    fn test_stream_length_is_direct() {
        let mut doc = Document::new();
        let mut dict = Dictionary::new();
        dict.set("Length", Object::Reference(ObjectId::new(77, 0)));
        let stream = doc.add_object(Stream::new(dict, b"BT ET".to_vec()).into());
        let catalog = doc.catalog_id();
        doc.get_object_mut(catalog)
            .expect("catalog")
            .as_dict_mut()
            .expect("dict")
            .set("Extra", stream);
        let bytes = doc.save().expect("save");
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("<< /Length 5 >>\nstream\nBT ET\nendstream"));
    }
}
