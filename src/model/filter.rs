//! Stream filters needed by the engine itself
//!
//! Only FlateDecode (with PNG predictors) is decoded: it is what xref
//! streams and object streams use. Page content and image streams are
//! copied as opaque encoded bytes and never need decoding.

use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::model::object::{Object, Stream};

/// Decode a stream's content through its filter chain
pub fn decode_stream(stream: &Stream) -> Result<Vec<u8>, String> {
    let mut data = stream.content.clone();
    let params = stream.dict.get(b"DecodeParms");
    for (index, filter) in stream.filters().iter().enumerate() {
        data = match *filter {
            b"FlateDecode" | b"Fl" => {
                let inflated = inflate(&data)?;
                let parms = match params {
                    Some(Object::Array(items)) => items.get(index),
                    other => other,
                };
                apply_predictor(inflated, parms)?
            }
            other => {
                return Err(format!("unsupported filter /{}", String::from_utf8_lossy(other)));
            }
        };
    }
    Ok(data)
}

/// Inflate zlib data, falling back to raw deflate for streams with a bad header
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    match ZlibDecoder::new(data).read_to_end(&mut out) {
        Ok(_) => Ok(out),
        Err(zlib_err) => {
            out.clear();
            let body = data.get(2..).unwrap_or_default();
            DeflateDecoder::new(body)
                .read_to_end(&mut out)
                .map(|_| out)
                .map_err(|_| format!("inflate failed: {zlib_err}"))
        }
    }
}

/// Compress bytes for a FlateDecode stream
pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    // Writing into a Vec cannot fail
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

fn apply_predictor(data: Vec<u8>, parms: Option<&Object>) -> Result<Vec<u8>, String> {
    let Some(parms) = parms.and_then(Object::as_dict) else {
        return Ok(data);
    };
    let int = |key: &[u8], default: i64| parms.get(key).and_then(Object::as_i64).unwrap_or(default);

    let predictor = int(b"Predictor", 1);
    if predictor < 10 {
        if predictor == 1 {
            return Ok(data);
        }
        return Err(format!("unsupported predictor {predictor}"));
    }

    let colors = int(b"Colors", 1).max(1) as usize;
    let bits = int(b"BitsPerComponent", 8).max(1) as usize;
    let columns = int(b"Columns", 1).max(1) as usize;
    let bits_per_pixel = colors
        .checked_mul(bits)
        .ok_or_else(|| format!("predictor pixel size overflows ({colors} colors x {bits} bits)"))?;
    let bytes_per_pixel = bits_per_pixel.div_ceil(8).max(1);
    let row_len = bits_per_pixel
        .checked_mul(columns)
        .map(|row_bits| row_bits.div_ceil(8))
        .ok_or_else(|| format!("predictor row size overflows ({columns} columns)"))?;
    if data.is_empty() {
        return Ok(data);
    }
    // A row never holds more bytes than the stream itself
    if row_len >= data.len() {
        return Err(format!("predictor row of {row_len} bytes exceeds the {} byte stream", data.len()));
    }

    let mut out = Vec::with_capacity(data.len());
    let mut previous = vec![0u8; row_len];
    for chunk in data.chunks(row_len + 1) {
        let (&kind, raw) = chunk.split_first().ok_or("empty predictor row")?;
        let mut row = raw.to_vec();
        row.resize(row_len, 0);
        for i in 0..row_len {
            let left = if i >= bytes_per_pixel { row[i - bytes_per_pixel] } else { 0 };
            let up = previous[i];
            let up_left = if i >= bytes_per_pixel { previous[i - bytes_per_pixel] } else { 0 };
            row[i] = match kind {
                0 => row[i],
                1 => row[i].wrapping_add(left),
                2 => row[i].wrapping_add(up),
                3 => row[i].wrapping_add(((u16::from(left) + u16::from(up)) / 2) as u8),
                4 => row[i].wrapping_add(paeth(left, up, up_left)),
                other => return Err(format!("invalid PNG row filter {other}")),
            };
        }
        out.extend_from_slice(&row);
        previous = row;
    }
    Ok(out)
}

fn paeth(a: u8, b: u8, c: u8) -> u8 {
    let p = i16::from(a) + i16::from(b) - i16::from(c);
    let pa = (p - i16::from(a)).abs();
    let pb = (p - i16::from(b)).abs();
    let pc = (p - i16::from(c)).abs();
    if pa <= pb && pa <= pc {
        a
    } else if pb <= pc {
        b
    } else {
        c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::object::Dictionary;

    #[test]
    fn test_flate_stream_decodes() {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::name("FlateDecode"));
        let stream = Stream::new(dict, deflate(b"hello xref"));
        assert_eq!(decode_stream(&stream).expect("decode"), b"hello xref");
    }

    #[test]
    fn test_png_up_predictor() {
        // Two rows of three columns, second row uses the Up filter
        let raw = [0u8, 1, 2, 3, 2, 1, 1, 1];
        let mut parms = Dictionary::new();
        parms.set("Predictor", Object::Integer(12));
        parms.set("Columns", Object::Integer(3));
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::name("FlateDecode"));
        dict.set("DecodeParms", Object::Dictionary(parms));
        let stream = Stream::new(dict, deflate(&raw));
        assert_eq!(decode_stream(&stream).expect("decode"), vec![1, 2, 3, 2, 3, 4]);
    }

    #[test]
    fn test_oversized_predictor_rows_are_rejected() {
        for columns in [i64::MAX, 1 << 40, 64] {
            let mut parms = Dictionary::new();
            parms.set("Predictor", Object::Integer(12));
            parms.set("Columns", Object::Integer(columns));
            parms.set("Colors", Object::Integer(4));
            let mut dict = Dictionary::new();
            dict.set("Filter", Object::name("FlateDecode"));
            dict.set("DecodeParms", Object::Dictionary(parms));
            let stream = Stream::new(dict, deflate(&[2, 0, 0, 0, 0]));
            assert!(decode_stream(&stream).is_err(), "columns {columns}");
        }
    }

    #[test]
    fn test_unknown_filter_is_rejected() {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::name("JBIG2Decode"));
        assert!(decode_stream(&Stream::new(dict, vec![1, 2])).is_err());
    }
}
