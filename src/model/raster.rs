//! Image Frame Embedder: raster images as image XObjects on their own pages

use image::{GenericImageView, ImageFormat};
use tracing::{debug, warn};

use crate::error::Result;
use crate::layout::{fit_centered, PageDimensions, Placement};
use crate::model::content::{add_resource, ContentBuilder, ResourceKind};
use crate::model::document::{Document, PageHandle};
use crate::model::filter::deflate;
use crate::model::object::{Dictionary, Object, ObjectId, Stream};

/// A decoded image ready to become an image XObject
#[derive(Debug, Clone)]
pub struct ImageXObject {
    pub width: u32,
    pub height: u32,
    color_space: &'static str,
    filter: &'static str,
    /// Adobe-style inverted CMYK samples
    inverted: bool,
    data: Vec<u8>,
    alpha: Option<Vec<u8>>,
}

impl ImageXObject {
    pub fn has_alpha(&self) -> bool {
        self.alpha.is_some()
    }
}

/// Decode image bytes into an embeddable XObject
///
/// Returns `Ok(None)` for codecs this engine does not embed (anything but
/// JPEG and PNG). A JPEG or PNG that fails to decode is an error.
pub fn decode_image(bytes: &[u8]) -> Result<Option<ImageXObject>> {
    let format = match image::guess_format(bytes) {
        Ok(format @ (ImageFormat::Jpeg | ImageFormat::Png)) => format,
        Ok(other) => {
            warn!(format = ?other, "unsupported image format");
            return Ok(None);
        }
        Err(_) => {
            warn!("unrecognized image data");
            return Ok(None);
        }
    };

    let decoded = image::load_from_memory_with_format(bytes, format)?;
    let (width, height) = decoded.dimensions();

    // JPEG data is embedded as is, so the color space follows the frame
    // header rather than the decoder's RGB output
    if format == ImageFormat::Jpeg {
        let header = JpegHeader::scan(bytes);
        let color_space = match header.components {
            Some(1) => "DeviceGray",
            Some(4) => "DeviceCMYK",
            _ => "DeviceRGB",
        };
        return Ok(Some(ImageXObject {
            width,
            height,
            color_space,
            filter: "DCTDecode",
            inverted: color_space == "DeviceCMYK" && header.adobe,
            data: bytes.to_vec(),
            alpha: None,
        }));
    }

    let rgba = decoded.to_rgba8();
    let mut rgb = Vec::with_capacity(width as usize * height as usize * 3);
    let mut alpha = Vec::with_capacity(width as usize * height as usize);
    let mut has_alpha = false;
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        has_alpha |= a != 255;
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }

    Ok(Some(ImageXObject {
        width,
        height,
        color_space: "DeviceRGB",
        filter: "FlateDecode",
        inverted: false,
        data: deflate(&rgb),
        alpha: has_alpha.then(|| deflate(&alpha)),
    }))
}

/// Facts read from the JPEG marker segments
#[derive(Debug, Default, PartialEq)]
struct JpegHeader {
    /// Component count of the first frame header
    components: Option<u8>,
    /// An Adobe APP14 segment is present
    adobe: bool,
}

impl JpegHeader {
    fn scan(bytes: &[u8]) -> Self {
        let mut header = Self::default();
        let mut at = 2;
        while let (Some(&0xFF), Some(&marker)) = (bytes.get(at), bytes.get(at + 1)) {
            // Fill bytes and standalone markers carry no length
            if marker == 0xFF {
                at += 1;
                continue;
            }
            if marker == 0x01 || (0xD0..=0xD7).contains(&marker) {
                at += 2;
                continue;
            }
            // Start of scan: entropy-coded data follows
            if marker == 0xDA {
                break;
            }
            let Some(&[high, low]) = bytes.get(at + 2..at + 4) else {
                break;
            };
            let length = usize::from(u16::from_be_bytes([high, low]));
            let segment = bytes.get(at + 4..(at + 2 + length).min(bytes.len())).unwrap_or_default();
            match marker {
                0xEE if segment.starts_with(b"Adobe") => header.adobe = true,
                0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                    if header.components.is_none() {
                        header.components = segment.get(5).copied();
                    }
                }
                _ => {}
            }
            if length < 2 {
                break;
            }
            at += 2 + length;
        }
        header
    }
}

fn image_dict(width: u32, height: u32, color_space: &str, filter: &str) -> Dictionary {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::name("XObject"));
    dict.set("Subtype", Object::name("Image"));
    dict.set("Width", Object::Integer(i64::from(width)));
    dict.set("Height", Object::Integer(i64::from(height)));
    dict.set("ColorSpace", Object::name(color_space));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::name(filter));
    dict
}

/// Store the image (and its soft mask) in `doc`
pub fn embed_image(doc: &mut Document, image: &ImageXObject) -> ObjectId {
    let mut dict = image_dict(image.width, image.height, image.color_space, image.filter);
    if image.inverted {
        let decode = [1, 0, 1, 0, 1, 0, 1, 0].map(Object::Integer);
        dict.set("Decode", Object::Array(decode.to_vec()));
    }
    if let Some(alpha) = &image.alpha {
        let mask = image_dict(image.width, image.height, "DeviceGray", "FlateDecode");
        let mask_id = doc.add_object(Stream::new(mask, alpha.clone()).into());
        dict.set("SMask", mask_id);
    }
    doc.add_object(Stream::new(dict, image.data.clone()).into())
}

/// Append a page of size `canvas` showing `image` fitted and centered
pub fn add_image_page(
    doc: &mut Document,
    image: &ImageXObject,
    canvas: PageDimensions,
) -> Result<(PageHandle, Placement)> {
    let placement = fit_centered(canvas, image.width as f32, image.height as f32);
    let image_id = embed_image(doc, image);

    let mut page = Dictionary::new();
    page.set("Type", Object::name("Page"));
    page.set(
        "MediaBox",
        Object::Array(vec![
            Object::Integer(0),
            Object::Integer(0),
            Object::Real(canvas.width),
            Object::Real(canvas.height),
        ]),
    );
    let handle = PageHandle::new(doc.add_object(page.into()));
    let end = doc.page_count();
    doc.insert_pages(end, &[handle])?;

    let name = add_resource(doc, handle, ResourceKind::XObject, "Im", image_id)?;
    let mut content = ContentBuilder::new();
    content
        .save_state()
        .transform([placement.width, 0.0, 0.0, placement.height, placement.x, placement.y])
        .draw_xobject(&name)
        .restore_state();
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content.into_bytes()).into());
    doc.page_dict_mut(handle)?.set("Contents", content_id);
    debug!(
        width = image.width,
        height = image.height,
        scale = placement.scale,
        "added image page"
    );
    Ok((handle, placement))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, Rgb, Rgba};
    use std::io::Cursor;

    fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        image.write_to(&mut bytes, format).expect("encode");
        bytes.into_inner()
    }

    #[test]
    fn test_opaque_png_has_no_mask() {
        let buffer = ImageBuffer::from_pixel(4, 2, Rgb([10u8, 20, 30]));
        let image = decode_image(&encode(buffer.into(), ImageFormat::Png)).expect("decode").expect("png");
        assert_eq!((image.width, image.height), (4, 2));
        assert!(!image.has_alpha());
    }

    #[test]
    fn test_translucent_png_gets_soft_mask() {
        let buffer = ImageBuffer::from_pixel(2, 2, Rgba([0u8, 0, 0, 128]));
        let image = decode_image(&encode(buffer.into(), ImageFormat::Png)).expect("decode").expect("png");
        let mut doc = Document::new();
        let id = embed_image(&mut doc, &image);
        let dict = doc.get_object(id).expect("image").as_dict().expect("dict");
        assert!(dict.get(b"SMask").and_then(Object::as_reference).is_some());
    }

    #[test]
    fn test_jpeg_passes_through() {
        let buffer = ImageBuffer::from_pixel(8, 8, Rgb([200u8, 100, 50]));
        let bytes = encode(buffer.into(), ImageFormat::Jpeg);
        let image = decode_image(&bytes).expect("decode").expect("jpeg");
        assert_eq!(image.filter, "DCTDecode");
        assert_eq!(image.data, bytes);
    }

    #[test]
    fn test_gray_jpeg_uses_device_gray() {
        let buffer = ImageBuffer::from_pixel(8, 8, image::Luma([90u8]));
        let image = decode_image(&encode(buffer.into(), ImageFormat::Jpeg)).expect("decode").expect("jpeg");
        assert_eq!(image.color_space, "DeviceGray");
        assert!(!image.inverted);
    }

    fn segment(marker: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, marker];
        out.extend_from_slice(&(body.len() as u16 + 2).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_jpeg_header_reads_cmyk_frame() {
        let mut bytes = vec![0xFF, 0xD8];
        bytes.extend(segment(0xE0, b"JFIF\0\x01\x01\0\0\x01\0\x01\0\0"));
        bytes.extend(segment(0xEE, b"Adobe\0\x64\0\0\0\0\x02"));
        bytes.extend(segment(0xC4, &[0; 20]));
        bytes.extend(segment(0xC0, &[8, 0, 16, 0, 16, 4, 1, 0x11, 0, 2, 0x11, 0, 3, 0x11, 0, 4, 0x11, 0]));
        bytes.extend(segment(0xDA, &[0; 10]));
        assert_eq!(JpegHeader::scan(&bytes), JpegHeader { components: Some(4), adobe: true });

        let plain = [&[0xFF, 0xD8][..], &segment(0xC2, &[8, 0, 1, 0, 1, 3])[..]].concat();
        assert_eq!(JpegHeader::scan(&plain), JpegHeader { components: Some(3), adobe: false });
        assert_eq!(JpegHeader::scan(&[0xFF, 0xD8, 0xFF]), JpegHeader::default());
    }

    #[test]
    fn test_inverted_cmyk_gets_decode_array() {
        let image = ImageXObject {
            width: 2,
            height: 2,
            color_space: "DeviceCMYK",
            filter: "DCTDecode",
            inverted: true,
            data: vec![0xFF, 0xD8],
            alpha: None,
        };
        let mut doc = Document::new();
        let id = embed_image(&mut doc, &image);
        let dict = doc.get_object(id).expect("image").as_dict().expect("dict");
        assert_eq!(dict.get(b"ColorSpace"), Some(&Object::name("DeviceCMYK")));
        let decode = dict.get(b"Decode").and_then(Object::as_array).expect("decode");
        assert_eq!(decode.len(), 8);
        assert_eq!(decode[0], Object::Integer(1));
    }

    #[test]
    fn test_unknown_bytes_are_skipped() {
        assert!(decode_image(b"GIF89a....").expect("no error").is_none());
        assert!(decode_image(b"not an image").expect("no error").is_none());
    }

    #[test]
    fn test_truncated_png_is_an_error() {
        let buffer = ImageBuffer::from_pixel(4, 4, Rgb([1u8, 2, 3]));
        let bytes = encode(buffer.into(), ImageFormat::Png);
        assert!(decode_image(&bytes[..bytes.len() / 2]).is_err());
    }

    #[test]
    fn test_image_page_layout() {
        let buffer = ImageBuffer::from_pixel(1000, 2000, Rgb([255u8, 255, 255]));
        let image = decode_image(&encode(buffer.into(), ImageFormat::Png)).expect("decode").expect("png");
        let mut doc = Document::new();
        let (page, placement) = add_image_page(&mut doc, &image, PageDimensions::a4()).expect("page");
        assert!((placement.x - 87.19).abs() < 0.1);
        assert_eq!(doc.page_count(), 1);
        let media_box = doc.media_box(page).expect("box");
        assert!((media_box.width() - 595.28).abs() < 0.01);

        let resources = doc.page_dict(page).expect("page").get(b"Resources").and_then(Object::as_dict);
        let xobjects = resources.and_then(|r| r.get(b"XObject")).and_then(Object::as_dict).expect("xobjects");
        assert!(xobjects.get(b"Im0").and_then(Object::as_reference).is_some());
    }
}
