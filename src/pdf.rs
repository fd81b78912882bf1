//! PDF text extraction and page-image fallback using lopdf.
//!
//! Scanned PDFs usually carry one image XObject per page and no text layer.
//! When direct extraction comes back empty, the largest embedded image of
//! each page is re-encoded as PNG for the vision model.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageOutputFormat, RgbImage};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::{debug, warn};

use crate::error::{ExtractError, Result};

/// Extract text from every page, in page order.
pub fn extract_text(data: &[u8]) -> Result<String> {
    let doc = Document::load_from(Cursor::new(data))?;

    let mut text = String::new();
    for (page_num, _) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(content) => {
                text.push_str(&content);
                text.push('\n');
            }
            Err(e) => debug!("No text on page {}: {}", page_num, e),
        }
    }

    Ok(text)
}

/// Pull one PNG per page (at most `max_pages`) from embedded page images.
///
/// Pages without any image XObject are skipped. Fails with
/// [`ExtractError::EmptyPdf`] when the document has no pages and with
/// [`ExtractError::NoPageImages`] when no page yielded an image.
pub fn extract_page_images(data: &[u8], max_pages: usize) -> Result<Vec<Vec<u8>>> {
    let doc = Document::load_from(Cursor::new(data))?;

    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if page_ids.is_empty() {
        return Err(ExtractError::EmptyPdf);
    }

    let mut images = Vec::new();
    for (index, page_id) in page_ids.into_iter().take(max_pages.max(1)).enumerate() {
        match largest_page_image(&doc, page_id) {
            Ok(Some(raw)) => {
                let png = to_png(&raw)?;
                debug!(
                    "Extracted image from page {} ({} bytes raw, {} bytes png)",
                    index + 1,
                    raw.len(),
                    png.len()
                );
                images.push(png);
            }
            Ok(None) => warn!("Page {} has no embedded image", index + 1),
            Err(e) => warn!("Skipping page {}: {}", index + 1, e),
        }
    }

    if images.is_empty() {
        return Err(ExtractError::NoPageImages);
    }
    Ok(images)
}

/// Walk page → /Resources → /XObject and return the biggest image stream.
fn largest_page_image(doc: &Document, page_id: ObjectId) -> Result<Option<Vec<u8>>> {
    let page = doc.get_dictionary(page_id)?;
    let Some(resources) = resolve_dict(doc, page, b"Resources") else {
        return Ok(None);
    };
    let Some(xobjects) = resolve_dict(doc, resources, b"XObject") else {
        return Ok(None);
    };

    let mut largest: Option<Vec<u8>> = None;
    for (_name, obj) in xobjects.iter() {
        let stream = match deref(doc, obj) {
            Some(Object::Stream(s)) => s,
            _ => continue,
        };
        if !is_image(&stream.dict) {
            continue;
        }

        let bytes = match image_bytes(doc, stream) {
            Some(b) => b,
            None => continue,
        };
        if largest.as_ref().map_or(true, |prev| bytes.len() > prev.len()) {
            largest = Some(bytes);
        }
    }

    Ok(largest)
}

fn deref<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Object> {
    match obj {
        Object::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a Document, dict: &'a Dictionary, key: &[u8]) -> Option<&'a Dictionary> {
    let obj = dict.get(key).ok()?;
    deref(doc, obj)?.as_dict().ok()
}

fn is_image(dict: &Dictionary) -> bool {
    matches!(dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image")
}

/// Stream content as a standalone image file: JPEG via DCTDecode, an
/// embedded PNG/TIFF, or raw pixel samples rebuilt into a PNG.
fn image_bytes(doc: &Document, stream: &Stream) -> Option<Vec<u8>> {
    let is_dct = match stream.dict.get(b"Filter") {
        Ok(Object::Name(n)) => n == b"DCTDecode",
        Ok(Object::Array(filters)) => filters
            .iter()
            .any(|f| matches!(f, Object::Name(n) if n == b"DCTDecode")),
        _ => false,
    };

    if is_dct {
        return Some(stream.content.clone());
    }

    let content = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    if image::guess_format(&content).is_ok() {
        return Some(content);
    }

    match rebuild_raw_image(doc, &stream.dict, content) {
        Ok(png) => Some(png),
        Err(e) => {
            debug!("Skipping raw image stream: {}", e);
            None
        }
    }
}

/// Rebuild 8-bit gray or RGB samples from /Width, /Height and /ColorSpace.
fn rebuild_raw_image(doc: &Document, dict: &Dictionary, pixels: Vec<u8>) -> Result<Vec<u8>> {
    let width = dict_u32(dict, b"Width")?;
    let height = dict_u32(dict, b"Height")?;
    let bits = dict.get(b"BitsPerComponent").and_then(Object::as_i64).unwrap_or(8);
    if bits != 8 {
        return Err(image_error(format!("unsupported bits per component: {}", bits)));
    }

    let channels = color_channels(doc, dict)?;
    let expected = width as usize * height as usize * channels;
    if pixels.len() < expected {
        return Err(image_error(format!(
            "pixel buffer too small: {} bytes, expected {} ({}x{}x{})",
            pixels.len(),
            expected,
            width,
            height,
            channels
        )));
    }

    let mut pixels = pixels;
    pixels.truncate(expected);
    let img = match channels {
        1 => GrayImage::from_raw(width, height, pixels).map(DynamicImage::ImageLuma8),
        _ => RgbImage::from_raw(width, height, pixels).map(DynamicImage::ImageRgb8),
    }
    .ok_or_else(|| image_error("pixel buffer does not match dimensions"))?;

    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}

fn dict_u32(dict: &Dictionary, key: &[u8]) -> Result<u32> {
    dict.get(key)
        .and_then(Object::as_i64)
        .ok()
        .and_then(|v| u32::try_from(v).ok())
        .filter(|v| *v > 0)
        .ok_or_else(|| image_error(format!("missing /{}", String::from_utf8_lossy(key))))
}

/// Samples per pixel for gray and RGB color spaces, including ICC-based ones.
fn color_channels(doc: &Document, dict: &Dictionary) -> Result<usize> {
    let space = dict
        .get(b"ColorSpace")
        .ok()
        .and_then(|obj| deref(doc, obj))
        .ok_or_else(|| image_error("missing /ColorSpace"))?;

    match space {
        Object::Name(n) if n == b"DeviceGray" || n == b"CalGray" => Ok(1),
        Object::Name(n) if n == b"DeviceRGB" || n == b"CalRGB" => Ok(3),
        Object::Array(parts) => match parts.as_slice() {
            [Object::Name(kind), profile, ..] if kind == b"ICCBased" => {
                let components = match deref(doc, profile) {
                    Some(Object::Stream(s)) => s.dict.get(b"N").and_then(Object::as_i64).ok(),
                    _ => None,
                };
                match components {
                    Some(1) => Ok(1),
                    Some(3) => Ok(3),
                    other => Err(image_error(format!("unsupported ICC components: {:?}", other))),
                }
            }
            [Object::Name(kind), ..] if kind == b"CalGray" => Ok(1),
            [Object::Name(kind), ..] if kind == b"CalRGB" => Ok(3),
            _ => Err(image_error("unsupported color space")),
        },
        _ => Err(image_error("unsupported color space")),
    }
}

fn image_error(reason: impl Into<String>) -> ExtractError {
    ExtractError::Image {
        reason: reason.into(),
    }
}

/// Decode any supported image format and re-encode it as PNG.
pub fn to_png(raw: &[u8]) -> Result<Vec<u8>> {
    let img: DynamicImage = image::load_from_memory(raw)?;
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageOutputFormat::Png)?;
    Ok(out.into_inner())
}

/// In-memory PDFs for tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use image::{DynamicImage, ImageOutputFormat};
    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, ObjectId, Stream};
    use std::io::Cursor;

    fn finish(mut doc: Document, pages_id: ObjectId, page_ids: Vec<ObjectId>) -> Vec<u8> {
        let count = page_ids.len() as i64;
        let pages = dictionary! {
            "Type" => "Pages",
            "Kids" => page_ids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => count,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        };
        doc.objects.insert(pages_id, Object::Dictionary(pages));
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    /// Single page, one text line per entry.
    pub fn text_pdf(lines: &[&str]) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Courier",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut operations = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            operations.push(Operation::new("BT", vec![]));
            operations.push(Operation::new("Tf", vec!["F1".into(), 12.into()]));
            operations.push(Operation::new(
                "Td",
                vec![50.into(), (800 - 20 * i as i64).into()],
            ));
            operations.push(Operation::new("Tj", vec![Object::string_literal(*line)]));
            operations.push(Operation::new("ET", vec![]));
        }
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        finish(doc, pages_id, vec![page_id])
    }

    /// `pages` pages, each carrying one JPEG image XObject and no text.
    pub fn scanned_pdf(pages: usize) -> Vec<u8> {
        let mut jpeg = Cursor::new(Vec::new());
        DynamicImage::new_rgb8(8, 8)
            .write_to(&mut jpeg, ImageOutputFormat::Jpeg(80))
            .unwrap();
        let jpeg = jpeg.into_inner();

        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut page_ids = Vec::new();

        for _ in 0..pages {
            let image_id = doc.add_object(Stream::new(
                dictionary! {
                    "Type" => "XObject",
                    "Subtype" => "Image",
                    "Width" => 8,
                    "Height" => 8,
                    "ColorSpace" => "DeviceRGB",
                    "BitsPerComponent" => 8,
                    "Filter" => "DCTDecode",
                },
                jpeg.clone(),
            ));
            let content = Content {
                operations: vec![
                    Operation::new("q", vec![]),
                    Operation::new(
                        "cm",
                        vec![595.into(), 0.into(), 0.into(), 842.into(), 0.into(), 0.into()],
                    ),
                    Operation::new("Do", vec!["Im1".into()]),
                    Operation::new("Q", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
                "Resources" => dictionary! {
                    "XObject" => dictionary! { "Im1" => image_id },
                },
            });
            page_ids.push(page_id);
        }

        finish(doc, pages_id, page_ids)
    }

    /// One page whose image is 16x16 DeviceRGB samples behind FlateDecode.
    pub fn flate_image_pdf() -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let pixels: Vec<u8> = (0..16 * 16).flat_map(|_| [200u8, 30, 30]).collect();
        let mut image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 16,
                "Height" => 16,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
            },
            pixels,
        );
        image.compress().unwrap();
        let image_id = doc.add_object(image);

        let content = Content {
            operations: vec![Operation::new("Do", vec!["Im1".into()])],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im1" => image_id },
            },
        });

        finish(doc, pages_id, vec![page_id])
    }
}
