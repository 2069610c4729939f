//! Compress: re-serialise a PDF with tighter streams.
//!
//! Three passes, each optional:
//! - metadata stripping (`/Info` and the catalog's XMP `/Metadata`);
//! - JPEG re-encoding of embedded `/DCTDecode` images at the requested
//!   quality, kept only when the new stream is smaller;
//! - structural optimisation (prune unreachable objects, renumber), which
//!   [`CompressionLevel::High`](crate::operation::CompressionLevel::High)
//!   switches off.
//!
//! Stream compression (Flate) always runs.

use super::{load, save};
use crate::error::TransformError;
use crate::operation::CompressParams;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageFormat};
use lopdf::{Document, Object, Stream};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

const ACTION: &str = "compress PDF";

/// Size telemetry for a compression run. Never written into the document.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionReport {
    pub original_size: u64,
    pub new_size: u64,
    /// `(original - new) / original * 100`, rounded to one decimal.
    /// Negative when the output grew.
    pub reduction_percent: f64,
}

impl CompressionReport {
    pub fn new(original_size: u64, new_size: u64) -> Self {
        let reduction_percent = if original_size == 0 {
            0.0
        } else {
            let raw = (original_size as f64 - new_size as f64) / original_size as f64 * 100.0;
            (raw * 10.0).round() / 10.0
        };
        Self {
            original_size,
            new_size,
            reduction_percent,
        }
    }
}

/// Compress a PDF and report the size change.
#[instrument(skip_all, fields(level = ?params.level, quality = params.quality))]
pub fn compress(
    input: &[u8],
    params: &CompressParams,
) -> Result<(Vec<u8>, CompressionReport), TransformError> {
    let mut doc = load(input, ACTION)?;

    if params.remove_metadata {
        strip_metadata(&mut doc);
    }

    let reencoded = reencode_jpeg_images(&mut doc, params.quality);
    if reencoded > 0 {
        debug!(images = reencoded, "Re-encoded JPEG images");
    }

    if params.level.structural_optimization() {
        let pruned = doc.prune_objects();
        doc.renumber_objects();
        debug!(pruned = pruned.len(), "Structural optimisation");
    }
    doc.compress();

    let out = save(&mut doc, ACTION)?;
    let report = CompressionReport::new(input.len() as u64, out.len() as u64);
    info!(
        original_size = report.original_size,
        new_size = report.new_size,
        "PDF Compression: {} -> {} bytes ({:.1}% reduction)",
        report.original_size,
        report.new_size,
        report.reduction_percent
    );
    Ok((out, report))
}

fn strip_metadata(doc: &mut Document) {
    doc.trailer.remove(b"Info");
    let root = doc
        .trailer
        .get(b"Root")
        .and_then(|r| r.as_reference())
        .ok();
    if let Some(catalog) = root.and_then(|id| doc.get_dictionary_mut(id).ok()) {
        catalog.remove(b"Metadata");
    }
}

/// Re-encode baseline JPEG image XObjects. Returns how many were replaced.
fn reencode_jpeg_images(doc: &mut Document, quality: u8) -> usize {
    let mut replaced = 0;
    for object in doc.objects.values_mut() {
        let Object::Stream(stream) = object else {
            continue;
        };
        if !is_reencodable_jpeg(stream) {
            continue;
        }
        if let Some(smaller) = reencode(&stream.content, quality) {
            stream.set_content(smaller);
            stream.allows_compression = false;
            replaced += 1;
        }
    }
    replaced
}

fn is_reencodable_jpeg(stream: &Stream) -> bool {
    let dict = &stream.dict;
    let is_image = matches!(dict.get(b"Subtype"), Ok(Object::Name(n)) if n == b"Image");
    let is_dct = match dict.get(b"Filter") {
        Ok(Object::Name(n)) => n == b"DCTDecode",
        Ok(Object::Array(filters)) => {
            filters.len() == 1 && matches!(&filters[0], Object::Name(n) if n == b"DCTDecode")
        }
        _ => false,
    };
    let simple_color = matches!(
        dict.get(b"ColorSpace"),
        Ok(Object::Name(n)) if n == b"DeviceRGB" || n == b"DeviceGray"
    );
    is_image && is_dct && simple_color && !dict.has(b"Decode")
}

/// Decode and re-encode `jpeg`; `None` unless the result is smaller and the
/// colour model is preserved.
fn reencode(jpeg: &[u8], quality: u8) -> Option<Vec<u8>> {
    let img = image::load_from_memory_with_format(jpeg, ImageFormat::Jpeg).ok()?;
    let mut out = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut out, quality);
        match img.color() {
            ColorType::L8 => encoder.encode_image(&img.to_luma8()).ok()?,
            ColorType::Rgb8 => encoder.encode_image(&img.to_rgb8()).ok()?,
            _ => return None,
        }
    }
    (out.len() < jpeg.len()).then_some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::CompressionLevel;
    use crate::ops::page_count;
    use crate::ops::testutil::pdf_with_pages;
    use lopdf::dictionary;

    fn params(level: CompressionLevel, quality: u8, remove_metadata: bool) -> CompressParams {
        CompressParams {
            level,
            quality,
            remove_metadata,
        }
    }

    fn noisy_jpeg(quality: u8) -> Vec<u8> {
        let img = image::RgbImage::from_fn(96, 96, |x, y| {
            image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) * 5 % 256) as u8])
        });
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode_image(&img)
            .unwrap();
        out
    }

    /// A one-page PDF with a JPEG XObject and an `/Info` dictionary.
    fn pdf_with_jpeg() -> (Vec<u8>, usize) {
        let mut doc = Document::load_mem(&pdf_with_pages(1, "A")).unwrap();
        let jpeg = noisy_jpeg(100);
        let jpeg_len = jpeg.len();
        let mut stream = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => 96,
                "Height" => 96,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        );
        stream.allows_compression = false;
        let image_id = doc.add_object(stream);
        let page_id = *doc.get_pages().get(&1).unwrap();
        doc.get_dictionary_mut(page_id).unwrap().set(
            "Resources",
            dictionary! { "XObject" => dictionary! { "Im0" => image_id } },
        );
        let info_id = doc.add_object(dictionary! {
            "Producer" => Object::string_literal("fixture"),
        });
        doc.trailer.set("Info", info_id);
        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        (out, jpeg_len)
    }

    fn largest_dct_stream(bytes: &[u8]) -> usize {
        let doc = Document::load_mem(bytes).unwrap();
        doc.objects
            .values()
            .filter_map(|o| match o {
                Object::Stream(s) if is_reencodable_jpeg(s) => Some(s.content.len()),
                _ => None,
            })
            .max()
            .unwrap()
    }

    #[test]
    fn report_rounds_to_one_decimal() {
        let r = CompressionReport::new(3000, 2000);
        assert_eq!(r.reduction_percent, 33.3);
        assert_eq!(CompressionReport::new(1000, 1100).reduction_percent, -10.0);
        assert_eq!(CompressionReport::new(0, 10).reduction_percent, 0.0);
    }

    #[test]
    fn reencodes_jpeg_at_lower_quality() {
        let (input, original_jpeg) = pdf_with_jpeg();
        let (out, report) = compress(&input, &params(CompressionLevel::Medium, 30, false)).unwrap();
        assert!(largest_dct_stream(&out) < original_jpeg);
        assert!(report.new_size < report.original_size);
        assert!(report.reduction_percent > 0.0);
    }

    #[test]
    fn strips_metadata_when_requested() {
        let (input, _) = pdf_with_jpeg();
        let (kept, _) = compress(&input, &params(CompressionLevel::Low, 70, false)).unwrap();
        assert!(Document::load_mem(&kept).unwrap().trailer.has(b"Info"));

        let (stripped, _) = compress(&input, &params(CompressionLevel::Low, 70, true)).unwrap();
        assert!(!Document::load_mem(&stripped).unwrap().trailer.has(b"Info"));
    }

    #[test]
    fn every_level_keeps_pages() {
        let input = pdf_with_pages(3, "A");
        for level in [CompressionLevel::Low, CompressionLevel::Medium, CompressionLevel::High] {
            let (out, report) = compress(&input, &params(level, 70, false)).unwrap();
            assert_eq!(page_count(&out).unwrap(), 3, "level {}", level.as_str());
            assert_eq!(report.original_size, input.len() as u64);
            assert_eq!(report.new_size, out.len() as u64);
        }
    }

    #[test]
    fn reencode_keeps_larger_original() {
        let small = noisy_jpeg(10);
        assert!(reencode(&small, 100).is_none());
    }
}
