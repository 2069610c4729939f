//! Raster image operations: image-to-PDF and JPEG re-compression.

use crate::error::TransformError;
use crate::operation::{ImageCompressParams, MediaType};
use image::codecs::jpeg::{JpegDecoder, JpegEncoder};
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageDecoder, ImageFormat};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::io::Cursor;
use tracing::{debug, info, instrument, warn};

/// One candidate image for [`images_to_pdf`].
#[derive(Debug, Clone, Copy)]
pub struct ImageSource<'a> {
    pub name: &'a str,
    pub media_type: MediaType,
    pub bytes: &'a [u8],
}

/// An image ready to be written as an `/XObject`.
struct EmbeddedImage {
    width: u32,
    height: u32,
    stream: Stream,
    alpha: Option<Stream>,
}

// ── Image to PDF ─────────────────────────────────────────────────────────

/// Build a PDF with one page per PNG/JPEG image, each page exactly the
/// image's pixel size. Other media types are skipped.
#[instrument(skip_all, fields(images = images.len()))]
pub fn images_to_pdf(images: &[ImageSource<'_>]) -> Result<Vec<u8>, TransformError> {
    const ACTION: &str = "convert images to PDF";

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::new();

    for source in images {
        let embedded = match source.media_type {
            MediaType::Jpeg => embed_jpeg(source.bytes),
            MediaType::Png => embed_png(source.bytes),
            other => {
                warn!(name = source.name, media_type = %other, "Skipping unsupported image format");
                continue;
            }
        }
        .map_err(|e| TransformError::processing(ACTION, format!("{}: {}", source.name, e)))?;

        debug!(
            name = source.name,
            width = embedded.width,
            height = embedded.height,
            "Embedding image"
        );
        kids.push(add_image_page(&mut doc, pages_id, embedded).into());
    }

    if kids.is_empty() {
        return Err(TransformError::validation("No valid images found"));
    }

    let count = kids.len();
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count as i64,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let out = super::save(&mut doc, ACTION)?;
    info!(pages = count, bytes = out.len(), "Converted images to PDF");
    Ok(out)
}

fn add_image_page(doc: &mut Document, pages_id: ObjectId, image: EmbeddedImage) -> ObjectId {
    let EmbeddedImage {
        width,
        height,
        mut stream,
        alpha,
    } = image;
    if let Some(mask) = alpha {
        let mask_id = doc.add_object(mask);
        stream.dict.set("SMask", mask_id);
    }
    let image_id = doc.add_object(stream);

    let content = format!("q\n{width} 0 0 {height} 0 0 cm\n/Im0 Do\nQ\n");
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => Object::Array(vec![0.into(), 0.into(), i64::from(width).into(), i64::from(height).into()]),
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
        "Contents" => content_id,
    })
}

fn image_stream(width: u32, height: u32, color_space: &str, data: Vec<u8>) -> Stream {
    Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => color_space,
            "BitsPerComponent" => 8,
        },
        data,
    )
}

/// JPEG data is embedded as-is (`/DCTDecode`) when its colour model maps
/// directly onto a device colour space; anything else is decoded to RGB.
fn embed_jpeg(bytes: &[u8]) -> Result<EmbeddedImage, image::ImageError> {
    let decoder = JpegDecoder::new(Cursor::new(bytes))?;
    let (width, height) = decoder.dimensions();
    let color_space = match decoder.original_color_type() {
        ExtendedColorType::L8 => Some("DeviceGray"),
        ExtendedColorType::Rgb8 => Some("DeviceRGB"),
        _ => None,
    };

    if let Some(color_space) = color_space {
        let mut stream = image_stream(width, height, color_space, bytes.to_vec());
        stream.dict.set("Filter", "DCTDecode");
        stream.allows_compression = false;
        return Ok(EmbeddedImage {
            width,
            height,
            stream,
            alpha: None,
        });
    }

    let decoded = DynamicImage::from_decoder(decoder)?;
    Ok(EmbeddedImage {
        width,
        height,
        stream: image_stream(width, height, "DeviceRGB", decoded.to_rgb8().into_raw()),
        alpha: None,
    })
}

/// PNG is decoded to raw samples; transparency becomes a soft mask.
fn embed_png(bytes: &[u8]) -> Result<EmbeddedImage, image::ImageError> {
    let decoded = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
    let (width, height) = decoded.dimensions();

    if !decoded.color().has_alpha() {
        let stream = if decoded.color().has_color() {
            image_stream(width, height, "DeviceRGB", decoded.to_rgb8().into_raw())
        } else {
            image_stream(width, height, "DeviceGray", decoded.to_luma8().into_raw())
        };
        return Ok(EmbeddedImage {
            width,
            height,
            stream,
            alpha: None,
        });
    }

    let rgba = decoded.to_rgba8();
    let pixels = (width as usize) * (height as usize);
    let mut rgb = Vec::with_capacity(pixels * 3);
    let mut alpha = Vec::with_capacity(pixels);
    for pixel in rgba.pixels() {
        let [r, g, b, a] = pixel.0;
        rgb.extend_from_slice(&[r, g, b]);
        alpha.push(a);
    }
    let opaque = alpha.iter().all(|&a| a == u8::MAX);

    Ok(EmbeddedImage {
        width,
        height,
        stream: image_stream(width, height, "DeviceRGB", rgb),
        alpha: (!opaque).then(|| image_stream(width, height, "DeviceGray", alpha)),
    })
}

// ── Image compression ────────────────────────────────────────────────────

/// Re-encode a raster image as JPEG at `params.quality`. Transparency is
/// dropped.
#[instrument(skip_all, fields(bytes = input.len(), quality = params.quality))]
pub fn compress_image(
    input: &[u8],
    media_type: MediaType,
    params: &ImageCompressParams,
) -> Result<Vec<u8>, TransformError> {
    const ACTION: &str = "compress image";
    let format = match media_type {
        MediaType::Jpeg => ImageFormat::Jpeg,
        MediaType::Png => ImageFormat::Png,
        other => {
            return Err(TransformError::validation(format!(
                "Invalid file type {other}: only JPEG and PNG images can be compressed"
            )))
        }
    };

    let img = image::load_from_memory_with_format(input, format)
        .map_err(|e| TransformError::processing(ACTION, e))?;
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, params.quality)
        .encode_image(&img.to_rgb8())
        .map_err(|e| TransformError::processing(ACTION, e))?;

    let report = super::compress::CompressionReport::new(input.len() as u64, out.len() as u64);
    info!(
        original_size = report.original_size,
        new_size = report.new_size,
        "Compression complete: {} -> {} bytes ({:.1}% reduction)",
        report.original_size,
        report.new_size,
        report.reduction_percent
    );
    Ok(out)
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::ops::page_box;

    fn source<'a>(name: &'a str, media_type: MediaType, bytes: &'a [u8]) -> ImageSource<'a> {
        ImageSource {
            name,
            media_type,
            bytes,
        }
    }

    #[test]
    fn one_page_per_image_at_pixel_size() {
        let jpg = jpeg(40, 30);
        let png = png_with_alpha(20, 50);
        let out = images_to_pdf(&[
            source("a.jpg", MediaType::Jpeg, &jpg),
            source("b.png", MediaType::Png, &png),
        ])
        .unwrap();

        let doc = Document::load_mem(&out).unwrap();
        let sizes: Vec<(f32, f32)> = doc
            .get_pages()
            .values()
            .map(|&id| page_box(&doc, id))
            .map(|area| (area.width, area.height))
            .collect();
        assert_eq!(sizes, vec![(40.0, 30.0), (20.0, 50.0)]);
    }

    #[test]
    fn jpeg_is_embedded_without_recoding() {
        let jpg = jpeg(16, 16);
        let out = images_to_pdf(&[source("a.jpg", MediaType::Jpeg, &jpg)]).unwrap();
        let doc = Document::load_mem(&out).unwrap();
        let embedded = doc.objects.values().any(|o| match o {
            Object::Stream(s) => s.content == jpg,
            _ => false,
        });
        assert!(embedded);
    }

    #[test]
    fn png_alpha_becomes_soft_mask() {
        let png = png_with_alpha(8, 8);
        let out = images_to_pdf(&[source("b.png", MediaType::Png, &png)]).unwrap();
        let doc = Document::load_mem(&out).unwrap();
        let has_smask = doc.objects.values().any(|o| match o {
            Object::Stream(s) => s.dict.has(b"SMask"),
            _ => false,
        });
        assert!(has_smask);
    }

    #[test]
    fn other_formats_are_skipped() {
        let jpg = jpeg(10, 10);
        let out = images_to_pdf(&[
            source("notes.docx", MediaType::Docx, b"PK"),
            source("a.jpg", MediaType::Jpeg, &jpg),
        ])
        .unwrap();
        assert_eq!(crate::ops::page_count(&out).unwrap(), 1);
    }

    #[test]
    fn no_usable_image_is_validation_error() {
        let err = images_to_pdf(&[source("x.pdf", MediaType::Pdf, b"%PDF")]).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn corrupt_image_is_processing_error() {
        let err = images_to_pdf(&[source("bad.png", MediaType::Png, b"nope")]).unwrap_err();
        assert_eq!(err.status(), 500);
        assert!(err.to_string().contains("bad.png"));
    }

    #[test]
    fn compress_image_outputs_jpeg() {
        let png = png_with_alpha(32, 32);
        let out = compress_image(&png, MediaType::Png, &ImageCompressParams { quality: 60 }).unwrap();
        assert_eq!(&out[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn lower_quality_is_smaller() {
        let jpg = jpeg(128, 128);
        let high = compress_image(&jpg, MediaType::Jpeg, &ImageCompressParams { quality: 95 }).unwrap();
        let low = compress_image(&jpg, MediaType::Jpeg, &ImageCompressParams { quality: 20 }).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn compress_image_rejects_documents() {
        let err = compress_image(b"%PDF", MediaType::Pdf, &ImageCompressParams::default())
            .unwrap_err();
        assert_eq!(err.status(), 400);
    }
}
