//! Stamping: watermark text and page numbers drawn over existing content.

use super::metrics::StandardFont;
use super::{
    add_standard_font, append_page_content, is_encodable, load, page_box, pdf_literal, save,
    ExtraResources,
};
use crate::error::TransformError;
use crate::operation::WatermarkParams;
use lopdf::{dictionary, Object, ObjectId};
use std::f32::consts::FRAC_1_SQRT_2;
use tracing::{info, instrument};

const WATERMARK_FONT: StandardFont = StandardFont::HelveticaBold;
const WATERMARK_SIZE: f32 = 50.0;
const WATERMARK_GRAY: f32 = 0.7;
const WATERMARK_OPACITY: f32 = 0.5;

const PAGE_NUMBER_FONT: StandardFont = StandardFont::Helvetica;
const PAGE_NUMBER_SIZE: f32 = 12.0;
const PAGE_NUMBER_MARGIN: f32 = 20.0;

const WATERMARK_FONT_KEY: &str = "EqWmFont";
const WATERMARK_GS_KEY: &str = "EqWmGs";
const PAGE_NUMBER_FONT_KEY: &str = "EqPnFont";

/// Stamp `params.text` diagonally across the centre of every page.
#[instrument(skip_all, fields(text_len = params.text.len()))]
pub fn watermark(input: &[u8], params: &WatermarkParams) -> Result<Vec<u8>, TransformError> {
    const ACTION: &str = "add watermark";
    if params.text.trim().is_empty() {
        return Err(TransformError::validation("Watermark text is required"));
    }
    if !is_encodable(&params.text) {
        return Err(TransformError::validation(
            "Watermark text may only use Latin-1 characters",
        ));
    }

    let mut doc = load(input, ACTION)?;
    let font_id = add_standard_font(&mut doc, WATERMARK_FONT.base_font());
    let gs_id = doc.add_object(dictionary! {
        "Type" => "ExtGState",
        "ca" => Object::Real(WATERMARK_OPACITY),
        "CA" => Object::Real(WATERMARK_OPACITY),
    });
    let resources = ExtraResources {
        fonts: vec![(WATERMARK_FONT_KEY.to_string(), font_id)],
        ext_g_states: vec![(WATERMARK_GS_KEY.to_string(), gs_id)],
    };

    let text_width = WATERMARK_FONT.width_of(&params.text, WATERMARK_SIZE);
    let text_height = WATERMARK_FONT.height_at(WATERMARK_SIZE);
    let literal = pdf_literal(&params.text);

    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    for &page_id in &pages {
        let area = page_box(&doc, page_id);
        let (dx, dy) = diagonal_origin(area.width, area.height, text_width, text_height);
        let (e, f) = (area.x + dx, area.y + dy);
        let mut content = format!(
            "q\n/{WATERMARK_GS_KEY} gs\n{g:.2} {g:.2} {g:.2} rg\nBT\n/{WATERMARK_FONT_KEY} {WATERMARK_SIZE:.0} Tf\n\
             {c:.5} {c:.5} {n:.5} {c:.5} {e:.3} {f:.3} Tm\n",
            g = WATERMARK_GRAY,
            c = FRAC_1_SQRT_2,
            n = -FRAC_1_SQRT_2,
        )
        .into_bytes();
        content.extend_from_slice(&literal);
        content.extend_from_slice(b" Tj\nET\nQ\n");
        append_page_content(&mut doc, page_id, content, &resources)?;
    }

    let out = save(&mut doc, ACTION)?;
    info!(pages = pages.len(), "Watermarked PDF");
    Ok(out)
}

/// Text-space origin that places a box of `text_width` × `text_height`,
/// rotated 45° counter-clockwise, with its centre on the page centre.
fn diagonal_origin(width: f32, height: f32, text_width: f32, text_height: f32) -> (f32, f32) {
    let (cx, cy) = (width / 2.0, height / 2.0);
    let (c, s) = (FRAC_1_SQRT_2, FRAC_1_SQRT_2);
    let (dx, dy) = (-text_width / 2.0, -text_height / 2.0);
    (cx + c * dx - s * dy, cy + s * dx + c * dy)
}

/// Draw `"{n}/{total}"` in the bottom-right corner of every page.
#[instrument(skip_all)]
pub fn add_page_numbers(input: &[u8]) -> Result<Vec<u8>, TransformError> {
    const ACTION: &str = "add page numbers";
    let mut doc = load(input, ACTION)?;
    let font_id = add_standard_font(&mut doc, PAGE_NUMBER_FONT.base_font());
    let resources = ExtraResources {
        fonts: vec![(PAGE_NUMBER_FONT_KEY.to_string(), font_id)],
        ..Default::default()
    };

    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    let total = pages.len();
    for (index, &page_id) in pages.iter().enumerate() {
        let label = page_label(index + 1, total);
        let area = page_box(&doc, page_id);
        let x = area.x + area.width
            - PAGE_NUMBER_FONT.width_of(&label, PAGE_NUMBER_SIZE)
            - PAGE_NUMBER_MARGIN;
        let y = area.y + PAGE_NUMBER_MARGIN;
        let mut content = format!(
            "BT\n0 g\n/{PAGE_NUMBER_FONT_KEY} {PAGE_NUMBER_SIZE:.0} Tf\n{x:.3} {y:.3} Td\n"
        )
        .into_bytes();
        content.extend_from_slice(&pdf_literal(&label));
        content.extend_from_slice(b" Tj\nET\n");
        append_page_content(&mut doc, page_id, content, &resources)?;
    }

    let out = save(&mut doc, ACTION)?;
    info!(pages = total, "Numbered pages");
    Ok(out)
}

fn page_label(index: usize, total: usize) -> String {
    format!("{index}/{total}")
}
