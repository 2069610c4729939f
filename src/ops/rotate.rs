//! Rotate: add a relative angle to every page's `/Rotate`.

use super::{inherited_attr, load, save};
use crate::error::TransformError;
use crate::operation::RotateParams;
use lopdf::ObjectId;
use tracing::{info, instrument};

const ACTION: &str = "rotate PDF";

/// Rotate every page by `params.angle` degrees relative to its current
/// rotation. The result is normalised into `0..360`.
#[instrument(skip_all, fields(angle = params.angle))]
pub fn rotate(input: &[u8], params: &RotateParams) -> Result<Vec<u8>, TransformError> {
    let mut doc = load(input, ACTION)?;
    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();

    for &page_id in &pages {
        let current = inherited_attr(&doc, page_id, b"Rotate")
            .and_then(|o| o.as_i64().ok())
            .unwrap_or(0);
        let rotation = normalize(current + params.angle);
        doc.get_dictionary_mut(page_id)
            .map_err(|e| TransformError::processing(ACTION, e))?
            .set("Rotate", rotation);
    }

    let out = save(&mut doc, ACTION)?;
    info!(pages = pages.len(), "Rotated pages");
    Ok(out)
}

fn normalize(angle: i64) -> i64 {
    angle.rem_euclid(360)
}
