//! Merge: concatenate the pages of several PDFs.
//!
//! The first document is the destination. Objects of every following
//! document are imported with their ids shifted past the destination's
//! current `max_id`, so no reference can collide, and their pages are
//! appended to the destination's page list in input order.

use super::{flatten_inherited, load, rebuild_page_tree, save};
use crate::error::TransformError;
use lopdf::{Document, Object, ObjectId};
use tracing::{debug, info, instrument};

const ACTION: &str = "merge PDFs";

/// Merge `inputs` in order. Needs at least two documents.
#[instrument(skip_all, fields(inputs = inputs.len()))]
pub fn merge(inputs: &[Vec<u8>]) -> Result<Vec<u8>, TransformError> {
    if inputs.len() < 2 {
        return Err(TransformError::validation(
            "Please upload at least 2 PDF files",
        ));
    }

    let mut docs = inputs
        .iter()
        .enumerate()
        .map(|(i, bytes)| {
            load(bytes, ACTION).map_err(|e| {
                TransformError::processing(ACTION, format!("document {}: {}", i + 1, e))
            })
        })
        .collect::<Result<Vec<Document>, _>>()?;

    let mut dest = docs.remove(0);
    let mut page_refs = flattened_pages(&mut dest);
    let mut max_id = dest.max_id;

    for (i, mut source) in docs.into_iter().enumerate() {
        let source_pages = flattened_pages(&mut source);
        let offset = max_id;
        debug!(document = i + 2, pages = source_pages.len(), offset, "Importing document");

        for (id, object) in std::mem::take(&mut source.objects) {
            dest.objects
                .insert(shift(id, offset), remap_references(object, offset));
        }
        page_refs.extend(source_pages.into_iter().map(|id| shift(id, offset)));
        max_id = max_id.max(source.max_id + offset);
    }

    dest.max_id = max_id;
    rebuild_page_tree(&mut dest, &page_refs, ACTION)?;
    dest.prune_objects();
    dest.compress();

    let out = save(&mut dest, ACTION)?;
    info!(pages = page_refs.len(), bytes = out.len(), "Merged PDFs");
    Ok(out)
}

fn flattened_pages(doc: &mut Document) -> Vec<ObjectId> {
    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    for &id in &pages {
        flatten_inherited(doc, id);
    }
    pages
}

fn shift(id: ObjectId, offset: u32) -> ObjectId {
    (id.0 + offset, id.1)
}

/// Shift every indirect reference inside `obj` by `offset`.
fn remap_references(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference(shift(id, offset)),
        Object::Array(items) => Object::Array(
            items
                .into_iter()
                .map(|o| remap_references(o, offset))
                .collect(),
        ),
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_references(std::mem::replace(value, Object::Null), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_references(std::mem::replace(value, Object::Null), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}
