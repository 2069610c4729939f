//! Organize: build a new page sequence from a 1-based page order.

use super::{flatten_inherited, load, rebuild_page_tree, save};
use crate::error::TransformError;
use crate::operation::OrganizeParams;
use lopdf::{Object, ObjectId};
use tracing::{debug, info, instrument};

const ACTION: &str = "organize PDF";

/// Reorder pages. Out-of-range entries are dropped; repeats duplicate a
/// page and omissions delete it.
#[instrument(skip_all, fields(order = ?params.order))]
pub fn organize(input: &[u8], params: &OrganizeParams) -> Result<Vec<u8>, TransformError> {
    let mut doc = load(input, ACTION)?;
    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();

    let selected = valid_indices(&params.order, pages.len());
    if selected.is_empty() {
        return Err(TransformError::validation("No valid pages selected"));
    }
    if selected.len() != params.order.len() {
        debug!(
            requested = params.order.len(),
            kept = selected.len(),
            "Dropped out-of-range page indices"
        );
    }

    for &id in &pages {
        flatten_inherited(&mut doc, id);
    }

    // A page object may only appear once in the tree; repeats get a copy.
    let mut used = std::collections::HashSet::new();
    let mut order = Vec::with_capacity(selected.len());
    for index in selected {
        let page_id = pages[index];
        if used.insert(page_id) {
            order.push(page_id);
        } else {
            let copy = doc
                .get_dictionary(page_id)
                .map_err(|e| TransformError::processing(ACTION, e))?
                .clone();
            order.push(doc.add_object(Object::Dictionary(copy)));
        }
    }

    rebuild_page_tree(&mut doc, &order, ACTION)?;
    doc.prune_objects();

    let out = save(&mut doc, ACTION)?;
    info!(pages = order.len(), "Organized PDF");
    Ok(out)
}

/// Zero-based indices of the in-range entries of a 1-based order.
fn valid_indices(order: &[i64], page_count: usize) -> Vec<usize> {
    order
        .iter()
        .filter(|&&n| n >= 1 && (n as u64) <= page_count as u64)
        .map(|&n| (n - 1) as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::page_count;
    use crate::ops::testutil::{page_texts, pdf_with_pages};

    fn organize_with(input: &[u8], order: &[i64]) -> Result<Vec<u8>, TransformError> {
        organize(
            input,
            &OrganizeParams {
                order: order.to_vec(),
            },
        )
    }

    #[test]
    fn reorders_and_drops_pages() {
        let out = organize_with(&pdf_with_pages(5, "A"), &[3, 1]).unwrap();
        let texts = page_texts(&out);
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("A-Page-3"));
        assert!(texts[1].contains("A-Page-1"));
    }

    #[test]
    fn duplicates_allowed_out_of_range_filtered() {
        let out = organize_with(&pdf_with_pages(2, "A"), &[1, 1, 99]).unwrap();
        let texts = page_texts(&out);
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("A-Page-1"));
        assert!(texts[1].contains("A-Page-1"));
    }

    #[test]
    fn all_invalid_is_validation_error() {
        let err = organize_with(&pdf_with_pages(2, "A"), &[0, -1, 3]).unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[test]
    fn identity_order_keeps_document() {
        let out = organize_with(&pdf_with_pages(3, "A"), &[1, 2, 3]).unwrap();
        assert_eq!(page_count(&out).unwrap(), 3);
    }

    #[test]
    fn valid_index_filter() {
        assert_eq!(valid_indices(&[2, 0, 5, 1], 3), vec![1, 0]);
    }
}
