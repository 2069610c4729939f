//! Split: one single-page PDF per input page.

use super::{flatten_inherited, load, save};
use crate::error::TransformError;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::collections::BTreeSet;
use tracing::{debug, info, instrument};

const ACTION: &str = "split PDF";

/// One output of [`split`].
#[derive(Debug, Clone)]
pub struct SplitPage {
    /// 1-based page number in the source document.
    pub number: usize,
    /// `page-{number}.pdf`
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Split a PDF into single-page documents, in page order.
#[instrument(skip_all, fields(bytes = input.len()))]
pub fn split(input: &[u8]) -> Result<Vec<SplitPage>, TransformError> {
    let mut doc = load(input, ACTION)?;
    let pages: Vec<ObjectId> = doc.get_pages().values().copied().collect();
    if pages.is_empty() {
        return Err(TransformError::validation("PDF has no pages to split"));
    }
    for &id in &pages {
        flatten_inherited(&mut doc, id);
    }

    let mut outputs = Vec::with_capacity(pages.len());
    for (index, &page_id) in pages.iter().enumerate() {
        let number = index + 1;
        let mut single = extract_page(&doc, page_id)?;
        let bytes = save(&mut single, ACTION)?;
        debug!(page = number, bytes = bytes.len(), "Extracted page");
        outputs.push(SplitPage {
            number,
            name: format!("page-{number}.pdf"),
            bytes,
        });
    }

    info!(pages = outputs.len(), "Split PDF");
    Ok(outputs)
}

/// A new document holding `page_id` and only the objects it references.
fn extract_page(doc: &Document, page_id: ObjectId) -> Result<Document, TransformError> {
    let mut single = Document::with_version(doc.version.clone());
    for id in reachable_from(doc, page_id) {
        if let Ok(object) = doc.get_object(id) {
            single.objects.insert(id, object.clone());
        }
    }
    single.max_id = doc.max_id;

    let pages_id = single.new_object_id();
    single
        .get_dictionary_mut(page_id)
        .map_err(|e| TransformError::processing(ACTION, e))?
        .set("Parent", pages_id);
    single.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );
    let catalog_id = single.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    single.trailer.set("Root", catalog_id);
    single.renumber_objects();
    single.compress();
    Ok(single)
}

/// Object ids reachable from `root`. `/Parent` links are not followed, so the
/// rest of the page tree stays behind.
fn reachable_from(doc: &Document, root: ObjectId) -> BTreeSet<ObjectId> {
    let mut seen = BTreeSet::new();
    let mut pending = vec![root];
    while let Some(id) = pending.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Ok(object) = doc.get_object(id) {
            collect_refs(object, &mut pending);
        }
    }
    seen
}

fn collect_refs(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => items.iter().for_each(|o| collect_refs(o, out)),
        Object::Dictionary(dict) => collect_dict_refs(dict, out),
        Object::Stream(stream) => collect_dict_refs(&stream.dict, out),
        _ => {}
    }
}

fn collect_dict_refs(dict: &Dictionary, out: &mut Vec<ObjectId>) {
    for (key, value) in dict.iter() {
        if key.as_slice() != b"Parent" {
            collect_refs(value, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::testutil::{page_texts, pdf_with_pages};
    use crate::ops::{merge, page_count};

    #[test]
    fn one_output_per_page_named_in_order() {
        let pages = split(&pdf_with_pages(3, "A")).unwrap();
        let names: Vec<&str> = pages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["page-1.pdf", "page-2.pdf", "page-3.pdf"]);
        for (i, page) in pages.iter().enumerate() {
            assert_eq!(page_count(&page.bytes).unwrap(), 1);
            assert!(page_texts(&page.bytes)[0].contains(&format!("A-Page-{}", i + 1)));
        }
    }

    #[test]
    fn split_of_merge_recovers_inputs() {
        let merged = merge(&[pdf_with_pages(2, "A"), pdf_with_pages(1, "B")]).unwrap();
        let pages = split(&merged).unwrap();
        assert_eq!(pages.len(), 3);
        assert!(page_texts(&pages[0].bytes)[0].contains("A-Page-1"));
        assert!(page_texts(&pages[1].bytes)[0].contains("A-Page-2"));
        assert!(page_texts(&pages[2].bytes)[0].contains("B-Page-1"));
    }

    #[test]
    fn pages_carry_only_their_own_objects() {
        let input = pdf_with_pages(3, "A");
        let source_objects = Document::load_mem(&input).unwrap().objects.len();

        for page in split(&input).unwrap() {
            let doc = Document::load_mem(&page.bytes).unwrap();
            let page_dicts = doc
                .objects
                .values()
                .filter(|o| o.as_dict().is_ok_and(|d| d.has_type(b"Page")))
                .count();
            assert_eq!(page_dicts, 1);
            assert!(doc.objects.len() < source_objects);
        }
    }

    #[test]
    fn zero_page_document_is_rejected() {
        let err = split(&pdf_with_pages(0, "A")).unwrap_err();
        assert_eq!(err.status(), 400);
    }
}
