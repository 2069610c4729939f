//! Local transform operations.
//!
//! Each operation is a synchronous, pure `bytes in → bytes out` function
//! over `lopdf` / `image`. They are CPU-bound and are invoked by the
//! dispatcher on tokio's blocking pool. Library errors are re-raised as
//! [`TransformError`] with an operation-qualified message.
//!
//! Shared page-tree helpers live here: loading/saving, inherited page
//! attributes, and appending content streams with extra resources.

pub mod compress;
pub mod images;
pub mod merge;
pub mod metrics;
pub mod organize;
pub mod protect;
pub mod rotate;
pub mod split;
pub mod stamp;

pub use compress::compress;
pub use images::{compress_image, images_to_pdf};
pub use merge::merge;
pub use organize::organize;
pub use protect::{protect, unlock};
pub use rotate::rotate;
pub use split::{split, SplitPage};
pub use stamp::{add_page_numbers, watermark};

use crate::error::TransformError;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use tracing::warn;

/// US Letter, used when a page has no resolvable `/MediaBox`.
pub(crate) const DEFAULT_PAGE_SIZE: (f32, f32) = (612.0, 792.0);

/// Page-tree depth limit when walking `/Parent` chains.
const MAX_TREE_DEPTH: usize = 32;

/// Keys a page may inherit from its ancestors in the page tree.
pub(crate) const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

pub(crate) fn load(bytes: &[u8], action: &str) -> Result<Document, TransformError> {
    Document::load_mem(bytes).map_err(|e| TransformError::processing(action, e))
}

pub(crate) fn save(doc: &mut Document, action: &str) -> Result<Vec<u8>, TransformError> {
    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| TransformError::processing(action, e))?;
    Ok(out)
}

/// Number of pages in a PDF.
pub fn page_count(bytes: &[u8]) -> Result<usize, TransformError> {
    Ok(load(bytes, "read PDF")?.get_pages().len())
}

/// Look up `key` on the page itself or the nearest ancestor that defines it.
pub(crate) fn inherited_attr(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut current = doc.get_dictionary(page_id).ok()?;
    for _ in 0..MAX_TREE_DEPTH {
        if let Ok(value) = current.get(key) {
            return Some(value.clone());
        }
        let parent = current.get(b"Parent").ok()?.as_reference().ok()?;
        current = doc.get_dictionary(parent).ok()?;
    }
    None
}

/// A page's visible rectangle in default user space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct PageBox {
    /// Lower-left corner.
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// The (possibly inherited) `/MediaBox` of a page, normalised so that
/// `(x, y)` is the lower-left corner.
pub(crate) fn page_box(doc: &Document, page_id: ObjectId) -> PageBox {
    let media_box = match inherited_attr(doc, page_id, b"MediaBox") {
        Some(Object::Reference(id)) => doc.get_object(id).ok().cloned(),
        other => other,
    };
    let values: Vec<f32> = match media_box {
        Some(Object::Array(arr)) => arr.iter().filter_map(|o| o.as_float().ok()).collect(),
        _ => Vec::new(),
    };
    match values[..] {
        [x0, y0, x1, y1] => PageBox {
            x: x0.min(x1),
            y: y0.min(y1),
            width: (x1 - x0).abs(),
            height: (y1 - y0).abs(),
        },
        _ => PageBox {
            x: 0.0,
            y: 0.0,
            width: DEFAULT_PAGE_SIZE.0,
            height: DEFAULT_PAGE_SIZE.1,
        },
    }
}

/// Copy inherited attributes onto the page so it survives being moved to a
/// different parent.
pub(crate) fn flatten_inherited(doc: &mut Document, page_id: ObjectId) {
    let inherited: Vec<(&[u8], Object)> = INHERITABLE_KEYS
        .iter()
        .filter_map(|key| inherited_attr(doc, page_id, key).map(|v| (*key, v)))
        .collect();
    if let Ok(page) = doc.get_dictionary_mut(page_id) {
        for (key, value) in inherited {
            if !page.has(key) {
                page.set(key, value);
            }
        }
    }
}

/// Replace the document's page list with `pages`, in order.
///
/// Every page is re-parented directly under the catalog's root `/Pages` node;
/// intermediate nodes become unreachable. Callers must flatten inherited
/// attributes first, since the root node's own copies are removed.
pub(crate) fn rebuild_page_tree(
    doc: &mut Document,
    pages: &[ObjectId],
    action: &str,
) -> Result<(), TransformError> {
    let pages_id = doc
        .catalog()
        .and_then(|catalog| catalog.get(b"Pages"))
        .and_then(|pages| pages.as_reference())
        .map_err(|e| TransformError::processing(action, format!("missing page tree: {e}")))?;

    for &id in pages {
        if let Ok(page) = doc.get_dictionary_mut(id) {
            page.set("Parent", pages_id);
        }
    }

    let root = doc
        .get_dictionary_mut(pages_id)
        .map_err(|e| TransformError::processing(action, e))?;
    for key in INHERITABLE_KEYS {
        root.remove(key);
    }
    root.set(
        "Kids",
        Object::Array(pages.iter().map(|&id| Object::Reference(id)).collect()),
    );
    root.set("Count", pages.len() as i64);
    Ok(())
}

/// Resource entries to merge into a page's `/Resources` before drawing.
#[derive(Debug, Default)]
pub(crate) struct ExtraResources {
    pub fonts: Vec<(String, ObjectId)>,
    pub ext_g_states: Vec<(String, ObjectId)>,
}

/// Draw `content` on top of the page's existing content.
///
/// The existing streams are wrapped in `q … Q` so whatever graphics state
/// they leave behind does not leak into the appended stream.
pub(crate) fn append_page_content(
    doc: &mut Document,
    page_id: ObjectId,
    content: Vec<u8>,
    resources: &ExtraResources,
) -> Result<(), TransformError> {
    let mut page_resources = match inherited_attr(doc, page_id, b"Resources") {
        Some(Object::Reference(id)) => doc.get_dictionary(id).cloned().unwrap_or_default(),
        Some(Object::Dictionary(dict)) => dict,
        _ => Dictionary::new(),
    };
    merge_resource(doc, &mut page_resources, b"Font", &resources.fonts);
    merge_resource(doc, &mut page_resources, b"ExtGState", &resources.ext_g_states);

    let push_id = doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
    let pop_id = doc.add_object(Stream::new(Dictionary::new(), b"Q\n".to_vec()));
    let content_id = doc.add_object(Stream::new(Dictionary::new(), content));

    let existing = doc
        .get_dictionary(page_id)
        .map_err(|e| TransformError::processing("update page", e))?
        .get(b"Contents")
        .ok()
        .cloned();
    let mut contents = vec![Object::Reference(push_id)];
    match existing {
        Some(Object::Array(arr)) => contents.extend(arr),
        Some(Object::Reference(id)) => match doc.get_object(id) {
            // An indirect array of streams, not a stream itself.
            Ok(Object::Array(arr)) => contents.extend(arr.iter().cloned()),
            _ => contents.push(Object::Reference(id)),
        },
        _ => {}
    }
    contents.push(Object::Reference(pop_id));
    contents.push(Object::Reference(content_id));

    let page = doc
        .get_dictionary_mut(page_id)
        .map_err(|e| TransformError::processing("update page", e))?;
    page.set("Contents", Object::Array(contents));
    page.set("Resources", Object::Dictionary(page_resources));
    Ok(())
}

fn merge_resource(
    doc: &Document,
    resources: &mut Dictionary,
    category: &[u8],
    entries: &[(String, ObjectId)],
) {
    if entries.is_empty() {
        return;
    }
    let mut dict = match resources.get(category) {
        Ok(Object::Dictionary(d)) => d.clone(),
        Ok(Object::Reference(id)) => doc.get_dictionary(*id).cloned().unwrap_or_default(),
        _ => Dictionary::new(),
    };
    for (name, id) in entries {
        dict.set(name.as_bytes().to_vec(), Object::Reference(*id));
    }
    resources.set(category.to_vec(), Object::Dictionary(dict));
}

/// Register one of the standard 14 Type1 fonts and return its object id.
pub(crate) fn add_standard_font(doc: &mut Document, base_font: &str) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => Object::Name(base_font.as_bytes().to_vec()),
        "Encoding" => "WinAnsiEncoding",
    })
}

/// Whether every character of `text` has a single-byte code in the
/// standard fonts' encoding.
pub(crate) fn is_encodable(text: &str) -> bool {
    text.chars().all(|ch| (ch as u32) < 256)
}

/// Encode text as a PDF literal string in WinAnsi, escaping delimiters.
/// Characters outside Latin-1 are replaced with `?`.
pub(crate) fn pdf_literal(text: &str) -> Vec<u8> {
    let replaced = text.chars().filter(|&ch| (ch as u32) >= 256).count();
    if replaced > 0 {
        warn!(replaced, "Characters outside Latin-1 replaced with '?'");
    }
    let mut out = Vec::with_capacity(text.len() + 2);
    out.push(b'(');
    for ch in text.chars() {
        let byte = if (ch as u32) < 256 { ch as u32 as u8 } else { b'?' };
        match byte {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(byte);
            }
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            _ => out.push(byte),
        }
    }
    out.push(b')');
    out
}

#[cfg(test)]
pub(crate) mod testutil {
    //! In-memory PDF fixtures shared by the operation tests.

    use lopdf::content::{Content, Operation};
    use lopdf::{dictionary, Document, Object, Stream};

    /// Build a PDF whose pages each show `"{label}-Page-{n}"`.
    pub fn pdf_with_pages(pages: u32, label: &str) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::new();
        for n in 1..=pages {
            let content = Content {
                operations: vec![
                    Operation::new("BT", vec![]),
                    Operation::new("Tf", vec!["F1".into(), 12.into()]),
                    Operation::new("Td", vec![50.into(), 700.into()]),
                    Operation::new(
                        "Tj",
                        vec![Object::string_literal(format!("{label}-Page-{n}"))],
                    ),
                    Operation::new("ET", vec![]),
                ],
            };
            let content_id =
                doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
                "Resources" => resources_id,
                "MediaBox" => Object::Array(vec![0.into(), 0.into(), 612.into(), 792.into()]),
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut out = Vec::new();
        doc.save_to(&mut out).unwrap();
        out
    }

    /// Decoded content of every page, in page order.
    pub fn page_texts(bytes: &[u8]) -> Vec<String> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|&id| String::from_utf8_lossy(&doc.get_page_content(id).unwrap()).into_owned())
            .collect()
    }

    /// Effective `/Rotate` of every page, in page order.
    pub fn rotations(bytes: &[u8]) -> Vec<i64> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|&id| {
                super::inherited_attr(&doc, id, b"Rotate")
                    .and_then(|o| o.as_i64().ok())
                    .unwrap_or(0)
            })
            .collect()
    }
}
