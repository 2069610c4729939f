//! Integration tests for edgequake-pdftools through the public API.
//!
//! Every fixture is generated in-memory with `lopdf`; no network access and
//! no files outside a per-test staging root are needed.
//!
//! Run with:
//!   cargo test --test pipeline

use edgequake_pdftools::envelope::MANIFEST_ENTRY;
use edgequake_pdftools::{
    Dispatcher, OperationOutput, OperationRequest, PipelineConfig, ResultEnvelope, SplitManifest,
};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::Path;
use tempfile::TempDir;

const PDF: &str = "application/pdf";

// ── Test helpers ─────────────────────────────────────────────────────────────

/// A PDF whose page `n` shows `"{label}-{n}"`.
fn fixture(pages: u32, label: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });

    let mut kids: Vec<Object> = Vec::new();
    for n in 1..=pages {
        let content = Content {
            operations: vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 18.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(format!("{label}-{n}"))]),
                Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => Object::Array(vec![0.into(), 0.into(), 595.into(), 842.into()]),
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        kids.push(page_id.into());
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => pages as i64,
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

/// Page labels in page order, read back from the content streams.
fn labels(bytes: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .values()
        .map(|&id| {
            let raw = doc.get_page_content(id).unwrap();
            let content = Content::decode(&raw).unwrap();
            content
                .operations
                .iter()
                .filter(|op| op.operator == "Tj")
                .filter_map(|op| op.operands.first())
                .filter_map(|o| o.as_str().ok())
                .map(|s| String::from_utf8_lossy(s).into_owned())
                .next()
                .unwrap_or_default()
        })
        .collect()
}

fn dispatcher(root: &TempDir) -> Dispatcher {
    let config = PipelineConfig::builder()
        .staging_dir(root.path())
        .build()
        .unwrap();
    Dispatcher::new(&config).unwrap()
}

fn assert_staging_empty(root: &Path) {
    let leftovers: Vec<_> = std::fs::read_dir(root)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert!(leftovers.is_empty(), "staging root not empty: {leftovers:?}");
}

fn document(output: OperationOutput) -> Vec<u8> {
    match output {
        OperationOutput::Document { file, .. } => file.bytes,
        other => panic!("expected a document, got {other:?}"),
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn merge_two_single_page_pdfs() {
    let root = TempDir::new().unwrap();
    let out = dispatcher(&root)
        .dispatch(
            OperationRequest::new("merge")
                .upload("a.pdf", PDF, fixture(1, "A"))
                .upload("b.pdf", PDF, fixture(1, "B")),
        )
        .await
        .unwrap();

    assert_eq!(labels(&document(out)), vec!["A-1", "B-1"]);
    assert_staging_empty(root.path());
}

#[tokio::test]
async fn merge_preserves_order_and_counts() {
    let root = TempDir::new().unwrap();
    let out = dispatcher(&root)
        .dispatch(
            OperationRequest::new("merge")
                .upload("a.pdf", PDF, fixture(2, "A"))
                .upload("b.pdf", PDF, fixture(3, "B"))
                .upload("c.pdf", PDF, fixture(1, "C")),
        )
        .await
        .unwrap();

    assert_eq!(
        labels(&document(out)),
        vec!["A-1", "A-2", "B-1", "B-2", "B-3", "C-1"]
    );
}

#[tokio::test]
async fn split_three_pages_into_named_files() {
    let root = TempDir::new().unwrap();
    let out = dispatcher(&root)
        .dispatch(OperationRequest::new("split").upload("doc.pdf", PDF, fixture(3, "S")))
        .await
        .unwrap();

    match out {
        OperationOutput::Split { manifest, files } => {
            assert_eq!(manifest.files, vec!["page-1.pdf", "page-2.pdf", "page-3.pdf"]);
            for (i, file) in files.iter().enumerate() {
                assert_eq!(labels(&file.bytes), vec![format!("S-{}", i + 1)]);
            }
        }
        other => panic!("expected a split, got {other:?}"),
    }
    assert_staging_empty(root.path());
}

#[tokio::test]
async fn delivered_split_carries_every_page() {
    use std::io::{Cursor, Read};

    let root = TempDir::new().unwrap();
    let mut body: Vec<u8> = Vec::new();
    let delivery = dispatcher(&root)
        .deliver(
            OperationRequest::new("split").upload("doc.pdf", PDF, fixture(3, "D")),
            &mut body,
        )
        .await
        .unwrap();
    assert_eq!(delivery.content_type, "application/zip");
    assert_staging_empty(root.path());

    let mut archive = zip::ZipArchive::new(Cursor::new(body)).unwrap();
    let mut raw = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .unwrap()
        .read_to_string(&mut raw)
        .unwrap();
    let manifest: SplitManifest = serde_json::from_str(&raw).unwrap();

    let pages: Vec<Vec<String>> = manifest
        .files
        .iter()
        .map(|name| {
            let mut page = Vec::new();
            archive
                .by_name(&format!("{}/{name}", manifest.base_path))
                .unwrap()
                .read_to_end(&mut page)
                .unwrap();
            labels(&page)
        })
        .collect();
    assert_eq!(pages, vec![vec!["D-1"], vec!["D-2"], vec!["D-3"]]);
}

#[tokio::test]
async fn split_of_merge_restores_the_inputs() {
    let root = TempDir::new().unwrap();
    let d = dispatcher(&root);
    let merged = document(
        d.dispatch(
            OperationRequest::new("merge")
                .upload("a.pdf", PDF, fixture(2, "A"))
                .upload("b.pdf", PDF, fixture(1, "B")),
        )
        .await
        .unwrap(),
    );
    let out = d
        .dispatch(OperationRequest::new("split").upload("merged.pdf", PDF, merged))
        .await
        .unwrap();

    let OperationOutput::Split { files, .. } = out else {
        panic!("expected a split");
    };
    let pages: Vec<Vec<String>> = files.iter().map(|f| labels(&f.bytes)).collect();
    assert_eq!(pages, vec![vec!["A-1"], vec!["A-2"], vec!["B-1"]]);
}

#[tokio::test]
async fn compress_reports_sizes_with_one_decimal() {
    let root = TempDir::new().unwrap();
    let input = fixture(4, "C");
    let out = dispatcher(&root)
        .dispatch(OperationRequest::new("compress").upload("c.pdf", PDF, input.clone()))
        .await
        .unwrap();

    let report = out.report().cloned().unwrap();
    assert_eq!(report.original_size, input.len() as u64);
    assert_eq!(report.new_size, out.total_bytes() as u64);
    let scaled = report.reduction_percent * 10.0;
    assert!((scaled - scaled.round()).abs() < 1e-6);
    assert_staging_empty(root.path());
}

#[tokio::test]
async fn organize_five_pages_keeps_three_then_one() {
    let root = TempDir::new().unwrap();
    let out = dispatcher(&root)
        .dispatch(
            OperationRequest::new("organize")
                .param("pages", "[3,1]")
                .upload("deck.pdf", PDF, fixture(5, "O")),
        )
        .await
        .unwrap();
    assert_eq!(labels(&document(out)), vec!["O-3", "O-1"]);
}

#[tokio::test]
async fn rotate_twice_is_additive() {
    let root = TempDir::new().unwrap();
    let d = dispatcher(&root);
    let once = document(
        d.dispatch(
            OperationRequest::new("rotate")
                .param("angle", "90")
                .upload("r.pdf", PDF, fixture(1, "R")),
        )
        .await
        .unwrap(),
    );
    let twice = document(
        d.dispatch(
            OperationRequest::new("rotate")
                .param("angle", "90")
                .upload("r.pdf", PDF, once),
        )
        .await
        .unwrap(),
    );

    let doc = Document::load_mem(&twice).unwrap();
    let page_id = *doc.get_pages().values().next().unwrap();
    let rotate = doc
        .get_dictionary(page_id)
        .unwrap()
        .get(b"Rotate")
        .and_then(|o| o.as_i64())
        .unwrap();
    assert_eq!(rotate, 180);
}

#[tokio::test]
async fn protect_then_unlock_round_trips() {
    let root = TempDir::new().unwrap();
    let d = dispatcher(&root);
    let locked = document(
        d.dispatch(
            OperationRequest::new("protect")
                .param("password", "hunter2")
                .upload("p.pdf", PDF, fixture(1, "Secret")),
        )
        .await
        .unwrap(),
    );
    assert!(!String::from_utf8_lossy(&locked).contains("Secret-1"));

    let opened = document(
        d.dispatch(
            OperationRequest::new("unlock")
                .param("password", "hunter2")
                .upload("p.pdf", PDF, locked),
        )
        .await
        .unwrap(),
    );
    assert_eq!(labels(&opened), vec!["Secret-1"]);
    assert_staging_empty(root.path());
}

#[tokio::test]
async fn watermark_and_page_numbers_keep_page_count() {
    let root = TempDir::new().unwrap();
    let d = dispatcher(&root);
    let stamped = document(
        d.dispatch(
            OperationRequest::new("watermark")
                .param("text", "DRAFT")
                .upload("w.pdf", PDF, fixture(2, "W")),
        )
        .await
        .unwrap(),
    );
    let numbered = document(
        d.dispatch(OperationRequest::new("page-numbers").upload("w.pdf", PDF, stamped))
            .await
            .unwrap(),
    );
    assert_eq!(Document::load_mem(&numbered).unwrap().get_pages().len(), 2);
}

// ── Failure paths ────────────────────────────────────────────────────────────

#[tokio::test]
async fn errors_become_json_envelopes_and_leave_no_files() {
    let root = TempDir::new().unwrap();
    let d = dispatcher(&root);

    let cases = [
        (OperationRequest::new("merge").upload("a.pdf", PDF, fixture(1, "A")), 400),
        (OperationRequest::new("protect").upload("a.pdf", PDF, fixture(1, "A")), 400),
        (
            OperationRequest::new("organize")
                .param("pages", "7,8")
                .upload("a.pdf", PDF, fixture(2, "A")),
            400,
        ),
        (OperationRequest::new("rotate").upload("a.pdf", PDF, b"not a pdf".to_vec()), 500),
        (OperationRequest::new("pdf-to-word").upload("a.pdf", PDF, fixture(1, "A")), 501),
        (OperationRequest::new("office-to-pdf").upload("a.pdf", PDF, fixture(1, "A")), 500),
    ];

    for (request, status) in cases {
        let name = request.operation.clone();
        let env = d.dispatch_envelope(request).await;
        assert_eq!(env.status(), status, "{name}");
        let body: serde_json::Value = serde_json::from_slice(&env.body().unwrap()).unwrap();
        assert!(body["message"].is_string(), "{name}");
        assert!(body["error"].is_string(), "{name}");
        assert_staging_empty(root.path());
    }
}

#[test]
fn dispatch_from_synchronous_code() {
    let root = TempDir::new().unwrap();
    let d = dispatcher(&root);
    let env = tokio_test::block_on(
        d.dispatch_envelope(OperationRequest::new("split").upload("a.pdf", PDF, fixture(2, "Y"))),
    );
    assert!(env.is_success());
    match env {
        ResultEnvelope::Split { manifest, .. } => assert_eq!(manifest.files.len(), 2),
        other => panic!("expected a split envelope, got {other:?}"),
    }
    assert_staging_empty(root.path());
}
