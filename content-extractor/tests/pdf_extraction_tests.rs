use std::path::Path;

use content_extractor::{extract_path, warnings};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

/// Write a simple one-font PDF with one page per entry in `page_texts`.
/// An empty entry produces a page with no text operations at all.
fn write_pdf(path: &Path, page_texts: &[&str]) {
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

    let mut kids: Vec<Object> = Vec::new();
    for text in page_texts {
        let operations = if text.is_empty() {
            Vec::new()
        } else {
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![72.into(), 720.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ]
        };
        let content = Content { operations };
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => count,
        "Resources" => resources_id,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path).unwrap();
}

#[test]
fn healthy_pdf_uses_the_primary_engine_without_fallback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.pdf");
    let body = "Expense reports must be filed by the 25th of each month. \
                Approval by the department head is required before payment. \
                Receipts are mandatory for any amount above 5000 yen.";
    write_pdf(&path, &[body, body]);

    let out = extract_path(&path).unwrap();
    assert_eq!(out.meta.engine, "lopdf");
    assert!(out.meta.fallback.is_none());
    assert_eq!(out.num_pages, Some(2));
    assert!(out.full_text.contains("Expense reports"));
    let pages = out.pages.unwrap();
    assert_eq!(pages.len(), 2);
    assert!(pages[1].contains("Receipts"));
}

#[test]
fn textless_pdf_is_flagged_as_image_pdf() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scan.pdf");
    write_pdf(&path, &["", "", ""]);

    let out = extract_path(&path).unwrap();
    assert!(out.meta.has_warning(warnings::NO_TEXT_EXTRACTED));
    assert!(out.meta.has_warning(warnings::IMAGE_PDF_SUSPECTED));
    let fallback = out.meta.fallback.expect("secondary engine should be tried");
    assert!(fallback.attempted);
}

#[test]
fn low_text_volume_triggers_the_engine_comparison() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("short.pdf");
    write_pdf(&path, &["Hello"]);

    let out = extract_path(&path).unwrap();
    assert!(out.meta.has_warning(warnings::LOW_TEXT_VOLUME));
    assert!(out.meta.fallback.is_some());
    assert!(out.full_text.contains("Hello"));
}
