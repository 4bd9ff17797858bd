use std::path::Path;

use lopdf::Document as LopdfDocument;

/// Loads a PDF from disk and checks that lopdf can parse it.
pub fn load_pdf(path: &Path) -> LopdfDocument {
    let bytes = std::fs::read(path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()));
    assert!(bytes.starts_with(b"%PDF"), "{} is not a PDF", path.display());
    LopdfDocument::load_mem(&bytes).unwrap_or_else(|e| panic!("parsing {}: {e}", path.display()))
}

pub fn page_count(path: &Path) -> usize {
    load_pdf(path).get_pages().len()
}

/// Whether `text` was drawn as a string literal somewhere in the (uncompressed) content.
pub fn contains_text(path: &Path, text: &str) -> bool {
    let doc = load_pdf(path);
    doc.get_pages().values().any(|&page_id| {
        doc.get_page_content(page_id)
            .map(|content| {
                let content = String::from_utf8_lossy(&content);
                content.contains(text)
            })
            .unwrap_or(false)
    })
}
