/// Separator placed between records when several are combined into one document.
pub const PAGE_BREAK: &str = r#"<div class="page-break"></div>"#;

/// Wraps a rendered fragment into a complete A4 HTML document.
///
/// `base_url` becomes the document's `<base href>`, so relative image and
/// stylesheet references resolve against the template directory.
pub fn wrap_document(body: &str, base_url: Option<&str>, extra_css: &str) -> String {
    let base = base_url
        .map(|url| format!(r#"<base href="{url}">"#))
        .unwrap_or_default();
    format!(
        r#"<!DOCTYPE html><html><head><meta charset="utf-8">
{base}
<style>
@page {{ size: A4; margin: 20mm 15mm; }}
body {{ font-family: system-ui, -apple-system, Segoe UI, Roboto, Arial, sans-serif; }}
.page-break {{ page-break-after: always; }}
{extra_css}
</style></head><body>{body}</body></html>"#
    )
}
