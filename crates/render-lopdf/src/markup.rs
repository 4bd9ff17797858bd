//! A deliberately small HTML reader: visible text by block, page breaks, and the
//! sub-resources a real browser would request.

/// Stand-in for the current page number inside header/footer text.
pub(crate) const PAGE_NUMBER_MARK: char = '\u{E000}';
/// Stand-in for the total page count inside header/footer text.
pub(crate) const TOTAL_PAGES_MARK: char = '\u{E001}';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Text(String),
    PageBreak,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceKind {
    Image,
    Stylesheet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub href: String,
}

#[derive(Debug, Default)]
pub struct ParsedMarkup {
    pub base_href: Option<String>,
    pub blocks: Vec<Block>,
    pub resources: Vec<ResourceRef>,
}

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "br", "dd", "div", "dl", "dt",
    "figcaption", "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr",
    "li", "main", "nav", "ol", "p", "pre", "section", "table", "tbody", "thead", "tfoot",
    "tr", "ul",
];

/// Elements whose content is never visible.
const HIDDEN_TAGS: &[&str] = &["head", "script", "style", "title", "template"];

struct Tag {
    name: String,
    closing: bool,
    attrs: Vec<(String, String)>,
}

impl Tag {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|c| c.split_whitespace().any(|c| c == class))
    }
}

fn parse_tag(raw: &str) -> Tag {
    let (closing, body) = match raw.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, raw),
    };
    let body = body.trim_end_matches('/');
    let name_end = body
        .find(|c: char| c.is_whitespace() || c == '/')
        .unwrap_or(body.len());
    let name = body[..name_end].to_ascii_lowercase();

    let mut attrs = Vec::new();
    let mut rest = body[name_end..].trim_start_matches(|c: char| c.is_whitespace() || c == '/');
    while !rest.is_empty() {
        let key_end = rest
            .find(|c: char| c.is_whitespace() || c == '=' || c == '/')
            .unwrap_or(rest.len());
        let key = rest[..key_end].to_ascii_lowercase();
        rest = rest[key_end..].trim_start();

        let mut value = String::new();
        if let Some(after_eq) = rest.strip_prefix('=') {
            let after_eq = after_eq.trim_start();
            match after_eq.chars().next() {
                Some(q @ ('"' | '\'')) => {
                    let inner = &after_eq[1..];
                    let end = inner.find(q).unwrap_or(inner.len());
                    value = decode_entities(&inner[..end]);
                    rest = inner.get(end + 1..).unwrap_or("");
                }
                _ => {
                    let end = after_eq
                        .find(char::is_whitespace)
                        .unwrap_or(after_eq.len());
                    value = decode_entities(&after_eq[..end]);
                    rest = &after_eq[end..];
                }
            }
        }
        if !key.is_empty() {
            attrs.push((key, value));
        }
        rest = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '/');
    }

    Tag {
        name,
        closing,
        attrs,
    }
}

/// Decodes the handful of entities templates actually produce.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&end| end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" | "#39" => Some('\''),
                "nbsp" => Some(' '),
                _ => entity
                    .strip_prefix("#x")
                    .or_else(|| entity.strip_prefix("#X"))
                    .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                    .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                    .and_then(char::from_u32),
            };
            ch.map(|c| (c, end))
        });
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Default)]
struct Collector {
    parsed: ParsedMarkup,
    line: String,
    hidden_depth: usize,
}

impl Collector {
    fn push_text(&mut self, text: &str) {
        if self.hidden_depth > 0 {
            return;
        }
        let text = decode_entities(text);
        if text.starts_with(char::is_whitespace) {
            self.separate();
        }
        for (i, word) in text.split_whitespace().enumerate() {
            if i > 0 {
                self.line.push(' ');
            }
            self.line.push_str(word);
        }
        if text.ends_with(char::is_whitespace) {
            self.separate();
        }
    }

    fn separate(&mut self) {
        if !self.line.is_empty() && !self.line.ends_with(' ') {
            self.line.push(' ');
        }
    }

    fn push_inline(&mut self, text: &str) {
        if self.hidden_depth > 0 {
            return;
        }
        self.separate();
        self.line.push_str(text);
    }

    fn flush(&mut self) {
        let line = self.line.trim();
        if !line.is_empty() {
            self.parsed.blocks.push(Block::Text(line.to_string()));
        }
        self.line.clear();
    }

    fn handle_tag(&mut self, tag: Tag) {
        if HIDDEN_TAGS.contains(&tag.name.as_str()) {
            if tag.closing {
                self.hidden_depth = self.hidden_depth.saturating_sub(1);
            } else {
                self.hidden_depth += 1;
            }
        }

        if tag.closing {
            if BLOCK_TAGS.contains(&tag.name.as_str()) {
                self.flush();
            } else if matches!(tag.name.as_str(), "td" | "th") {
                self.push_inline("");
            }
            return;
        }

        match tag.name.as_str() {
            "base" => {
                if let Some(href) = tag.attr("href") {
                    self.parsed.base_href = Some(href.to_string());
                }
            }
            "link" => {
                let is_stylesheet = tag
                    .attr("rel")
                    .is_some_and(|r| r.eq_ignore_ascii_case("stylesheet"));
                if let (true, Some(href)) = (is_stylesheet, tag.attr("href")) {
                    self.parsed.resources.push(ResourceRef {
                        kind: ResourceKind::Stylesheet,
                        href: href.to_string(),
                    });
                }
            }
            "img" => {
                if let Some(src) = tag.attr("src").filter(|s| !s.is_empty()) {
                    self.parsed.resources.push(ResourceRef {
                        kind: ResourceKind::Image,
                        href: src.to_string(),
                    });
                }
                if let Some(alt) = tag.attr("alt").filter(|a| !a.trim().is_empty()) {
                    let alt = format!("[{}]", alt.trim());
                    self.push_inline(&alt);
                }
            }
            _ => {}
        }

        if self.hidden_depth == 0 {
            if tag.has_class("pageNumber") {
                self.line.push(PAGE_NUMBER_MARK);
            } else if tag.has_class("totalPages") {
                self.line.push(TOTAL_PAGES_MARK);
            }
        }

        if BLOCK_TAGS.contains(&tag.name.as_str()) {
            self.flush();
        }
        if tag.has_class("page-break") && self.hidden_depth == 0 {
            self.flush();
            self.parsed.blocks.push(Block::PageBreak);
        }
    }
}

/// Reads `html` into text blocks, page breaks and sub-resource references.
pub fn parse_markup(html: &str) -> ParsedMarkup {
    let mut collector = Collector::default();
    let mut rest = html;

    while let Some(lt) = rest.find('<') {
        collector.push_text(&rest[..lt]);
        let tail = &rest[lt..];

        if let Some(comment) = tail.strip_prefix("<!--") {
            rest = comment.find("-->").map_or("", |end| &comment[end + 3..]);
            continue;
        }
        let Some(gt) = tail.find('>') else {
            collector.push_text(tail);
            rest = "";
            break;
        };
        let raw = &tail[1..gt];
        rest = &tail[gt + 1..];

        if raw.starts_with('!') || raw.starts_with('?') {
            continue;
        }
        collector.handle_tag(parse_tag(raw));
    }
    collector.push_text(rest);
    collector.flush();
    collector.parsed
}

/// Visible text of a header/footer snippet on one line, with page placeholders.
pub fn inline_text(html: &str) -> String {
    parse_markup(html)
        .blocks
        .into_iter()
        .filter_map(|b| match b {
            Block::Text(t) => Some(t),
            Block::PageBreak => None,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn fill_page_marks(text: &str, page: usize, total: usize) -> String {
    text.replace(PAGE_NUMBER_MARK, &page.to_string())
        .replace(TOTAL_PAGES_MARK, &total.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(parsed: &ParsedMarkup) -> Vec<String> {
        parsed
            .blocks
            .iter()
            .map(|b| match b {
                Block::Text(t) => t.clone(),
                Block::PageBreak => "<break>".to_string(),
            })
            .collect()
    }

    #[test]
    fn test_blocks_and_inline_text() {
        let parsed = parse_markup(
            "<html><head><title>Ignored</title><style>p{color:red}</style></head>\
             <body><h1>Invoice  #1</h1><p>Hello <b>Ada</b>,\n thanks!</p><div>Total: 5 &amp; 6</div></body></html>",
        );
        assert_eq!(
            texts(&parsed),
            vec!["Invoice #1", "Hello Ada, thanks!", "Total: 5 & 6"]
        );
    }

    #[test]
    fn test_page_breaks() {
        let parsed = parse_markup(
            r#"<p>one</p><div class="page-break"></div><p>two</p><div class="x page-break"/>"#,
        );
        assert_eq!(texts(&parsed), vec!["one", "<break>", "two", "<break>"]);
    }

    #[test]
    fn test_resources_base_and_alt_text() {
        let parsed = parse_markup(
            r#"<head><base href="file:///tpl/"><link rel="stylesheet" href="style.css"><link rel="icon" href="x.ico"></head>
               <body><p>Logo: <img src="img/logo.png" alt="ACME logo"></p><img src=''></body>"#,
        );
        assert_eq!(parsed.base_href.as_deref(), Some("file:///tpl/"));
        assert_eq!(
            parsed.resources,
            vec![
                ResourceRef {
                    kind: ResourceKind::Stylesheet,
                    href: "style.css".into()
                },
                ResourceRef {
                    kind: ResourceKind::Image,
                    href: "img/logo.png".into()
                },
            ]
        );
        assert_eq!(texts(&parsed), vec!["Logo: [ACME logo]"]);
    }

    #[test]
    fn test_table_cells_are_separated() {
        let parsed = parse_markup("<table><tr><td>a</td><td>b</td></tr><tr><td>c</td></tr></table>");
        assert_eq!(texts(&parsed), vec!["a b", "c"]);
    }

    #[test]
    fn test_comments_and_doctype_are_skipped() {
        let parsed = parse_markup("<!DOCTYPE html><!-- <p>hidden</p> --><p>shown</p>");
        assert_eq!(texts(&parsed), vec!["shown"]);
    }

    #[test]
    fn test_entities() {
        assert_eq!(decode_entities("a &lt;b&gt; &#65;&#x42; &unknown; & c"), "a <b> AB &unknown; & c");
    }

    #[test]
    fn test_page_marks() {
        let text = inline_text(
            r#"<div>Page <span class="pageNumber"></span> of <span class="totalPages"></span></div>"#,
        );
        assert_eq!(fill_page_marks(&text, 2, 5), "Page 2 of 5");
    }
}
