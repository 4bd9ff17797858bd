//! Lays text blocks out on A4 pages and serializes them with lopdf.

use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

use crate::markup::{Block, fill_page_marks};

pub const A4_WIDTH: f32 = 595.0;
pub const A4_HEIGHT: f32 = 842.0;
/// 20mm
pub const MARGIN_VERTICAL: f32 = 56.7;
/// 15mm
pub const MARGIN_HORIZONTAL: f32 = 42.5;

const FONT_SIZE: f32 = 10.0;
const LEADING: f32 = 14.0;
const BLOCK_GAP: f32 = 4.0;
/// Conservative average Helvetica glyph width at 1pt.
const AVG_CHAR_WIDTH: f32 = 0.5;

/// Page geometry derived from the constants above.
#[derive(Debug, Clone, Copy)]
pub struct PageMetrics {
    pub chars_per_line: usize,
    pub usable_height: f32,
}

impl Default for PageMetrics {
    fn default() -> Self {
        let usable_width = A4_WIDTH - 2.0 * MARGIN_HORIZONTAL;
        Self {
            chars_per_line: (usable_width / (FONT_SIZE * AVG_CHAR_WIDTH)) as usize,
            usable_height: A4_HEIGHT - 2.0 * MARGIN_VERTICAL,
        }
    }
}

/// Text lines of one page, each with its offset from the top margin.
pub type PageLines = Vec<(f32, String)>;

/// Word-wraps `text` to at most `width` characters per line. Words longer than a
/// line are split.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let width = width.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > width {
            if current_len > 0 {
                lines.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let rest = word.split_off(width);
            lines.push(word.into_iter().collect());
            word = rest;
        }
        if word.is_empty() {
            continue;
        }
        let needed = if current_len == 0 { word.len() } else { current_len + 1 + word.len() };
        if needed > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current_len += word.len();
        current.extend(word);
    }
    if current_len > 0 {
        lines.push(current);
    }
    lines
}

/// Flows blocks into pages. Always yields at least one (possibly empty) page.
pub fn paginate(blocks: &[Block], metrics: PageMetrics) -> Vec<PageLines> {
    let mut pages: Vec<PageLines> = vec![Vec::new()];
    let mut cursor = 0.0_f32;

    for block in blocks {
        match block {
            Block::PageBreak => {
                pages.push(Vec::new());
                cursor = 0.0;
            }
            Block::Text(text) => {
                for line in wrap(text, metrics.chars_per_line) {
                    if cursor + LEADING > metrics.usable_height {
                        pages.push(Vec::new());
                        cursor = 0.0;
                    }
                    cursor += LEADING;
                    if let Some(page) = pages.last_mut() {
                        page.push((cursor, line));
                    }
                }
                cursor += BLOCK_GAP;
            }
        }
    }

    // A break at the very end does not open an extra blank page.
    if pages.len() > 1 && pages.last().is_some_and(|p| p.is_empty()) {
        pages.pop();
    }
    pages
}

/// WinAnsi is close enough to Latin-1 for the text this renderer draws.
fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match c {
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{20AC}' => 0x80,
            c if (c as u32) < 0x100 => c as u8,
            _ => b'?',
        })
        .collect()
}

fn text_op(ops: &mut Vec<Operation>, x: f32, y: f32, text: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec!["F1".into(), FONT_SIZE.into()]));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new(
        "Tj",
        vec![Object::string_literal(encode_win_ansi(text))],
    ));
    ops.push(Operation::new("ET", vec![]));
}

/// Header and footer lines, still holding page placeholders.
#[derive(Debug, Clone, Default)]
pub struct PageDecorations {
    pub header: Option<String>,
    pub footer: Option<String>,
}

/// Serializes laid-out pages into a PDF file.
pub fn write_pdf(pages: &[PageLines], decorations: &PageDecorations) -> Result<Vec<u8>, lopdf::Error> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let total = pages.len();
    let mut page_ids: Vec<ObjectId> = Vec::with_capacity(total);
    for (index, lines) in pages.iter().enumerate() {
        let mut ops = Vec::new();
        let top = A4_HEIGHT - MARGIN_VERTICAL;
        for (offset, line) in lines {
            text_op(&mut ops, MARGIN_HORIZONTAL, top - offset, line);
        }
        if let Some(header) = &decorations.header {
            let text = fill_page_marks(header, index + 1, total);
            text_op(&mut ops, MARGIN_HORIZONTAL, A4_HEIGHT - MARGIN_VERTICAL / 2.0, &text);
        }
        if let Some(footer) = &decorations.footer {
            let text = fill_page_marks(footer, index + 1, total);
            text_op(&mut ops, MARGIN_HORIZONTAL, MARGIN_VERTICAL / 2.0, &text);
        }

        let content = Content { operations: ops };
        let content_id = doc.add_object(Stream::new(Dictionary::new(), content.encode()?));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), A4_WIDTH.into(), A4_HEIGHT.into()],
            "Contents" => content_id,
            "Resources" => resources_id,
        });
        page_ids.push(page_id);
    }

    let pages_dict = dictionary! {
        "Type" => "Pages",
        "Kids" => page_ids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
        "Count" => total as i64,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}
