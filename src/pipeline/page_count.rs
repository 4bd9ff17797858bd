//! Cheap page counting on rendered PDF bytes, without parsing the document.

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
        pos += 1;
    }
    pos
}

fn find_all<'a>(haystack: &'a [u8], needle: &'a [u8]) -> impl Iterator<Item = usize> + 'a {
    haystack
        .windows(needle.len())
        .enumerate()
        .filter(move |(_, window)| *window == needle)
        .map(|(pos, _)| pos)
}

/// Largest `/Count N` in the file (the root page tree node).
fn max_count(bytes: &[u8]) -> Option<usize> {
    find_all(bytes, b"/Count")
        .filter_map(|pos| {
            let start = pos + b"/Count".len();
            let digits_at = skip_whitespace(bytes, start);
            // The value must be separated from the key.
            if digits_at == start {
                return None;
            }
            let end = bytes[digits_at..]
                .iter()
                .position(|b| !b.is_ascii_digit())
                .map_or(bytes.len(), |n| digits_at + n);
            std::str::from_utf8(&bytes[digits_at..end]).ok()?.parse().ok()
        })
        .max()
}

/// Number of `/Type /Page` objects, not counting `/Type /Pages` nodes.
fn page_objects(bytes: &[u8]) -> usize {
    find_all(bytes, b"/Type")
        .filter(|&pos| {
            let at = skip_whitespace(bytes, pos + b"/Type".len());
            bytes[at..].starts_with(b"/Page") && bytes.get(at + b"/Page".len()).is_some_and(|&b| b != b's')
        })
        .count()
}

/// Best-effort page count: the largest `/Count` value, else the number of page
/// objects, else 1.
pub fn count_pages(bytes: &[u8]) -> usize {
    match max_count(bytes) {
        Some(count) if count > 0 => count,
        _ => match page_objects(bytes) {
            0 => 1,
            pages => pages,
        },
    }
}
