//! Incremental extraction of `<tag>…</tag>` fragments from a byte stream.
//!
//! [`ElementScanner`] is the push-based core: feed it bytes, pull complete
//! fragments out. [`ElementStream`] drives a scanner from any [`AsyncRead`].
//!
//! The scanner does not parse XML. A fragment runs from a start marker (`<tag`
//! followed by whitespace, `>` or `/`) to the first `</tag>` after it, so nested
//! elements with the same name are not supported.

use std::path::Path;

use log::{debug, warn};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::SourceError;

/// Read size used by [`ElementStream`].
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() || needle.is_empty() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

enum StartMarker {
    Found(usize),
    /// `<tag` sits at the very end of the buffer; the next byte decides.
    Undecided(usize),
    Missing,
}

/// Push-based scanner for one element name.
#[derive(Debug)]
pub struct ElementScanner {
    open: Vec<u8>,
    close: Vec<u8>,
    buf: Vec<u8>,
    /// Offset from the partial record at the front of `buf` where the search
    /// for its end tag resumes.
    close_from: usize,
}

impl ElementScanner {
    pub fn new(tag: &str) -> Self {
        Self {
            open: format!("<{tag}").into_bytes(),
            close: format!("</{tag}>").into_bytes(),
            buf: Vec::new(),
            close_from: 0,
        }
    }

    /// Appends input bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently retained by the scanner.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether the retained bytes start an element that has not been closed yet.
    pub fn has_partial_fragment(&self) -> bool {
        !matches!(self.find_start(), StartMarker::Missing)
    }

    fn find_start(&self) -> StartMarker {
        let mut from = 0;
        while let Some(pos) = find(&self.buf, &self.open, from) {
            match self.buf.get(pos + self.open.len()) {
                None => return StartMarker::Undecided(pos),
                Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/' => {
                    return StartMarker::Found(pos);
                }
                // `<tagname>` when looking for `<tag`
                Some(_) => from = pos + 1,
            }
        }
        StartMarker::Missing
    }

    /// Position of the `>` ending the start tag beginning at `start`, skipping
    /// quoted attribute values.
    fn start_tag_end(&self, start: usize) -> Option<usize> {
        let mut quote: Option<u8> = None;
        for (offset, &b) in self.buf[start + self.open.len()..].iter().enumerate() {
            match quote {
                Some(q) if b == q => quote = None,
                Some(_) => {}
                None if b == b'"' || b == b'\'' => quote = Some(b),
                None if b == b'>' => return Some(start + self.open.len() + offset),
                None => {}
            }
        }
        None
    }

    fn discard_before(&mut self, pos: usize) {
        if pos > 0 {
            self.buf.drain(..pos);
            self.close_from = 0;
        }
    }

    fn take_through(&mut self, start: usize, end: usize) -> Vec<u8> {
        let fragment = self.buf[start..end].to_vec();
        self.buf.drain(..end);
        self.close_from = 0;
        fragment
    }

    /// Returns the next complete fragment, or `None` when more input is needed.
    pub fn next_fragment(&mut self) -> Option<Vec<u8>> {
        let start = match self.find_start() {
            StartMarker::Found(pos) => pos,
            StartMarker::Undecided(pos) => {
                self.discard_before(pos);
                return None;
            }
            StartMarker::Missing => {
                let keep = self.close.len().saturating_sub(1);
                if self.buf.len() > keep {
                    let cut = self.buf.len() - keep;
                    self.discard_before(cut);
                }
                return None;
            }
        };

        let Some(tag_end) = self.start_tag_end(start) else {
            self.discard_before(start);
            return None;
        };

        if self.buf[tag_end - 1] == b'/' {
            return Some(self.take_through(start, tag_end + 1));
        }

        let from = (tag_end + 1).max(start + self.close_from);
        match find(&self.buf, &self.close, from) {
            Some(close_at) => {
                let end = close_at + self.close.len();
                Some(self.take_through(start, end))
            }
            None => {
                self.discard_before(start);
                // An end tag can only begin in the last `close.len() - 1` bytes.
                self.close_from = self.buf.len().saturating_sub(self.close.len() - 1);
                None
            }
        }
    }
}

/// Async source of fragments over a reader.
pub struct ElementStream<R> {
    reader: R,
    scanner: ElementScanner,
    chunk: Vec<u8>,
    tag: String,
    exhausted: bool,
    yielded: usize,
}

impl ElementStream<tokio::fs::File> {
    /// Opens `path` and streams its `<tag>` elements.
    pub async fn open(path: impl AsRef<Path>, tag: &str) -> Result<Self, SourceError> {
        let file = tokio::fs::File::open(path.as_ref()).await?;
        debug!(
            "[STREAM] Opened {} for <{}> elements",
            path.as_ref().display(),
            tag
        );
        Ok(Self::new(file, tag))
    }
}

impl<R: AsyncRead + Unpin> ElementStream<R> {
    pub fn new(reader: R, tag: &str) -> Self {
        Self::with_chunk_size(reader, tag, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(reader: R, tag: &str, chunk_size: usize) -> Self {
        Self {
            reader,
            scanner: ElementScanner::new(tag),
            chunk: vec![0; chunk_size.max(1)],
            tag: tag.to_string(),
            exhausted: false,
            yielded: 0,
        }
    }

    /// Number of fragments produced so far.
    pub fn yielded(&self) -> usize {
        self.yielded
    }

    /// Pulls the next fragment. `Ok(None)` means the input is exhausted.
    pub async fn next_fragment(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        loop {
            if let Some(fragment) = self.scanner.next_fragment() {
                self.yielded += 1;
                return Ok(Some(fragment));
            }
            if self.exhausted {
                return Ok(None);
            }

            let n = self.reader.read(&mut self.chunk).await?;
            if n == 0 {
                self.exhausted = true;
                if self.scanner.has_partial_fragment() {
                    warn!(
                        "[STREAM] Input ended inside an unclosed <{}> element; discarded {} trailing bytes",
                        self.tag,
                        self.scanner.buffered()
                    );
                }
                debug!("[STREAM] End of input after {} fragments", self.yielded);
                return Ok(None);
            }
            self.scanner.push(&self.chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const DOC: &str = r#"<?xml version="1.0"?>
<batch>
  <records>
    <record id="1"><name>Ada</name></record>
    <recordset>ignored</recordset>
    <record id="2" note="a > b"><name>Bob</name></record>
    <record id="3"/>
    <record>
      <name>Cy</name>
    </record>
  </records>
</batch>"#;

    fn scan_all(input: &[u8], chunk: usize) -> Vec<String> {
        let mut scanner = ElementScanner::new("record");
        let mut out = Vec::new();
        for piece in input.chunks(chunk) {
            scanner.push(piece);
            while let Some(f) = scanner.next_fragment() {
                out.push(String::from_utf8(f).unwrap());
            }
        }
        out
    }

    #[test]
    fn test_scanner_extracts_fragments() {
        let fragments = scan_all(DOC.as_bytes(), DOC.len());
        assert_eq!(fragments.len(), 4);
        assert_eq!(fragments[0], r#"<record id="1"><name>Ada</name></record>"#);
        assert_eq!(
            fragments[1],
            r#"<record id="2" note="a > b"><name>Bob</name></record>"#
        );
        assert_eq!(fragments[2], r#"<record id="3"/>"#);
        assert!(fragments[3].contains("<name>Cy</name>"));
    }

    #[test]
    fn test_scanner_is_chunking_independent() {
        let expected = scan_all(DOC.as_bytes(), DOC.len());
        for chunk in [1, 2, 3, 5, 7, 16, 64] {
            assert_eq!(scan_all(DOC.as_bytes(), chunk), expected, "chunk size {chunk}");
        }
    }

    #[test]
    fn test_scanner_random_chunking() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut doc = String::from("<root>");
        for i in 0..200 {
            doc.push_str(&format!("<item n=\"{i}\"><v>{}</v></item>\n", i * 3));
        }
        doc.push_str("</root>");
        let bytes = doc.as_bytes();

        let mut scanner = ElementScanner::new("item");
        let mut count = 0;
        let mut pos = 0;
        while pos < bytes.len() {
            let take = rng.random_range(1..=40).min(bytes.len() - pos);
            scanner.push(&bytes[pos..pos + take]);
            pos += take;
            while let Some(f) = scanner.next_fragment() {
                let expected = format!("<item n=\"{count}\"><v>{}</v></item>", count * 3);
                assert_eq!(String::from_utf8(f).unwrap(), expected);
                count += 1;
            }
        }
        assert_eq!(count, 200);
    }

    #[test]
    fn test_scanner_bounds_memory_without_start_marker() {
        let mut scanner = ElementScanner::new("record");
        scanner.push(&vec![b'x'; 10_000]);
        assert!(scanner.next_fragment().is_none());
        assert_eq!(scanner.buffered(), "</record>".len() - 1);
    }

    #[test]
    fn test_scanner_keeps_partial_record() {
        let mut scanner = ElementScanner::new("record");
        scanner.push(b"junk junk <record><a>1</a>");
        assert!(scanner.next_fragment().is_none());
        assert!(scanner.has_partial_fragment());
        assert_eq!(scanner.buffered(), "<record><a>1</a>".len());
        scanner.push(b"</record>");
        assert_eq!(scanner.next_fragment().unwrap(), b"<record><a>1</a></record>");
        assert!(!scanner.has_partial_fragment());
    }

    #[test]
    fn test_scanner_resumes_end_tag_search() {
        let mut record = String::from("<record id=\"big\">");
        for i in 0..2000 {
            record.push_str(&format!("<line>{i}</line>"));
        }
        record.push_str("</record>");

        let mut scanner = ElementScanner::new("record");
        scanner.push(b"<records>");
        let mut fragments = Vec::new();
        let mut last_resume = 0;
        for byte in record.as_bytes() {
            scanner.push(std::slice::from_ref(byte));
            match scanner.next_fragment() {
                Some(f) => fragments.push(f),
                None => {
                    // Bytes already searched are never searched again.
                    assert!(scanner.close_from >= last_resume);
                    last_resume = scanner.close_from;
                }
            }
        }

        assert_eq!(fragments, vec![record.clone().into_bytes()]);
        assert_eq!(last_resume, record.len() - 1 - ("</record>".len() - 1));
        assert_eq!(scanner.close_from, 0);
        assert_eq!(scanner.buffered(), 0);
    }

    #[tokio::test]
    async fn test_stream_over_reader_with_small_chunks() {
        let mut stream = ElementStream::with_chunk_size(DOC.as_bytes(), "record", 3);
        let mut fragments = Vec::new();
        while let Some(f) = stream.next_fragment().await.unwrap() {
            fragments.push(f);
        }
        assert_eq!(fragments.len(), 4);
        assert_eq!(stream.yielded(), 4);
        assert!(stream.next_fragment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_drops_unclosed_trailing_record() {
        let input = b"<r><record>1</record><record>2";
        let mut stream = ElementStream::new(&input[..], "record");
        assert_eq!(
            stream.next_fragment().await.unwrap().unwrap(),
            b"<record>1</record>"
        );
        assert!(stream.next_fragment().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stream_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.xml");
        std::fs::write(&path, DOC).unwrap();

        let mut stream = ElementStream::open(&path, "record").await.unwrap();
        let mut count = 0;
        while stream.next_fragment().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 4);

        assert!(ElementStream::open(dir.path().join("nope.xml"), "record")
            .await
            .is_err());
    }
}
