//! Boundary-aware text chunker with overlap.
//!
//! Splits a [`Document`] into [`Segment`]s of at most `max_chars` characters.
//! Consecutive segments may share up to `overlap_chars` characters so that
//! sentences crossing a cut keep some context on both sides.
//!
//! # Algorithm
//!
//! 1. Normalize whitespace: line endings are unified, runs of spaces and tabs
//!    inside a line collapse to one space, runs of blank lines collapse to
//!    one blank line, and the text is trimmed.
//! 2. Starting at the cursor, if the rest of the text fits in `max_chars`,
//!    emit it and stop.
//! 3. Otherwise look for a cut point in the second half of the window,
//!    preferring (in order) a paragraph break, a line break, a sentence end,
//!    and any whitespace. With none available, cut hard at `max_chars`.
//! 4. Emit the window (trimmed), then move the cursor back by
//!    `overlap_chars` from the cut, snapped forward to a word start.
//!
//! Every cut lies more than `overlap_chars` past the window start, so the
//! cursor always advances and the sequence is finite.
//!
//! # Example
//!
//! ```rust
//! use ainsights_core::chunk::Chunker;
//! use ainsights_core::models::{Document, SourceType};
//!
//! let chunker = Chunker::new(500, 50).unwrap();
//! let doc = Document::text("report", SourceType::Report, "Sales rose.\n\nCosts fell.");
//! let segments = chunker.chunk(&doc).unwrap();
//! assert_eq!(segments.len(), 1);
//! assert_eq!(segments[0].id, "report#0");
//! ```

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::models::{Document, Segment};

/// Splits documents into bounded, optionally overlapping segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    /// Create a chunker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if `max_chars` is zero or `overlap_chars`
    /// is not smaller than `max_chars`.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(Error::Config("chunking.max_chars must be > 0".to_string()));
        }
        if overlap_chars >= max_chars {
            return Err(Error::Config(format!(
                "chunking.overlap_chars ({}) must be smaller than chunking.max_chars ({})",
                overlap_chars, max_chars
            )));
        }
        Ok(Self {
            max_chars,
            overlap_chars,
        })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    /// Lazily iterate the segments of `doc`.
    ///
    /// The returned iterator is finite and can be restarted with
    /// [`Segments::restart`] or cloned to replay from its current position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Chunking`] when the content is not UTF-8 or is empty
    /// after whitespace normalization.
    pub fn segments<'a>(&self, doc: &'a Document) -> Result<Segments<'a>> {
        let raw = doc.content_str()?;
        let text = normalize_text(raw);
        if text.is_empty() {
            return Err(Error::chunking(&doc.id, "document is empty"));
        }

        let mut bounds = Vec::with_capacity(text.len() + 1);
        let mut chars = Vec::with_capacity(text.len());
        for (i, c) in text.char_indices() {
            bounds.push(i);
            chars.push(c);
        }
        bounds.push(text.len());

        Ok(Segments {
            document: doc,
            text,
            chars,
            bounds,
            max_chars: self.max_chars,
            overlap_chars: self.overlap_chars,
            cursor: 0,
            ordinal: 0,
            done: false,
        })
    }

    /// Collect all segments of `doc`.
    pub fn chunk(&self, doc: &Document) -> Result<Vec<Segment>> {
        Ok(self.segments(doc)?.collect())
    }
}

/// Lazy segment sequence over one document. See [`Chunker::segments`].
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    document: &'a Document,
    text: String,
    chars: Vec<char>,
    /// Byte offset of each char, followed by `text.len()`.
    bounds: Vec<usize>,
    max_chars: usize,
    overlap_chars: usize,
    cursor: usize,
    ordinal: usize,
    done: bool,
}

impl<'a> Segments<'a> {
    /// Rewind to the first segment.
    pub fn restart(&mut self) {
        self.cursor = 0;
        self.ordinal = 0;
        self.done = false;
    }

    /// The whitespace-normalized text the segments are cut from.
    pub fn normalized_text(&self) -> &str {
        &self.text
    }

    /// Choose the end (exclusive, in chars) of the window starting at `start`.
    fn find_cut(&self, start: usize) -> usize {
        let chars = &self.chars;
        let hard = start + self.max_chars;
        let lo = (start + self.overlap_chars + 1).max(start + self.max_chars / 2);

        let passes: [&dyn Fn(usize) -> bool; 4] = [
            &|i: usize| i >= 2 && chars[i - 1] == '\n' && chars[i - 2] == '\n',
            &|i: usize| chars[i - 1] == '\n',
            &|i: usize| {
                i >= 2 && chars[i - 1].is_whitespace() && matches!(chars[i - 2], '.' | '!' | '?')
            },
            &|i: usize| chars[i - 1].is_whitespace(),
        ];

        for is_boundary in passes {
            if let Some(cut) = (lo..=hard).rev().find(|&i| is_boundary(i)) {
                return cut;
            }
        }
        hard
    }

    /// Move `pos` forward to the next word start before `limit`, if any.
    fn snap_to_word_start(&self, pos: usize, limit: usize) -> usize {
        if pos == 0 || self.chars[pos - 1].is_whitespace() {
            return pos;
        }
        (pos + 1..limit)
            .find(|&i| self.chars[i - 1].is_whitespace())
            .unwrap_or(pos)
    }
}

impl<'a> Iterator for Segments<'a> {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        loop {
            let total = self.chars.len();
            if self.done || self.cursor >= total {
                self.done = true;
                return None;
            }

            let start = self.cursor;
            let end = if total - start <= self.max_chars {
                self.done = true;
                total
            } else {
                let cut = self.find_cut(start);
                let next = self.snap_to_word_start(cut - self.overlap_chars, cut);
                self.cursor = next;
                cut
            };

            let mut s = start;
            let mut e = end;
            while s < e && self.chars[s].is_whitespace() {
                s += 1;
            }
            while e > s && self.chars[e - 1].is_whitespace() {
                e -= 1;
            }
            if s == e {
                continue;
            }

            let text = &self.text[self.bounds[s]..self.bounds[e]];
            let segment = make_segment(self.document, self.ordinal, s, text);
            self.ordinal += 1;
            return Some(segment);
        }
    }
}

/// Normalize whitespace the way the chunker sees a document.
pub fn normalize_text(text: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut in_blank_run = false;

    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            if !lines.is_empty() && !in_blank_run {
                lines.push(String::new());
                in_blank_run = true;
            }
            continue;
        }
        in_blank_run = false;
        lines.push(collapsed);
    }

    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Rebuild a document's text from its segments, dropping overlaps.
///
/// Gaps between segments only ever contain whitespace and are rendered
/// as a single space.
pub fn reassemble(segments: &[Segment]) -> String {
    let mut out = String::new();
    let mut covered = 0usize;
    let mut first = true;

    for seg in segments {
        let end = seg.offset + seg.char_len();
        if first {
            out.push_str(&seg.text);
            covered = end;
            first = false;
            continue;
        }
        if end <= covered {
            continue;
        }
        if seg.offset > covered {
            out.push(' ');
            out.push_str(&seg.text);
        } else {
            out.extend(seg.text.chars().skip(covered - seg.offset));
        }
        covered = end;
    }
    out
}

fn make_segment(doc: &Document, ordinal: usize, offset: usize, text: &str) -> Segment {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Segment {
        id: Segment::make_id(&doc.id, ordinal),
        document_id: doc.id.clone(),
        source_type: doc.source_type,
        ordinal,
        offset,
        text: text.to_string(),
        hash,
        ingested_at: doc.ingested_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceType;

    fn squash(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn doc(text: &str) -> Document {
        Document::text("doc1", SourceType::Text, text)
    }

    fn sample_corpus() -> Vec<String> {
        let report = (0..40)
            .map(|i| {
                format!(
                    "Paragraph {} covers regional revenue. Sales in the north grew by {} percent! Why? Demand.",
                    i,
                    i * 3
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
        let csv = (0..60)
            .map(|i| format!("2024-01-{:02},North,Widget,{},{}", i % 28 + 1, i * 10, i))
            .collect::<Vec<_>>()
            .join("\n");
        let unbroken = "x".repeat(1234);
        let unicode = "┌──────┐ Ünïcödé données ✓ — 売上が増加しました。 ".repeat(30);
        vec![report, csv, unbroken, unicode, "short".to_string()]
    }

    #[test]
    fn test_small_text_single_segment() {
        let chunker = Chunker::new(500, 50).unwrap();
        let segs = chunker.chunk(&doc("Hello, world!")).unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].ordinal, 0);
        assert_eq!(segs[0].offset, 0);
        assert_eq!(segs[0].text, "Hello, world!");
        assert_eq!(segs[0].id, "doc1#0");
    }

    #[test]
    fn test_empty_document_fails() {
        let chunker = Chunker::new(500, 50).unwrap();
        for content in ["", "   \n\n\t  \n"] {
            match chunker.chunk(&doc(content)) {
                Err(Error::Chunking { document_id, .. }) => assert_eq!(document_id, "doc1"),
                other => panic!("expected chunking error, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_unreadable_document_fails() {
        let chunker = Chunker::new(500, 50).unwrap();
        let bad = Document::bytes("bin", SourceType::Text, vec![0xc3, 0x28, 0xa0, 0xa1]);
        assert!(matches!(chunker.chunk(&bad), Err(Error::Chunking { .. })));
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(100, 100).is_err());
        assert!(Chunker::new(100, 99).is_ok());
    }

    #[test]
    fn test_segments_never_exceed_max_chars() {
        for text in sample_corpus() {
            for (max, overlap) in [(20, 0), (50, 10), (120, 40), (500, 50)] {
                let chunker = Chunker::new(max, overlap).unwrap();
                for seg in chunker.chunk(&doc(&text)).unwrap() {
                    assert!(
                        seg.char_len() <= max,
                        "segment of {} chars exceeds max {}",
                        seg.char_len(),
                        max
                    );
                }
            }
        }
    }

    #[test]
    fn test_reassembly_reproduces_content() {
        for text in sample_corpus() {
            for (max, overlap) in [(7, 0), (20, 5), (64, 16), (200, 50), (500, 50)] {
                let chunker = Chunker::new(max, overlap).unwrap();
                let segs = chunker.chunk(&doc(&text)).unwrap();
                assert_eq!(
                    squash(&reassemble(&segs)),
                    squash(&text),
                    "content lost with max={} overlap={}",
                    max,
                    overlap
                );
            }
        }
    }

    #[test]
    fn test_consecutive_segments_overlap() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu nu xi omicron pi rho";
        let chunker = Chunker::new(30, 10).unwrap();
        let segs = chunker.chunk(&doc(text)).unwrap();
        assert!(segs.len() > 1);
        for pair in segs.windows(2) {
            let prev_end = pair[0].offset + pair[0].char_len();
            assert!(pair[1].offset < prev_end, "expected overlap between segments");
        }
    }

    #[test]
    fn test_prefers_paragraph_boundary() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b ".repeat(40));
        let chunker = Chunker::new(100, 0).unwrap();
        let segs = chunker.chunk(&doc(&text)).unwrap();
        assert_eq!(segs[0].text, "a".repeat(60));
        assert!(segs[1].text.starts_with('b'));
    }

    #[test]
    fn test_ordinals_contiguous() {
        let text = (0..50)
            .map(|i| format!("Paragraph number {}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunker = Chunker::new(40, 8).unwrap();
        let segs = chunker.chunk(&doc(&text)).unwrap();
        for (i, s) in segs.iter().enumerate() {
            assert_eq!(s.ordinal, i);
            assert_eq!(s.id, format!("doc1#{}", i));
        }
    }

    #[test]
    fn test_restartable_and_deterministic() {
        let text = "Alpha.\n\nBeta.\n\nGamma.\n\nDelta.";
        let chunker = Chunker::new(10, 2).unwrap();
        let d = doc(text);
        let mut iter = chunker.segments(&d).unwrap();
        let first: Vec<Segment> = iter.by_ref().collect();
        assert!(iter.next().is_none());
        iter.restart();
        let second: Vec<Segment> = iter.collect();
        assert_eq!(first, second);
        assert_eq!(first, chunker.chunk(&d).unwrap());
    }

    #[test]
    fn test_normalize_text() {
        let raw = "  Region:\t North  \r\n\r\n\r\n\nTotal   sales\n\n  ";
        assert_eq!(normalize_text(raw), "Region: North\n\nTotal sales");
    }

    #[test]
    fn test_offsets_point_into_normalized_text() {
        let text = "First line here.\nSecond line here.\n\nThird paragraph is a bit longer than the rest.";
        let d = doc(text);
        let chunker = Chunker::new(25, 5).unwrap();
        let iter = chunker.segments(&d).unwrap();
        let normalized: Vec<char> = iter.normalized_text().chars().collect();
        for seg in iter {
            let slice: String = normalized[seg.offset..seg.offset + seg.char_len()]
                .iter()
                .collect();
            assert_eq!(slice, seg.text);
        }
    }
}
