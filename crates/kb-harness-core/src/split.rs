//! Paragraph-boundary text splitter with overlap.
//!
//! Splits parsed document text into segments no longer than `max_chars`
//! characters. Splitting happens on paragraph boundaries (blank lines) so
//! each segment stays semantically coherent; consecutive segments share up
//! to `overlap_chars` characters of trailing context so passages that
//! straddle a boundary remain retrievable.
//!
//! # Algorithm
//!
//! 1. Normalize `\r\n` to `\n` and split on `\n\n`.
//! 2. Accumulate trimmed paragraphs into a buffer until adding the next one
//!    would exceed `max_chars`.
//! 3. When exceeded, flush the buffer and seed the next buffer with the
//!    word-aligned tail (at most `overlap_chars`) of the flushed segment,
//!    provided the tail and the next paragraph fit together.
//! 4. A paragraph longer than `max_chars` is hard-split into overlapping
//!    windows, breaking at whitespace where possible.
//! 5. Whitespace-only input produces no segments.
//!
//! Sizes are measured in `char`s, never bytes, so multi-byte text is safe.
//!
//! # Example
//!
//! ```rust
//! use kb_harness_core::split::split_text;
//!
//! let segments = split_text("Hello world.\n\nSecond paragraph.", 500, 50);
//! assert_eq!(segments.len(), 1);
//! ```

use crate::models::{ParsedDocument, Segment, SegmentMetadata};

/// Segment sizing, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitterConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for SplitterConfig {
    fn default() -> Self {
        Self {
            max_chars: 500,
            overlap_chars: 50,
        }
    }
}

/// Identity of the document being split; copied into every segment.
#[derive(Debug, Clone, Copy)]
pub struct SegmentSource<'a> {
    pub file_name: &'a str,
    pub file_path: &'a str,
    pub collection_id: &'a str,
}

/// Split every page of a parsed document and attach segment metadata.
///
/// Segment indices are contiguous across pages, starting at 0. Segments
/// never span two pages, so each carries its page number when known.
pub fn segment_document(
    doc: &ParsedDocument,
    source: SegmentSource<'_>,
    config: SplitterConfig,
) -> Vec<Segment> {
    let mut segments = Vec::new();
    for page in &doc.pages {
        for text in split_text(&page.text, config.max_chars, config.overlap_chars) {
            let segment_index = segments.len();
            segments.push(Segment {
                text,
                metadata: SegmentMetadata {
                    file_name: source.file_name.to_string(),
                    file_path: source.file_path.to_string(),
                    segment_index,
                    collection_id: source.collection_id.to_string(),
                    page_number: page.number,
                },
            });
        }
    }
    segments
}

/// Split text into overlapping segments on paragraph boundaries.
///
/// Every returned segment is non-empty and at most `max_chars` characters.
pub fn split_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let overlap_chars = overlap_chars.min(max_chars - 1);

    let normalized = text.replace("\r\n", "\n");
    let mut segments: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in normalized.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }
        let para_len = char_len(para);

        if para_len > max_chars {
            if !buf.is_empty() {
                segments.push(std::mem::take(&mut buf));
            }
            segments.extend(hard_split(para, max_chars, overlap_chars));
            continue;
        }

        let would_be = if buf.is_empty() {
            para_len
        } else {
            char_len(&buf) + 2 + para_len
        };

        if would_be > max_chars && !buf.is_empty() {
            let tail = overlap_tail(&buf, overlap_chars);
            segments.push(std::mem::take(&mut buf));
            if !tail.is_empty() && char_len(&tail) + 2 + para_len <= max_chars {
                buf.push_str(&tail);
            }
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
        }
        buf.push_str(para);
    }

    if !buf.is_empty() {
        segments.push(buf);
    }

    segments
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The last `overlap` characters of `text`, advanced to a word start when
/// the cut would land mid-word.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= overlap {
        return text.trim().to_string();
    }
    let mut start = chars.len() - overlap;
    if !chars[start - 1].is_whitespace() {
        if let Some(ws) = chars[start..].iter().position(|c| c.is_whitespace()) {
            start += ws;
        }
    }
    chars[start..].iter().collect::<String>().trim().to_string()
}

/// Window an oversized paragraph into pieces of at most `max` characters,
/// each overlapping the previous one by up to `overlap` characters.
fn hard_split(para: &str, max: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = para.chars().collect();
    let len = chars.len();
    let mut pieces = Vec::new();
    let mut start = 0;

    while start < len {
        let mut end = (start + max).min(len);
        if end < len {
            // Prefer breaking just after the last whitespace, as long as the
            // piece still makes progress past the overlap region.
            let floor = start + overlap + 1;
            if let Some(ws) = (floor..end).rev().find(|&i| chars[i].is_whitespace()) {
                end = ws + 1;
            }
        }

        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        if end >= len {
            break;
        }

        let mut next = end.saturating_sub(overlap).max(start + 1);
        if next > 0 && !chars[next - 1].is_whitespace() {
            if let Some(ws) = (next..end).find(|&i| chars[i].is_whitespace()) {
                next = ws + 1;
            }
        }
        start = next;
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ParsedPage;

    #[test]
    fn small_text_single_segment() {
        let segments = split_text("Hello, world!", 500, 50);
        assert_eq!(segments, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn empty_and_whitespace_produce_nothing() {
        assert!(split_text("", 500, 50).is_empty());
        assert!(split_text("  \n\n \r\n\r\n  ", 500, 50).is_empty());
    }

    #[test]
    fn paragraphs_under_limit_are_merged() {
        let text = "First paragraph.\n\nSecond paragraph.\n\nThird paragraph.";
        let segments = split_text(text, 500, 50);
        assert_eq!(segments.len(), 1);
        assert!(segments[0].contains("First paragraph."));
        assert!(segments[0].contains("Third paragraph."));
    }

    #[test]
    fn segments_respect_max_chars() {
        let text = (0..60)
            .map(|i| format!("Paragraph number {} talks about something.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let segments = split_text(&text, 120, 30);
        assert!(segments.len() > 1);
        for s in &segments {
            assert!(s.chars().count() <= 120, "too long: {}", s.chars().count());
            assert!(!s.trim().is_empty());
        }
    }

    #[test]
    fn consecutive_segments_overlap() {
        let text = "alpha beta gamma delta epsilon.\n\nzeta eta theta iota kappa.\n\nlambda mu nu xi omicron.";
        let segments = split_text(text, 60, 20);
        assert!(segments.len() >= 2);
        // The second segment is seeded with the tail of the first.
        let seed = segments[1].split("\n\n").next().unwrap();
        assert!(!seed.is_empty());
        assert!(segments[0].ends_with(seed));
        assert!(seed.chars().count() <= 20);
    }

    #[test]
    fn zero_overlap_never_repeats_text() {
        let text = "one two three.\n\nfour five six.\n\nseven eight nine.";
        let segments = split_text(text, 18, 0);
        assert_eq!(
            segments,
            vec!["one two three.", "four five six.", "seven eight nine."]
        );
    }

    #[test]
    fn oversized_paragraph_is_windowed() {
        let para = "word ".repeat(300);
        let segments = split_text(&para, 100, 20);
        assert!(segments.len() > 3);
        for s in &segments {
            assert!(s.chars().count() <= 100);
            assert!(s.starts_with("word"));
        }
    }

    #[test]
    fn oversized_unbroken_paragraph_terminates() {
        let para = "x".repeat(1050);
        let segments = split_text(&para, 100, 10);
        assert!(segments.iter().all(|s| s.chars().count() <= 100));
        let covered: usize = segments.iter().map(|s| s.len()).sum();
        assert!(covered >= 1050);
    }

    #[test]
    fn multibyte_text_is_split_on_char_boundaries() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘".repeat(10);
        let segments = split_text(&text, 30, 5);
        assert!(!segments.is_empty());
        for s in &segments {
            assert!(s.chars().count() <= 30);
        }
    }

    #[test]
    fn deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        assert_eq!(split_text(text, 12, 4), split_text(text, 12, 4));
    }

    #[test]
    fn segment_document_indexes_across_pages() {
        let doc = ParsedDocument {
            pages: vec![
                ParsedPage {
                    number: Some(1),
                    text: "Page one intro.\n\nPage one body.".into(),
                },
                ParsedPage {
                    number: Some(2),
                    text: "   ".into(),
                },
                ParsedPage {
                    number: Some(3),
                    text: "Page three.".into(),
                },
            ],
        };
        let source = SegmentSource {
            file_name: "spec.pdf",
            file_path: "/docs/spec.pdf",
            collection_id: "manuals",
        };
        let segments = segment_document(&doc, source, SplitterConfig::default());
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].metadata.segment_index, 0);
        assert_eq!(segments[0].metadata.page_number, Some(1));
        assert_eq!(segments[1].metadata.segment_index, 1);
        assert_eq!(segments[1].metadata.page_number, Some(3));
        assert!(segments.iter().all(|s| s.metadata.collection_id == "manuals"));
    }
}
