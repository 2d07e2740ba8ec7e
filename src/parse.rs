//! Document parsers for the supported input formats.
//!
//! Each parser turns raw file bytes into a [`ParsedDocument`]. PDFs are
//! extracted page by page so segments can carry page numbers; text and
//! Markdown files become a single unpaged body.

use kb_harness_core::models::{FileFormat, ParsedDocument, ParsedPage};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ParseError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("file is not valid UTF-8 text: {0}")]
    Encoding(String),
    #[error("parser aborted: {0}")]
    Aborted(String),
}

/// Parser for one file type.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument, ParseError>;
}

/// UTF-8 text and Markdown. A leading byte-order mark is dropped.
pub struct PlainTextParser;

impl DocumentParser for PlainTextParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
        let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
        let text = std::str::from_utf8(bytes).map_err(|e| ParseError::Encoding(e.to_string()))?;
        Ok(ParsedDocument::from_text(text))
    }
}

/// PDF text extraction via `pdf-extract`, one [`ParsedPage`] per page.
pub struct PdfParser;

impl DocumentParser for PdfParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedDocument, ParseError> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| ParseError::Pdf(e.to_string()))?;
        Ok(ParsedDocument {
            pages: pages
                .into_iter()
                .enumerate()
                .map(|(i, text)| ParsedPage {
                    number: u32::try_from(i + 1).ok(),
                    text,
                })
                .collect(),
        })
    }
}

/// Select the parser for a file format.
pub fn parser_for(format: FileFormat) -> &'static dyn DocumentParser {
    match format {
        FileFormat::Pdf => &PdfParser,
        FileFormat::Text | FileFormat::Markdown => &PlainTextParser,
    }
}
