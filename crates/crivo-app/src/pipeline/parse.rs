//! Document parsing: local file to ordered, page-tagged text segments.

use std::path::Path;

use pdfium_render::prelude::{Pdfium, PdfiumError};
use thiserror::Error;

use crate::text::cleanup_segment_text;

/// Number of raw CSV lines grouped into one segment.
const CSV_ROWS_PER_SEGMENT: usize = 50;

/// Cap applied to the lossy-text fallback for unknown formats.
const FALLBACK_MAX_CHARS: usize = 50_000;

/// One parsed slice of the source document, in reading order.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub text: String,
    /// 1-based page number for paginated formats; `None` for row-oriented ones.
    pub page_number: Option<u32>,
}

/// Errors emitted while turning a downloaded file into segments.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to load Pdfium runtime: {0}")]
    Library(#[from] PdfiumError),
    #[error("failed to load PDF document: {0}")]
    Document(#[source] PdfiumError),
    #[error("failed to extract text for page {page_index}: {source}")]
    PageText {
        page_index: usize,
        #[source]
        source: PdfiumError,
    },
    #[error("failed to read input file: {0}")]
    Io(#[from] std::io::Error),
    #[error("no text extracted from `{file_name}`")]
    Empty { file_name: String },
}

/// Parses a downloaded file into ordered segments, inferring the format from
/// the original file name. The language hint is recorded for engines that
/// accept one; pdfium extracts text regardless of language.
#[derive(Debug, Clone)]
pub struct DocumentParser {
    language: String,
}

impl DocumentParser {
    #[must_use]
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn parse(&self, path: &Path, file_name: &str) -> Result<Vec<Segment>, ParseError> {
        debug_assert!(!file_name.is_empty());

        let extension = Path::new(file_name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        let segments = match extension.as_deref() {
            Some("pdf") => parse_pdf(path)?,
            Some("csv") => parse_csv(path)?,
            _ => parse_fallback_text(path)?,
        };

        let segments = segments
            .into_iter()
            .map(|segment| Segment {
                text: cleanup_segment_text(&segment.text),
                page_number: segment.page_number,
            })
            .filter(|segment| !segment.text.is_empty())
            .collect::<Vec<_>>();

        if segments.is_empty() {
            return Err(ParseError::Empty {
                file_name: file_name.to_string(),
            });
        }
        Ok(segments)
    }
}

fn parse_pdf(path: &Path) -> Result<Vec<Segment>, ParseError> {
    let bytes = std::fs::read(path)?;
    let pdfium = load_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(&bytes, None)
        .map_err(ParseError::Document)?;

    let mut segments = Vec::with_capacity(document.pages().len() as usize);
    for (page_index, page) in document.pages().iter().enumerate() {
        let text = page
            .text()
            .map_err(|source| ParseError::PageText { page_index, source })?
            .all();
        if text.trim().is_empty() {
            continue;
        }
        segments.push(Segment {
            text,
            page_number: Some(page_index as u32 + 1),
        });
    }
    Ok(segments)
}

/// CSV notices carry their content in the raw row text, so rows are grouped
/// into fixed-size segments without field-level decoding. The header line is
/// carried into the first group.
fn parse_csv(path: &Path) -> Result<Vec<Segment>, ParseError> {
    let raw = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&raw);

    let mut segments = Vec::new();
    let mut group: Vec<&str> = Vec::with_capacity(CSV_ROWS_PER_SEGMENT);
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        group.push(line);
        if group.len() >= CSV_ROWS_PER_SEGMENT {
            segments.push(Segment {
                text: group.join("\n"),
                page_number: None,
            });
            group.clear();
        }
    }
    if !group.is_empty() {
        segments.push(Segment {
            text: group.join("\n"),
            page_number: None,
        });
    }
    Ok(segments)
}

fn parse_fallback_text(path: &Path) -> Result<Vec<Segment>, ParseError> {
    let raw = std::fs::read(path)?;
    let text = String::from_utf8_lossy(&raw);
    let capped = text.chars().take(FALLBACK_MAX_CHARS).collect::<String>();
    Ok(vec![Segment {
        text: capped,
        page_number: None,
    }])
}

fn load_pdfium() -> Result<Pdfium, PdfiumError> {
    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
}
