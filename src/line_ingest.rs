/// Raw console log ingestion
///
/// Decodes the input as UTF-8 (a leading BOM is skipped) and splits it into
/// lines that keep their `\n` / `\r\n` terminators.
use crate::error::{AnalyzerError, Result};
use memchr::memchr_iter;
use std::fs;
use std::path::Path;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// One input line, 1-based, terminator included
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLine {
    pub line_no: usize,
    pub text: String,
}

impl RawLine {
    pub fn new(line_no: usize, text: impl Into<String>) -> Self {
        Self {
            line_no,
            text: text.into(),
        }
    }

    /// The line without its terminator
    pub fn content(&self) -> &str {
        self.text.trim_end_matches(['\n', '\r'])
    }
}

/// Decode raw bytes, failing with the byte position of the first bad sequence
pub fn decode(bytes: &[u8]) -> Result<&str> {
    let (body, offset) = match bytes.strip_prefix(UTF8_BOM) {
        Some(rest) => (rest, UTF8_BOM.len()),
        None => (bytes, 0),
    };
    std::str::from_utf8(body).map_err(|e| AnalyzerError::Decode {
        position: offset + e.valid_up_to(),
    })
}

/// Split text into lines, preserving terminators
pub fn split_lines(text: &str) -> Vec<RawLine> {
    let mut lines = Vec::new();
    let mut start = 0;

    for end in memchr_iter(b'\n', text.as_bytes()) {
        lines.push(RawLine::new(lines.len() + 1, &text[start..=end]));
        start = end + 1;
    }
    if start < text.len() {
        lines.push(RawLine::new(lines.len() + 1, &text[start..]));
    }

    lines
}

pub fn load(bytes: &[u8]) -> Result<Vec<RawLine>> {
    Ok(split_lines(decode(bytes)?))
}

pub fn load_file(path: &Path) -> Result<Vec<RawLine>> {
    let bytes = fs::read(path)
        .map_err(|e| AnalyzerError::io(e, format!("reading {}", path.display())))?;
    load(&bytes)
}
