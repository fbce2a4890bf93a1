//! Conversion between host byte offsets and protocol line/UTF-16 positions.
//!
//! The host editor owns the text. Everything here reads it through the
//! [`TextDocument`] capability and never caches anything.

use serde::{Deserialize, Serialize};

/// Host-side document accessor.
///
/// Offsets are byte positions in the host buffer. Lines are 0-based.
/// Styling requests use `&self` because documents are shared between the
/// engine and the views that display them.
pub trait TextDocument {
    /// Length of the document in bytes.
    fn length(&self) -> usize;

    /// Offset of the first byte of `line`. Lines past the end map to `length()`.
    fn line_start(&self, line: usize) -> usize;

    /// Offset just before the line terminator of `line`.
    fn line_end(&self, line: usize) -> usize;

    fn line_from_position(&self, pos: usize) -> usize;

    /// Number of UTF-16 code units between two offsets.
    fn count_utf16(&self, start: usize, end: usize) -> usize;

    /// Offset reached by advancing `char_offset` UTF-16 code units from `start`.
    ///
    /// `None` when that runs past the end of the document.
    fn relative_position_utf16(&self, start: usize, char_offset: usize) -> Option<usize>;

    /// Copy `len` bytes starting at `pos`.
    fn char_range(&self, pos: usize, len: usize) -> String;

    /// Apply `style` to `len` bytes starting at `start`.
    fn set_style(&self, start: usize, len: usize, style: u8) {
        let _ = (start, len, style);
    }
}

/// Zero-based line and UTF-16 character position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Protocol position of byte offset `pos`.
#[must_use]
pub fn to_lsp(doc: &dyn TextDocument, pos: usize) -> Position {
    let line = doc.line_from_position(pos);
    let line_start = doc.line_start(line);
    Position::new(line as u32, doc.count_utf16(line_start, pos) as u32)
}

/// Protocol range covering `len` bytes from `pos`.
///
/// A zero `len` yields an empty range, which is how insertions are sent.
#[must_use]
pub fn range(doc: &dyn TextDocument, pos: usize, len: usize) -> Range {
    Range::new(to_lsp(doc, pos), to_lsp(doc, pos + len))
}

/// Host byte offset of a protocol position.
#[must_use]
pub fn from_lsp(doc: &dyn TextDocument, pos: Position) -> Option<usize> {
    let line_start = doc.line_start(pos.line as usize);
    doc.relative_position_utf16(line_start, pos.character as usize)
}

/// Host byte offsets `(start, end)` of a protocol range.
#[must_use]
pub fn from_lsp_range(doc: &dyn TextDocument, range: Range) -> Option<(usize, usize)> {
    Some((from_lsp(doc, range.start)?, from_lsp(doc, range.end)?))
}
