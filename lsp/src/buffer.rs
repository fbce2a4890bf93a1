//! In-memory [`TextDocument`] for hosts without an editor component.

use std::cell::RefCell;

use crate::position::TextDocument;

#[derive(Debug, Default)]
struct Inner {
    text: String,
    /// Byte offset of the first character of every line.
    line_starts: Vec<usize>,
    /// One style byte per text byte.
    styles: Vec<u8>,
}

impl Inner {
    fn reindex(&mut self) {
        self.line_starts.clear();
        self.line_starts.push(0);
        self.line_starts.extend(
            self.text
                .bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| i + 1),
        );
        self.styles.resize(self.text.len(), 0);
    }

    /// Clamp `pos` into the text and back onto a char boundary.
    fn floor(&self, pos: usize) -> usize {
        let mut pos = pos.min(self.text.len());
        while !self.text.is_char_boundary(pos) {
            pos -= 1;
        }
        pos
    }
}

/// UTF-8 text with a line index and per-byte style storage.
///
/// Edits go through [`TextBuffer::insert`] and [`TextBuffer::delete`]; the
/// caller is responsible for reporting them to the session.
#[derive(Debug, Default)]
pub struct TextBuffer {
    inner: RefCell<Inner>,
}

impl TextBuffer {
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let mut inner = Inner {
            text: text.into(),
            ..Inner::default()
        };
        inner.reindex();
        Self {
            inner: RefCell::new(inner),
        }
    }

    #[must_use]
    pub fn text(&self) -> String {
        self.inner.borrow().text.clone()
    }

    pub fn insert(&self, pos: usize, text: &str) {
        let mut inner = self.inner.borrow_mut();
        let pos = inner.floor(pos);
        inner.text.insert_str(pos, text);
        inner
            .styles
            .splice(pos..pos, std::iter::repeat_n(0, text.len()));
        inner.reindex();
    }

    pub fn delete(&self, pos: usize, len: usize) {
        let mut inner = self.inner.borrow_mut();
        let start = inner.floor(pos);
        let end = inner.floor(pos + len);
        inner.text.replace_range(start..end, "");
        inner.styles.drain(start..end);
        inner.reindex();
    }

    /// Style byte at `pos`, 0 when unstyled or out of range.
    #[must_use]
    pub fn style_at(&self, pos: usize) -> u8 {
        self.inner.borrow().styles.get(pos).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.inner.borrow().line_starts.len()
    }
}

impl TextDocument for TextBuffer {
    fn length(&self) -> usize {
        self.inner.borrow().text.len()
    }

    fn line_start(&self, line: usize) -> usize {
        let inner = self.inner.borrow();
        inner
            .line_starts
            .get(line)
            .copied()
            .unwrap_or(inner.text.len())
    }

    fn line_end(&self, line: usize) -> usize {
        let inner = self.inner.borrow();
        let Some(next) = inner.line_starts.get(line + 1).copied() else {
            return inner.text.len();
        };
        // Step back over "\n" and an optional preceding "\r".
        let bytes = inner.text.as_bytes();
        let mut end = next - 1;
        if end > 0 && bytes[end - 1] == b'\r' {
            end -= 1;
        }
        end
    }

    fn line_from_position(&self, pos: usize) -> usize {
        let inner = self.inner.borrow();
        match inner.line_starts.binary_search(&pos) {
            Ok(line) => line,
            Err(next) => next.saturating_sub(1),
        }
    }

    fn count_utf16(&self, start: usize, end: usize) -> usize {
        let inner = self.inner.borrow();
        let start = inner.floor(start);
        let end = inner.floor(end).max(start);
        inner.text[start..end].encode_utf16().count()
    }

    fn relative_position_utf16(&self, start: usize, char_offset: usize) -> Option<usize> {
        let inner = self.inner.borrow();
        let start = inner.floor(start);
        let mut units = 0;
        for (i, ch) in inner.text[start..].char_indices() {
            if units >= char_offset {
                return Some(start + i);
            }
            units += ch.len_utf16();
        }
        (units >= char_offset).then_some(inner.text.len())
    }

    fn char_range(&self, pos: usize, len: usize) -> String {
        let inner = self.inner.borrow();
        let start = inner.floor(pos);
        let end = inner.floor(pos + len).max(start);
        inner.text[start..end].to_string()
    }

    fn set_style(&self, start: usize, len: usize, style: u8) {
        let mut inner = self.inner.borrow_mut();
        let end = (start + len).min(inner.styles.len());
        if start < end {
            inner.styles[start..end].fill(style);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index() {
        let buf = TextBuffer::new("ab\r\ncd\nef");
        assert_eq!(buf.line_count(), 3);
        assert_eq!(buf.line_start(1), 4);
        assert_eq!(buf.line_end(0), 2);
        assert_eq!(buf.line_end(1), 6);
        assert_eq!(buf.line_end(2), 9);
        assert_eq!(buf.line_from_position(5), 1);
        assert_eq!(buf.line_from_position(9), 2);
        assert_eq!(buf.line_start(10), 9);
    }

    #[test]
    fn test_insert_and_delete_keep_index() {
        let buf = TextBuffer::new("abc");
        buf.insert(1, "x\ny");
        assert_eq!(buf.text(), "ax\nybc");
        assert_eq!(buf.line_count(), 2);
        buf.delete(1, 3);
        assert_eq!(buf.text(), "abc");
        assert_eq!(buf.line_count(), 1);
    }

    #[test]
    fn test_styles_follow_edits() {
        let buf = TextBuffer::new("abcdef");
        buf.set_style(2, 2, 7);
        buf.insert(0, "zz");
        assert_eq!(buf.style_at(4), 7);
        assert_eq!(buf.style_at(5), 7);
        assert_eq!(buf.style_at(6), 0);
    }

    #[test]
    fn test_char_range() {
        let buf = TextBuffer::new("hello world");
        assert_eq!(buf.char_range(6, 5), "world");
        assert_eq!(buf.char_range(6, 50), "world");
    }
}
