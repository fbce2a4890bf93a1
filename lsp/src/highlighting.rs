//! Semantic highlighting: token decoding, the per-document line cache merge,
//! and application of cached styles to the host document.
//!
//! Servers push `textDocument/semanticHighlighting` notifications carrying
//! only the lines that changed. The per-document cache is an ordered list of
//! [`LineTokens`] that each push is merged into.

use base64::Engine;
use serde::Deserialize;

use crate::position::TextDocument;

/// First host style index used for semantic scopes. Scope `n` maps to
/// style `FIRST_LSP_STYLE + n`.
pub const FIRST_LSP_STYLE: u8 = 100;

/// Size of one encoded token record: u32 character, u16 length, u16 scope.
const TOKEN_RECORD_BYTES: usize = 8;

/// One highlighted run inside a line. Offsets are UTF-16 units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemanticToken {
    pub character: u32,
    pub length: u16,
    pub scope: u16,
}

/// Highlighting state of one line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LineTokens {
    pub line: u32,
    pub inactive: bool,
    pub tokens: Vec<SemanticToken>,
}

impl LineTokens {
    #[must_use]
    pub fn new(line: u32, inactive: bool, tokens: Vec<SemanticToken>) -> Self {
        Self {
            line,
            inactive,
            tokens,
        }
    }

    /// A line carries information if it is inactive or has tokens.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.inactive || !self.tokens.is_empty()
    }
}

/// Decode a base64 token blob of big-endian 8-byte records.
///
/// Malformed input (bad base64, length not a multiple of 8) decodes to an
/// empty list.
#[must_use]
pub fn decode_tokens(blob: &str) -> Vec<SemanticToken> {
    if blob.is_empty() {
        return Vec::new();
    }
    let bytes = match base64::engine::general_purpose::STANDARD.decode(blob) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!("Discarding semantic token blob: {e}");
            return Vec::new();
        }
    };
    if bytes.len() % TOKEN_RECORD_BYTES != 0 {
        tracing::debug!(
            len = bytes.len(),
            "Discarding semantic token blob with partial record"
        );
        return Vec::new();
    }
    bytes
        .chunks_exact(TOKEN_RECORD_BYTES)
        .map(|record| SemanticToken {
            character: u32::from_be_bytes([record[0], record[1], record[2], record[3]]),
            length: u16::from_be_bytes([record[4], record[5]]),
            scope: u16::from_be_bytes([record[6], record[7]]),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct RawLine {
    line: Option<u32>,
    #[serde(default)]
    tokens: String,
    #[serde(default, rename = "isInactive")]
    is_inactive: serde_json::Value,
}

/// `isInactive` has been seen as a bool, a number and a string in the wild.
fn lenient_bool(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        serde_json::Value::String(s) => s == "true",
        _ => false,
    }
}

#[derive(Debug, Deserialize)]
struct RawIdentifier {
    uri: String,
    version: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct RawParams {
    #[serde(rename = "textDocument")]
    text_document: RawIdentifier,
    lines: Vec<RawLine>,
}

/// Decoded `textDocument/semanticHighlighting` params.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SemanticHighlightingParams {
    pub uri: String,
    pub version: Option<i32>,
    pub lines: Vec<LineTokens>,
}

impl SemanticHighlightingParams {
    /// Parse notification params. Lines without a line number are dropped.
    pub fn from_value(params: serde_json::Value) -> Result<Self, serde_json::Error> {
        let raw: RawParams = serde_json::from_value(params)?;
        let lines = raw
            .lines
            .into_iter()
            .filter_map(|l| {
                Some(LineTokens::new(
                    l.line?,
                    lenient_bool(&l.is_inactive),
                    decode_tokens(&l.tokens),
                ))
            })
            .collect();
        Ok(Self {
            uri: raw.text_document.uri,
            version: raw.text_document.version,
            lines,
        })
    }
}

/// Merge a server update into the cached lines.
///
/// Both lists are ordered by line. `incoming` is drained. An empty update
/// leaves the cache alone; it never means "clear".
pub fn merge(existing: &mut Vec<LineTokens>, incoming: &mut Vec<LineTokens>) {
    if existing.is_empty() {
        *existing = std::mem::take(incoming);
        return;
    }
    if incoming.is_empty() {
        return;
    }

    let current = std::mem::take(existing);
    let mut merged = Vec::with_capacity(current.len() + incoming.len());
    let mut updates = std::mem::take(incoming).into_iter().peekable();

    for cached in current {
        while let Some(before) = updates.next_if(|u| u.line < cached.line) {
            if before.is_valid() {
                merged.push(before);
            }
        }
        match updates.next_if(|u| u.line == cached.line) {
            Some(replacement) => merged.push(replacement),
            None => merged.push(cached),
        }
    }
    merged.extend(updates);

    // Replacements and appended lines may be empty: that is how the server
    // clears a line.
    merged.retain(LineTokens::is_valid);
    *existing = merged;
}

/// Inclusive span of lines awaiting a highlight pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSpan {
    pub first: u32,
    pub last: u32,
}

impl LineSpan {
    #[must_use]
    pub fn new(first: u32, last: u32) -> Self {
        Self {
            first: first.min(last),
            last: first.max(last),
        }
    }

    /// Smallest span covering both.
    #[must_use]
    pub fn union(self, other: Self) -> Self {
        Self {
            first: self.first.min(other.first),
            last: self.last.max(other.last),
        }
    }

    #[must_use]
    pub fn contains(&self, line: u32) -> bool {
        (self.first..=self.last).contains(&line)
    }
}

/// Style cached lines inside `span` on the host document.
///
/// Inactive lines take `disabled_style`. Tokens that would run past their
/// line end are skipped.
pub fn apply(doc: &dyn TextDocument, lines: &[LineTokens], span: LineSpan, disabled_style: u8) {
    for entry in lines {
        if entry.line > span.last {
            break;
        }
        if !span.contains(entry.line) {
            continue;
        }
        let line = entry.line as usize;
        let line_start = doc.line_start(line);
        let line_end = doc.line_end(line);
        if line_end <= line_start {
            continue;
        }
        if entry.inactive {
            doc.set_style(line_start, line_end - line_start, disabled_style);
        }
        for token in &entry.tokens {
            let Some(style) = scope_style(token.scope) else {
                continue;
            };
            let start = doc.relative_position_utf16(line_start, token.character as usize);
            let end = doc.relative_position_utf16(
                line_start,
                token.character as usize + token.length as usize,
            );
            match (start, end) {
                (Some(start), Some(end)) if end <= line_end && start < end => {
                    doc.set_style(start, end - start, style);
                }
                _ => {}
            }
        }
    }
}

fn scope_style(scope: u16) -> Option<u8> {
    u16::from(FIRST_LSP_STYLE)
        .checked_add(scope)
        .and_then(|style| u8::try_from(style).ok())
}
