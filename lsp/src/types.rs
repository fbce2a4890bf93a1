//! Public types consumed by the host.
//!
//! These define the interface between `quill-lsp` and whatever owns the
//! editor views: request ids handed back by the session, the typed payloads
//! delivered to subscribers, and the lifecycle states of a server.

use std::fmt;
use std::num::NonZeroU64;

use serde::{Deserialize, Deserializer};

use crate::position::Range;

/// Identifier of a request in flight. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(NonZeroU64);

impl RequestId {
    /// `None` for the reserved value 0.
    #[must_use]
    pub fn new(id: u64) -> Option<Self> {
        NonZeroU64::new(id).map(Self)
    }

    #[must_use]
    pub fn value(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of the server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotStarted,
    /// Process spawned, not yet confirmed running.
    Starting,
    Running,
    /// `initialize` sent, waiting for the answer.
    Initializing,
    Ready,
    Stopped,
}

impl ServerState {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::NotStarted => "not started",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the transport can carry messages.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Running | Self::Initializing | Self::Ready)
    }
}

/// JSON-RPC `error` member of a response.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Deserialize)]
#[error("server error {code}: {message}")]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the LSP-defined range.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

fn severity_from_lsp<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<DiagnosticSeverity>, D::Error> {
    Ok(Option::<u64>::deserialize(d)?.and_then(DiagnosticSeverity::from_lsp))
}

/// Diagnostic codes may be integers or strings.
fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match serde_json::Value::deserialize(d)? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Documentation fields are a plain string or a `MarkupContent`.
fn markup_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(MarkupContent::from_value(serde_json::Value::deserialize(d)?).map(|m| m.value))
}

fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Location {
    pub uri: String,
    pub range: Range,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelatedInformation {
    pub location: Location,
    pub message: String,
}

/// A single diagnostic from `textDocument/publishDiagnostics`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub range: Range,
    #[serde(default, deserialize_with = "severity_from_lsp")]
    pub severity: Option<DiagnosticSeverity>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub code: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    pub message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub related_information: Vec<RelatedInformation>,
}

/// `textDocument/publishDiagnostics` params.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<Diagnostic>,
}

/// `textDocument/clangd.fileStatus` params.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileStatus {
    pub uri: String,
    pub state: String,
}

/// Flat symbol entry, as delivered for `textDocument/documentSymbol`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInformation {
    pub name: String,
    pub kind: u32,
    pub container_name: Option<String>,
    pub location: Location,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSymbol {
    name: String,
    kind: u32,
    #[serde(default)]
    container_name: Option<String>,
    #[serde(default)]
    location: Option<Location>,
    /// Present on hierarchical `DocumentSymbol` entries.
    #[serde(default)]
    range: Option<Range>,
    #[serde(default, deserialize_with = "null_as_default")]
    children: Vec<RawSymbol>,
}

impl SymbolInformation {
    /// Parse a document symbol result.
    ///
    /// Accepts both the flat `SymbolInformation[]` form and the hierarchical
    /// `DocumentSymbol[]` form; the latter is flattened depth-first with each
    /// child's container set to its parent's name.
    pub fn list_from_result(uri: &str, result: serde_json::Value) -> Vec<Self> {
        let raw: Vec<RawSymbol> = match serde_json::from_value(result) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!("Malformed documentSymbol result: {e}");
                return Vec::new();
            }
        };
        let mut out = Vec::new();
        for symbol in raw {
            Self::flatten(uri, symbol, None, &mut out);
        }
        out
    }

    fn flatten(uri: &str, raw: RawSymbol, parent: Option<&str>, out: &mut Vec<Self>) {
        let location = match (raw.location, raw.range) {
            (Some(location), _) => location,
            (None, Some(range)) => Location {
                uri: uri.to_string(),
                range,
            },
            (None, None) => return,
        };
        let name = raw.name;
        for child in raw.children {
            Self::flatten(uri, child, Some(&name), out);
        }
        out.push(Self {
            name,
            kind: raw.kind,
            container_name: raw.container_name.or_else(|| parent.map(String::from)),
            location,
        });
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarkupContent {
    /// `"plaintext"` or `"markdown"`.
    pub kind: String,
    pub value: String,
}

impl MarkupContent {
    /// Accepts `MarkupContent`, a bare string, a `MarkedString` object
    /// (`{language, value}`) or an array of those.
    fn from_value(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Self {
                kind: "plaintext".into(),
                value: s,
            }),
            serde_json::Value::Object(map) => {
                let text = map.get("value")?.as_str()?.to_string();
                if let Some(kind) = map.get("kind").and_then(|k| k.as_str()) {
                    return Some(Self {
                        kind: kind.to_string(),
                        value: text,
                    });
                }
                let language = map.get("language").and_then(|l| l.as_str()).unwrap_or("");
                Some(Self {
                    kind: "markdown".into(),
                    value: format!("```{language}\n{text}\n```"),
                })
            }
            serde_json::Value::Array(items) => {
                let parts: Vec<Self> = items.into_iter().filter_map(Self::from_value).collect();
                if parts.is_empty() {
                    return None;
                }
                let kind = if parts.iter().all(|p| p.kind == "plaintext") {
                    "plaintext"
                } else {
                    "markdown"
                };
                Some(Self {
                    kind: kind.into(),
                    value: parts
                        .into_iter()
                        .map(|p| p.value)
                        .collect::<Vec<_>>()
                        .join("\n\n"),
                })
            }
            _ => None,
        }
    }
}

/// Result of `textDocument/hover`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hover {
    pub contents: MarkupContent,
    pub range: Option<Range>,
}

impl Hover {
    /// `None` for a null result or one without usable contents.
    #[must_use]
    pub fn from_result(result: serde_json::Value) -> Option<Self> {
        let serde_json::Value::Object(mut map) = result else {
            return None;
        };
        let contents = MarkupContent::from_value(map.remove("contents")?)?;
        let range = map
            .remove("range")
            .and_then(|r| serde_json::from_value(r).ok());
        Some(Self { contents, range })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub label: String,
    #[serde(default)]
    pub kind: Option<u32>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default, deserialize_with = "markup_text")]
    pub documentation: Option<String>,
    #[serde(default)]
    pub sort_text: Option<String>,
    #[serde(default)]
    pub filter_text: Option<String>,
    #[serde(default)]
    pub insert_text: Option<String>,
    /// Insert/replace edits are not decoded; only plain `TextEdit`s.
    #[serde(default, deserialize_with = "lenient")]
    pub text_edit: Option<TextEdit>,
}

fn lenient<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    Ok(serde_json::from_value(serde_json::Value::deserialize(d)?).ok())
}

impl CompletionItem {
    /// Text to insert when the item is accepted.
    #[must_use]
    pub fn insertion(&self) -> &str {
        self.text_edit
            .as_ref()
            .map(|e| e.new_text.as_str())
            .or(self.insert_text.as_deref())
            .unwrap_or(&self.label)
    }
}

/// Result of `textDocument/completion`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CompletionList {
    /// Absent means the list is complete.
    pub is_incomplete: bool,
    pub items: Vec<CompletionItem>,
}

impl CompletionList {
    /// Accepts `CompletionList`, a bare `CompletionItem[]`, or null.
    /// Items that fail to parse are skipped.
    #[must_use]
    pub fn from_result(result: serde_json::Value) -> Self {
        let (is_incomplete, items) = match result {
            serde_json::Value::Array(items) => (false, items),
            serde_json::Value::Object(mut map) => {
                let incomplete = map
                    .get("isIncomplete")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false);
                let items = match map.remove("items") {
                    Some(serde_json::Value::Array(items)) => items,
                    _ => Vec::new(),
                };
                (incomplete, items)
            }
            _ => (false, Vec::new()),
        };
        Self {
            is_incomplete,
            items: items
                .into_iter()
                .filter_map(|i| serde_json::from_value(i).ok())
                .collect(),
        }
    }
}

/// Parameter label: a substring of the signature label, or UTF-16 offsets
/// into it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ParameterLabel {
    Text(String),
    Offsets([u32; 2]),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParameterInformation {
    pub label: ParameterLabel,
    #[serde(default, deserialize_with = "markup_text")]
    pub documentation: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignatureInformation {
    pub label: String,
    #[serde(default, deserialize_with = "markup_text")]
    pub documentation: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parameters: Vec<ParameterInformation>,
}

/// Result of `textDocument/signatureHelp`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureHelp {
    pub signatures: Vec<SignatureInformation>,
    #[serde(default)]
    pub active_signature: u32,
    #[serde(default)]
    pub active_parameter: u32,
}

impl SignatureHelp {
    #[must_use]
    pub fn from_result(result: serde_json::Value) -> Option<Self> {
        if result.is_null() {
            return None;
        }
        match serde_json::from_value(result) {
            Ok(help) => Some(help),
            Err(e) => {
                tracing::debug!("Malformed signatureHelp result: {e}");
                None
            }
        }
    }
}

/// Event delivered to a subscriber.
///
/// Push variants go to every subscriber registered for the document;
/// response variants go only to the subscriber that issued the request.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Diagnostics {
        uri: String,
        diagnostics: Vec<Diagnostic>,
    },
    FileStatus(FileStatus),
    DocumentSymbols {
        id: RequestId,
        symbols: Vec<SymbolInformation>,
    },
    Hover {
        id: RequestId,
        hover: Option<Hover>,
    },
    Completion {
        id: RequestId,
        list: CompletionList,
    },
    SignatureHelp {
        id: RequestId,
        help: Option<SignatureHelp>,
    },
    RequestFailed {
        id: RequestId,
        error: ResponseError,
    },
    /// The session is being torn down; drop any reference to it.
    ClientGone,
}
