//! Client configuration: what the client advertises at `initialize`, and the
//! file-level settings a host loads from TOML.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::session::DEFAULT_DISABLED_LINE_STYLE;

const fn default_disabled_style() -> u8 {
    DEFAULT_DISABLED_LINE_STYLE
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config at {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

/// Preferred format for documentation strings.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MarkupKind {
    #[default]
    PlainText,
    Markdown,
}

impl MarkupKind {
    /// Formats to advertise, most preferred first. Plain text is always
    /// accepted.
    fn advertised(self) -> serde_json::Value {
        match self {
            Self::PlainText => serde_json::json!(["plaintext"]),
            Self::Markdown => serde_json::json!(["markdown", "plaintext"]),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishDiagnosticsConfig {
    pub enabled: bool,
    pub related_information: bool,
    pub category_support: bool,
    pub code_actions_inline: bool,
}

impl Default for PublishDiagnosticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            related_information: true,
            category_support: false,
            code_actions_inline: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DocumentSymbolConfig {
    pub enabled: bool,
    pub hierarchical_support: bool,
}

impl Default for DocumentSymbolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hierarchical_support: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HoverConfig {
    pub enabled: bool,
    pub content_format: MarkupKind,
}

impl Default for HoverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            content_format: MarkupKind::PlainText,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub enabled: bool,
    pub snippet_support: bool,
    pub documentation_format: MarkupKind,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            snippet_support: false,
            documentation_format: MarkupKind::PlainText,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignatureHelpConfig {
    pub enabled: bool,
    pub documentation_format: MarkupKind,
    pub label_offset_support: bool,
}

impl Default for SignatureHelpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            documentation_format: MarkupKind::PlainText,
            label_offset_support: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub did_change_watched_files: bool,
    pub symbol: bool,
    pub execute_command: bool,
    pub configuration: bool,
    pub workspace_folders: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            did_change_watched_files: true,
            symbol: true,
            execute_command: false,
            configuration: false,
            workspace_folders: false,
        }
    }
}

/// Options that shape the `initialize` request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Workspace root as a `file://` URI.
    pub root_uri: Option<String>,
    pub semantic_highlighting: bool,
    pub publish_diagnostics: PublishDiagnosticsConfig,
    pub document_symbol: DocumentSymbolConfig,
    pub hover: HoverConfig,
    pub completion: CompletionConfig,
    pub signature_help: SignatureHelpConfig,
    pub workspace: WorkspaceConfig,
    /// Ask clangd for `textDocument/clangd.fileStatus` pushes.
    pub clangd_file_status: bool,
}

impl ClientConfig {
    /// `capabilities.textDocument`, one member per enabled feature area.
    pub(crate) fn text_document_capabilities(&self) -> serde_json::Value {
        let mut caps = serde_json::Map::new();
        caps.insert(
            "synchronization".into(),
            serde_json::json!({
                "dynamicRegistration": false,
                "willSave": false,
                "willSaveWaitUntil": false,
                "didSave": false
            }),
        );
        if self.semantic_highlighting {
            caps.insert(
                "semanticHighlightingCapabilities".into(),
                serde_json::json!({ "semanticHighlighting": true }),
            );
        }
        let diagnostics = &self.publish_diagnostics;
        if diagnostics.enabled {
            caps.insert(
                "publishDiagnostics".into(),
                serde_json::json!({
                    "relatedInformation": diagnostics.related_information,
                    "categorySupport": diagnostics.category_support,
                    "codeActionsInline": diagnostics.code_actions_inline
                }),
            );
        }
        if self.document_symbol.enabled {
            caps.insert(
                "documentSymbol".into(),
                serde_json::json!({
                    "hierarchicalDocumentSymbolSupport": self.document_symbol.hierarchical_support
                }),
            );
        }
        if self.hover.enabled {
            caps.insert(
                "hover".into(),
                serde_json::json!({ "contentFormat": self.hover.content_format.advertised() }),
            );
        }
        if self.completion.enabled {
            caps.insert(
                "completion".into(),
                serde_json::json!({
                    "completionItem": {
                        "snippetSupport": self.completion.snippet_support,
                        "documentationFormat": self.completion.documentation_format.advertised()
                    }
                }),
            );
        }
        let signature = &self.signature_help;
        if signature.enabled {
            caps.insert(
                "signatureHelp".into(),
                serde_json::json!({
                    "signatureInformation": {
                        "documentationFormat": signature.documentation_format.advertised(),
                        "parameterInformation": {
                            "labelOffsetSupport": signature.label_offset_support
                        }
                    }
                }),
            );
        }
        serde_json::Value::Object(caps)
    }

    /// `capabilities.workspace`.
    pub(crate) fn workspace_capabilities(&self) -> serde_json::Value {
        let ws = &self.workspace;
        let mut caps = serde_json::Map::new();
        if ws.did_change_watched_files {
            caps.insert(
                "didChangeWatchedFiles".into(),
                serde_json::json!({ "dynamicRegistration": false }),
            );
        }
        if ws.symbol {
            caps.insert(
                "symbol".into(),
                serde_json::json!({ "dynamicRegistration": false }),
            );
        }
        if ws.execute_command {
            caps.insert(
                "executeCommand".into(),
                serde_json::json!({ "dynamicRegistration": false }),
            );
        }
        if ws.configuration {
            caps.insert("configuration".into(), serde_json::Value::Bool(true));
        }
        if ws.workspace_folders {
            caps.insert("workspaceFolders".into(), serde_json::Value::Bool(true));
        }
        serde_json::Value::Object(caps)
    }
}

/// How to launch the language server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Executable name or path (e.g. "clangd"). Resolved through `PATH`.
    pub command: String,
    /// Argument string, split with shell quoting rules.
    #[serde(default)]
    pub args: String,
    /// Language identifier by file extension (e.g. `c = "c"`).
    #[serde(default)]
    pub languages: HashMap<String, String>,
}

impl ServerConfig {
    /// Language id for `path`, from its extension.
    #[must_use]
    pub fn language_for(&self, path: &Path) -> Option<&str> {
        let ext = path.extension()?.to_str()?;
        self.languages.get(ext).map(String::as_str)
    }
}

/// File-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LspConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
    /// Style applied to lines the server reports as inactive.
    #[serde(default = "default_disabled_style")]
    pub style_for_disabled_lines: u8,
}

impl LspConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("Failed to read config at {:?}: {}", path, err);
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: err,
                });
            }
        };

        match toml::from_str(&content) {
            Ok(config) => Ok(config),
            Err(err) => {
                tracing::warn!("Failed to parse config at {:?}: {}", path, err);
                Err(ConfigError::Parse {
                    path: path.to_path_buf(),
                    source: err,
                })
            }
        }
    }
}
