//! Server capabilities, read once from the `initialize` result.

use serde_json::Value;

/// How the server wants document changes delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextDocumentSyncKind {
    #[default]
    None,
    Full,
    Incremental,
}

impl TextDocumentSyncKind {
    fn from_lsp(value: u64) -> Self {
        match value {
            1 => Self::Full,
            2 => Self::Incremental,
            _ => Self::None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionOptions {
    pub resolve_provider: bool,
    pub trigger_characters: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureHelpOptions {
    pub trigger_characters: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OnTypeFormattingOptions {
    pub first_trigger_character: String,
    pub more_trigger_character: Vec<String>,
}

/// Feature flags advertised by the server. A provider given as an options
/// object counts as supported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerCapabilities {
    pub code_action_provider: bool,
    pub declaration_provider: bool,
    pub definition_provider: bool,
    pub document_formatting_provider: bool,
    pub document_highlight_provider: bool,
    pub document_range_formatting_provider: bool,
    pub document_symbol_provider: bool,
    pub hover_provider: bool,
    pub references_provider: bool,
    pub rename_provider: bool,
    pub selection_range_provider: bool,
    pub type_hierarchy_provider: bool,
    pub workspace_symbol_provider: bool,
    pub signature_help_provider: bool,
    pub semantic_highlighting: bool,
    /// Flattened TextMate scope lists, indexed by token scope.
    pub semantic_highlighting_scopes: Vec<Vec<String>>,
    pub text_document_sync: TextDocumentSyncKind,
    pub completion: Option<CompletionOptions>,
    pub signature_help: Option<SignatureHelpOptions>,
    pub on_type_formatting: Option<OnTypeFormattingOptions>,
}

fn provider(caps: &Value, key: &str) -> bool {
    match caps.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Object(_)) => true,
        _ => false,
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}

impl ServerCapabilities {
    /// Parse the `capabilities` member of an `initialize` result. Anything
    /// missing or of the wrong shape reads as unsupported.
    #[must_use]
    pub fn from_initialize_result(result: &Value) -> Self {
        let Some(caps) = result.get("capabilities") else {
            return Self::default();
        };

        let text_document_sync = match caps.get("textDocumentSync") {
            Some(Value::Number(n)) => {
                TextDocumentSyncKind::from_lsp(n.as_u64().unwrap_or_default())
            }
            Some(Value::Object(opts)) => opts
                .get("change")
                .and_then(Value::as_u64)
                .map(TextDocumentSyncKind::from_lsp)
                .unwrap_or_default(),
            _ => TextDocumentSyncKind::None,
        };

        let completion = caps
            .get("completionProvider")
            .filter(|v| v.is_object())
            .map(|opts| CompletionOptions {
                resolve_provider: opts
                    .get("resolveProvider")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                trigger_characters: strings(opts.get("triggerCharacters")),
            });

        let signature_help = caps
            .get("signatureHelpProvider")
            .filter(|v| v.is_object())
            .map(|opts| SignatureHelpOptions {
                trigger_characters: strings(opts.get("triggerCharacters")),
            });

        let on_type_formatting = caps
            .get("documentOnTypeFormattingProvider")
            .filter(|v| v.is_object())
            .map(|opts| OnTypeFormattingOptions {
                first_trigger_character: opts
                    .get("firstTriggerCharacter")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                more_trigger_character: strings(opts.get("moreTriggerCharacter")),
            });

        let highlighting = caps.get("semanticHighlighting");
        let semantic_highlighting_scopes: Vec<Vec<String>> = highlighting
            .and_then(|h| h.get("scopes"))
            .and_then(Value::as_array)
            .map(|scopes| scopes.iter().map(|s| strings(Some(s))).collect())
            .unwrap_or_default();

        Self {
            code_action_provider: provider(caps, "codeActionProvider"),
            declaration_provider: provider(caps, "declarationProvider"),
            definition_provider: provider(caps, "definitionProvider"),
            document_formatting_provider: provider(caps, "documentFormattingProvider"),
            document_highlight_provider: provider(caps, "documentHighlightProvider"),
            document_range_formatting_provider: provider(caps, "documentRangeFormattingProvider"),
            document_symbol_provider: provider(caps, "documentSymbolProvider"),
            hover_provider: provider(caps, "hoverProvider"),
            references_provider: provider(caps, "referencesProvider"),
            rename_provider: provider(caps, "renameProvider"),
            selection_range_provider: provider(caps, "selectionRangeProvider"),
            type_hierarchy_provider: provider(caps, "typeHierarchyProvider"),
            workspace_symbol_provider: provider(caps, "workspaceSymbolProvider"),
            signature_help_provider: signature_help.is_some()
                || provider(caps, "signatureHelpProvider"),
            semantic_highlighting: highlighting.is_some_and(Value::is_object),
            semantic_highlighting_scopes,
            text_document_sync,
            completion,
            signature_help,
            on_type_formatting,
        }
    }

    /// Whether typing `ch` should open completion.
    #[must_use]
    pub fn character_triggers_completion(&self, ch: char) -> bool {
        self.completion
            .as_ref()
            .is_some_and(|c| triggers(&c.trigger_characters, ch))
    }

    /// Whether typing `ch` should open signature help.
    #[must_use]
    pub fn character_triggers_signature_help(&self, ch: char) -> bool {
        self.signature_help
            .as_ref()
            .is_some_and(|s| triggers(&s.trigger_characters, ch))
    }
}

fn triggers(characters: &[String], ch: char) -> bool {
    let mut buf = [0u8; 4];
    let ch = ch.encode_utf8(&mut buf);
    characters.iter().any(|c| c == ch)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clangd_like() -> Value {
        serde_json::json!({
            "capabilities": {
                "textDocumentSync": 2,
                "hoverProvider": true,
                "definitionProvider": true,
                "referencesProvider": false,
                "codeActionProvider": { "codeActionKinds": ["quickfix"] },
                "documentSymbolProvider": true,
                "renameProvider": { "prepareProvider": true },
                "completionProvider": {
                    "resolveProvider": false,
                    "triggerCharacters": [".", ">", ":"]
                },
                "signatureHelpProvider": { "triggerCharacters": ["(", ","] },
                "documentOnTypeFormattingProvider": {
                    "firstTriggerCharacter": "\n",
                    "moreTriggerCharacter": []
                },
                "semanticHighlighting": {
                    "scopes": [["variable.other.cpp"], ["entity.name.function.cpp", "meta"]]
                }
            },
            "serverInfo": { "name": "clangd" }
        })
    }

    #[test]
    fn test_provider_flags() {
        let caps = ServerCapabilities::from_initialize_result(&clangd_like());
        assert!(caps.hover_provider);
        assert!(caps.definition_provider);
        assert!(!caps.references_provider);
        assert!(caps.code_action_provider, "options object counts as true");
        assert!(caps.rename_provider);
        assert!(!caps.type_hierarchy_provider);
        assert!(caps.signature_help_provider);
        assert_eq!(caps.text_document_sync, TextDocumentSyncKind::Incremental);
    }

    #[test]
    fn test_option_records() {
        let caps = ServerCapabilities::from_initialize_result(&clangd_like());
        let completion = caps.completion.as_ref().unwrap();
        assert!(!completion.resolve_provider);
        assert_eq!(completion.trigger_characters, vec![".", ">", ":"]);
        let formatting = caps.on_type_formatting.as_ref().unwrap();
        assert_eq!(formatting.first_trigger_character, "\n");
        assert!(formatting.more_trigger_character.is_empty());
    }

    #[test]
    fn test_semantic_highlighting_scopes() {
        let caps = ServerCapabilities::from_initialize_result(&clangd_like());
        assert!(caps.semantic_highlighting);
        assert_eq!(caps.semantic_highlighting_scopes.len(), 2);
        assert_eq!(caps.semantic_highlighting_scopes[1][0], "entity.name.function.cpp");
    }

    #[test]
    fn test_trigger_characters() {
        let caps = ServerCapabilities::from_initialize_result(&clangd_like());
        assert!(caps.character_triggers_completion('.'));
        assert!(!caps.character_triggers_completion('('));
        assert!(caps.character_triggers_signature_help('('));
        assert!(caps.character_triggers_signature_help(','));
        assert!(!caps.character_triggers_signature_help('.'));
    }

    #[test]
    fn test_sync_options_object() {
        let caps = ServerCapabilities::from_initialize_result(&serde_json::json!({
            "capabilities": { "textDocumentSync": { "openClose": true, "change": 1 } }
        }));
        assert_eq!(caps.text_document_sync, TextDocumentSyncKind::Full);
    }

    #[test]
    fn test_missing_capabilities_read_as_unsupported() {
        let caps = ServerCapabilities::from_initialize_result(&serde_json::json!({}));
        assert_eq!(caps, ServerCapabilities::default());
        assert!(!caps.character_triggers_completion('.'));

        let caps = ServerCapabilities::from_initialize_result(&Value::Null);
        assert!(!caps.hover_provider);
    }
}
