//! Outgoing JSON-RPC message shapes and parameter builders.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::config::ClientConfig;
use crate::position::{Position, Range};
use crate::types::RequestId;

/// JSON-RPC "method not found".
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(id: RequestId, method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.value(),
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Error reply to a server-initiated request. `id` is echoed verbatim,
/// since servers may use string ids.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorObject {
    pub code: i64,
    pub message: String,
}

impl ErrorResponse {
    pub fn method_not_found(id: serde_json::Value, method: &str) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            error: ErrorObject {
                code: METHOD_NOT_FOUND,
                message: format!("Method not found: {method}"),
            },
        }
    }
}

/// Serialize a message body for the wire.
pub(crate) fn to_body<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(message).context("serializing message")
}

pub(crate) fn initialize_params(config: &ClientConfig) -> serde_json::Value {
    let root_path = config
        .root_uri
        .as_deref()
        .and_then(file_uri_to_path)
        .map(|p| p.to_string_lossy().into_owned());

    let mut params = serde_json::json!({
        "processId": std::process::id(),
        "rootPath": root_path,
        "rootUri": config.root_uri,
        "capabilities": {
            "textDocument": config.text_document_capabilities(),
            "workspace": config.workspace_capabilities(),
        },
    });
    if config.clangd_file_status {
        params["initializationOptions"] = serde_json::json!({ "clangdFileStatus": true });
    }
    params
}

pub(crate) fn did_open_params(
    uri: &str,
    language_id: &str,
    version: i32,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

/// One incremental change entry: `range` is replaced by `text`.
pub(crate) fn did_change_params(
    uri: &str,
    version: i32,
    range: Range,
    text: &str,
) -> serde_json::Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": [{
            "range": range,
            "text": text
        }]
    })
}

pub(crate) fn text_document_params(uri: &str) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri }
    })
}

pub(crate) fn text_document_position_params(uri: &str, position: Position) -> serde_json::Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": position
    })
}

/// `file://` URI for a filesystem path.
pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
