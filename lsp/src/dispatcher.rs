//! Request dispatcher: id allocation, the in-flight table, and routing of
//! inbound frames.

use std::collections::HashMap;

use serde_json::Value;

use crate::protocol::{self, ErrorResponse};
use crate::registry::DocumentHandle;
use crate::transport::{Transport, TransportEvent};
use crate::types::{RequestId, ResponseError};

/// JSON-RPC "internal error", used when a server's `error` member does not
/// parse.
const INTERNAL_ERROR: i64 = -32603;

/// What a pending request was for. Decides how its response is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestKind {
    Initialize,
    DocumentSymbols,
    Hover,
    Completion,
    SignatureHelp,
    Shutdown,
}

#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub id: RequestId,
    pub kind: RequestKind,
    pub document: Option<DocumentHandle>,
    pub raw_request: Vec<u8>,
}

/// Server notifications the session acts on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NotificationKind {
    PublishDiagnostics,
    SemanticHighlighting,
    FileStatus,
    LogMessage,
    ShowMessage,
}

impl NotificationKind {
    fn from_method(method: &str) -> Option<Self> {
        match method {
            "textDocument/publishDiagnostics" => Some(Self::PublishDiagnostics),
            "textDocument/semanticHighlighting" => Some(Self::SemanticHighlighting),
            "textDocument/clangd.fileStatus" => Some(Self::FileStatus),
            "window/logMessage" => Some(Self::LogMessage),
            "window/showMessage" => Some(Self::ShowMessage),
            _ => None,
        }
    }
}

/// A frame the session has to act on.
#[derive(Debug)]
pub(crate) enum Inbound {
    Response {
        request: PendingRequest,
        outcome: Result<Value, ResponseError>,
    },
    Notification {
        kind: NotificationKind,
        params: Value,
    },
}

/// The transport plus a deferred-delete flag.
///
/// Exit is observed while handling one of the transport's own events, so
/// the transport is not dropped there; it is marked and reaped at the next
/// safe point (a new start, or teardown).
#[derive(Default)]
struct TransportSlot {
    current: Option<Transport>,
    pending_delete: bool,
}

impl TransportSlot {
    fn reap(&mut self) {
        if self.pending_delete {
            self.pending_delete = false;
            if self.current.take().is_some() {
                tracing::debug!("Released exited LSP transport");
            }
        }
    }

    fn live(&self) -> Option<&Transport> {
        if self.pending_delete {
            return None;
        }
        self.current.as_ref()
    }
}

impl Drop for TransportSlot {
    fn drop(&mut self) {
        self.reap();
    }
}

#[derive(Default)]
pub(crate) struct Dispatcher {
    slot: TransportSlot,
    pending: HashMap<RequestId, PendingRequest>,
    last_id: u64,
}

impl Dispatcher {
    /// Replace the transport. Any previous one is dropped, killing its
    /// process, and its in-flight requests are abandoned.
    pub fn install(&mut self, transport: Transport) {
        self.slot.reap();
        if self.slot.current.take().is_some() {
            self.on_process_exited();
        }
        self.slot.current = Some(transport);
    }

    /// Deferred-delete checkpoint.
    pub fn reap(&mut self) {
        self.slot.reap();
    }

    pub fn mark_for_delete(&mut self) {
        self.slot.pending_delete = true;
    }

    pub fn has_transport(&self) -> bool {
        self.slot.live().is_some()
    }

    /// Next request id. Never 0, also across wrap-around.
    pub fn next_id(&mut self) -> RequestId {
        loop {
            self.last_id = self.last_id.wrapping_add(1);
            if let Some(id) = RequestId::new(self.last_id) {
                return id;
            }
        }
    }

    /// Record and send a request whose `payload` already carries `id`.
    pub fn send_request(
        &mut self,
        id: RequestId,
        kind: RequestKind,
        document: Option<DocumentHandle>,
        payload: Vec<u8>,
    ) -> bool {
        let Some(transport) = self.slot.live() else {
            tracing::debug!(%id, ?kind, "Request not sent: server not running");
            return false;
        };
        if !transport.send(payload.clone()) {
            tracing::debug!(%id, ?kind, "Request not sent: transport closed");
            return false;
        }
        self.pending.insert(
            id,
            PendingRequest {
                id,
                kind,
                document,
                raw_request: payload,
            },
        );
        true
    }

    pub fn send_notification(&mut self, payload: Vec<u8>) -> bool {
        match self.slot.live() {
            Some(transport) => transport.send(payload),
            None => false,
        }
    }

    pub fn try_next_event(&mut self) -> Option<TransportEvent> {
        self.slot.current.as_mut()?.try_next_event()
    }

    pub async fn next_event(&mut self) -> Option<TransportEvent> {
        self.slot.current.as_mut()?.next_event().await
    }

    /// Classify one inbound frame.
    ///
    /// Responses are matched strictly by id; a frame that names a `method`
    /// is never taken as a response. Server requests are answered here with
    /// "method not found". Everything else is logged and dropped.
    pub fn on_frame(&mut self, bytes: &[u8]) -> Option<Inbound> {
        let mut frame: Value = match serde_json::from_slice(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping unparseable LSP frame: {e}");
                return None;
            }
        };

        let method = frame
            .get("method")
            .and_then(Value::as_str)
            .map(String::from);

        let Some(method) = method else {
            return self.on_response(frame);
        };

        if let Some(id) = frame.get("id").cloned() {
            self.reply_method_not_found(id, &method);
            return None;
        }

        let Some(params) = frame.get_mut("params").map(Value::take) else {
            tracing::trace!(%method, "Unhandled LSP notification without params");
            return None;
        };
        match NotificationKind::from_method(&method) {
            Some(kind) => Some(Inbound::Notification { kind, params }),
            None => {
                tracing::trace!(%method, "Unhandled LSP notification");
                None
            }
        }
    }

    fn on_response(&mut self, mut frame: Value) -> Option<Inbound> {
        let Some(id) = frame.get("id").and_then(Value::as_u64).and_then(RequestId::new) else {
            tracing::trace!("Unhandled LSP frame: no method and no usable id");
            return None;
        };
        let Some(request) = self.pending.remove(&id) else {
            tracing::trace!(%id, "Ignoring response for unknown request");
            return None;
        };

        let outcome = match frame.get_mut("error").map(Value::take) {
            Some(error) => Err(serde_json::from_value(error).unwrap_or_else(|e| {
                tracing::warn!(%id, "Malformed error in LSP response: {e}");
                ResponseError {
                    code: INTERNAL_ERROR,
                    message: String::from("malformed error response"),
                    data: None,
                }
            })),
            None => Ok(frame
                .get_mut("result")
                .map(Value::take)
                .unwrap_or(Value::Null)),
        };
        Some(Inbound::Response { request, outcome })
    }

    fn reply_method_not_found(&mut self, id: Value, method: &str) {
        // Servers may block until their requests are answered.
        tracing::debug!(%method, "LSP server sent request; replying method not found");
        match protocol::to_body(&ErrorResponse::method_not_found(id, method)) {
            Ok(body) => {
                self.send_notification(body);
            }
            Err(e) => tracing::warn!("{e:#}"),
        }
    }

    /// Abandon every in-flight request. No one is told.
    pub fn on_process_exited(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!(count = self.pending.len(), "Abandoning in-flight LSP requests");
        }
        self.pending.clear();
    }

    #[cfg(test)]
    pub fn is_pending(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn set_last_id(&mut self, id: u64) {
        self.last_id = id;
    }
}
