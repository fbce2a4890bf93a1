//! Session — public API consumed by the host.
//!
//! One `Session` drives one server connection. It owns the document
//! registry, the server capabilities and the subscriber tables, and turns
//! host calls into protocol traffic through the dispatcher. All state lives
//! on the host's thread: the host drains transport events with
//! [`Session::poll_events`] (non-blocking) or [`Session::pump`] (awaits one
//! event), and results come back to subscribers as [`ClientEvent`]s.

use serde::Deserialize;
use serde_json::Value;

use crate::capabilities::ServerCapabilities;
use crate::config::ClientConfig;
use crate::dispatcher::{Dispatcher, Inbound, NotificationKind, PendingRequest, RequestKind};
use crate::highlighting::{self, LineSpan, SemanticHighlightingParams};
use crate::notifier::{Notifier, Subscriber};
use crate::position;
use crate::protocol::{self, Notification, Request};
use crate::registry::{DocumentHandle, DocumentState, Registry, Release};
use crate::transport::{Transport, TransportEvent};
use crate::types::{
    ClientEvent, CompletionList, FileStatus, Hover, PublishDiagnosticsParams, RequestId,
    ResponseError, ServerState, SignatureHelp, SymbolInformation,
};

/// Default style for lines the server reports as inactive.
pub const DEFAULT_DISABLED_LINE_STYLE: u8 = 32;

/// Edit and redraw notifications from the host editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// `text` now sits at byte `position`. Reported after the insertion;
    /// `position` itself maps the same before and after.
    Inserted { position: usize, text: String },
    /// `length` bytes from `position` are about to be removed. Reported
    /// while the text is still there.
    BeforeDelete { position: usize, length: usize },
    /// The host restyled `length` bytes from `position`.
    StyleChanged { position: usize, length: usize },
    /// A redraw settled.
    UiUpdated { content_changed: bool },
}

#[derive(Debug, Deserialize)]
struct MessageParams {
    #[serde(rename = "type")]
    level: u8,
    message: String,
}

pub struct Session {
    state: ServerState,
    dispatcher: Dispatcher,
    registry: Registry,
    notifier: Notifier,
    capabilities: ServerCapabilities,
    disabled_line_style: u8,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_DISABLED_LINE_STYLE)
    }
}

impl Session {
    #[must_use]
    pub fn new(disabled_line_style: u8) -> Self {
        Self {
            state: ServerState::NotStarted,
            dispatcher: Dispatcher::default(),
            registry: Registry::default(),
            notifier: Notifier::default(),
            capabilities: ServerCapabilities::default(),
            disabled_line_style,
        }
    }

    #[must_use]
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Last capabilities the server reported. Stale after the server stops.
    #[must_use]
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    #[must_use]
    pub fn document(&self, doc: &DocumentHandle) -> Option<&DocumentState> {
        self.registry.get(doc)
    }

    #[must_use]
    pub fn document_count(&self) -> usize {
        self.registry.len()
    }

    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.dispatcher.pending_count()
    }

    /// Launch `exec` with the shell-style argument string `args`, replacing
    /// any running server. Must be called within a tokio runtime.
    pub fn start_server(&mut self, exec: &str, args: &str) -> bool {
        self.dispatcher.reap();

        let program = match which::which(exec) {
            Ok(program) => program,
            Err(e) => {
                tracing::warn!("LSP server {exec} not found in PATH: {e}");
                return false;
            }
        };
        let args = match shell_words::split(args) {
            Ok(args) => args,
            Err(e) => {
                tracing::warn!("Invalid LSP server arguments {args:?}: {e}");
                return false;
            }
        };

        tracing::info!("Starting LSP server {}...", program.display());
        match Transport::spawn(&program, &args) {
            Ok(transport) => {
                self.attach(transport);
                true
            }
            Err(e) => {
                tracing::warn!("Failed to start LSP server: {e:#}");
                false
            }
        }
    }

    fn attach(&mut self, transport: Transport) {
        if self.dispatcher.has_transport() {
            tracing::info!("Restarting LSP server");
            self.registry.mark_all_closed();
        }
        self.dispatcher.install(transport);
        self.state = ServerState::Starting;
    }

    /// Send `initialize`. Documents added so far are opened once the server
    /// answers.
    pub fn initialize(&mut self, config: &ClientConfig) -> bool {
        if !matches!(self.state, ServerState::Starting | ServerState::Running) {
            tracing::warn!(state = self.state.label(), "LSP initialize in wrong state");
            return false;
        }
        let params = protocol::initialize_params(config);
        if self
            .send_request(RequestKind::Initialize, None, "initialize", Some(params))
            .is_none()
        {
            return false;
        }
        self.state = ServerState::Initializing;
        true
    }

    /// Ask the server to shut down. `exit` follows once it answers.
    pub fn stop_server(&mut self) -> bool {
        if !self.state.is_connected() {
            tracing::debug!(state = self.state.label(), "LSP shutdown without a connection");
            return false;
        }
        self.send_request(RequestKind::Shutdown, None, "shutdown", None)
            .is_some()
    }

    /// Register a view of `doc`.
    ///
    /// The first registration decides the uri and language id; later ones
    /// only add a reference.
    pub fn add_document(&mut self, doc: &DocumentHandle, uri: &str, language_id: &str) {
        if self.registry.add(doc, uri, language_id) {
            self.open_document(doc);
        }
    }

    /// Drop one view of `doc`. Returns `true` when the caller may discard
    /// the document: it was the last view, or it was never registered.
    pub fn remove_document(&mut self, doc: &DocumentHandle) -> bool {
        match self.registry.release(doc) {
            Release::NotRegistered => true,
            Release::Retained => false,
            Release::Removed(state) => {
                if state.open {
                    let params = protocol::text_document_params(&state.uri);
                    notify(&mut self.dispatcher, "textDocument/didClose", Some(params));
                }
                true
            }
        }
    }

    fn open_document(&mut self, doc: &DocumentHandle) {
        if self.state != ServerState::Ready {
            return;
        }
        let Some(state) = self.registry.get_mut(doc) else {
            return;
        };
        if state.open {
            return;
        }
        let document = doc.document();
        let text = document.char_range(0, document.length());
        let params =
            protocol::did_open_params(&state.uri, &state.language_id, state.version, &text);
        if notify(&mut self.dispatcher, "textDocument/didOpen", Some(params)) {
            tracing::debug!(uri = %state.uri, "Opened document");
            state.open = true;
        }
    }

    pub fn document_symbol_request(&mut self, doc: &DocumentHandle) -> Option<RequestId> {
        let Some(state) = self.registry.get(doc) else {
            tracing::debug!("Symbol request for unregistered document");
            return None;
        };
        let params = protocol::text_document_params(&state.uri);
        self.send_request(
            RequestKind::DocumentSymbols,
            Some(doc),
            "textDocument/documentSymbol",
            Some(params),
        )
    }

    pub fn hover_request(&mut self, doc: &DocumentHandle, pos: usize) -> Option<RequestId> {
        self.position_request(doc, pos, RequestKind::Hover, "textDocument/hover")
    }

    pub fn completion_request(&mut self, doc: &DocumentHandle, pos: usize) -> Option<RequestId> {
        self.position_request(doc, pos, RequestKind::Completion, "textDocument/completion")
    }

    pub fn signature_help_request(
        &mut self,
        doc: &DocumentHandle,
        pos: usize,
    ) -> Option<RequestId> {
        self.position_request(
            doc,
            pos,
            RequestKind::SignatureHelp,
            "textDocument/signatureHelp",
        )
    }

    fn position_request(
        &mut self,
        doc: &DocumentHandle,
        pos: usize,
        kind: RequestKind,
        method: &'static str,
    ) -> Option<RequestId> {
        let Some(state) = self.registry.get(doc) else {
            tracing::debug!(?kind, "Request for unregistered document");
            return None;
        };
        let position = position::to_lsp(doc.document(), pos);
        let params = protocol::text_document_position_params(&state.uri, position);
        self.send_request(kind, Some(doc), method, Some(params))
    }

    fn send_request(
        &mut self,
        kind: RequestKind,
        document: Option<&DocumentHandle>,
        method: &'static str,
        params: Option<Value>,
    ) -> Option<RequestId> {
        let id = self.dispatcher.next_id();
        let body = match protocol::to_body(&Request::new(id, method, params)) {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!("{e:#}");
                return None;
            }
        };
        self.dispatcher
            .send_request(id, kind, document.cloned(), body)
            .then_some(id)
    }

    #[must_use]
    pub fn character_triggers_completion(&self, ch: char) -> bool {
        self.capabilities.character_triggers_completion(ch)
    }

    #[must_use]
    pub fn character_triggers_signature_help(&self, ch: char) -> bool {
        self.capabilities.character_triggers_signature_help(ch)
    }

    /// Receive pushes (diagnostics, file status) for `doc`.
    pub fn register(&mut self, doc: &DocumentHandle, subscriber: &Subscriber) {
        self.notifier.register(doc, subscriber);
    }

    /// Stop all deliveries to `subscriber`.
    pub fn unregister(&mut self, subscriber: &Subscriber) {
        self.notifier.unregister(subscriber.id());
    }

    /// Receive the response to request `id`.
    pub fn register_request(&mut self, id: RequestId, subscriber: &Subscriber) {
        self.notifier.register_request(id, subscriber);
    }

    /// Route a host editor notification for `doc`.
    pub fn on_document_notification(&mut self, doc: &DocumentHandle, event: DocumentEvent) {
        match event {
            DocumentEvent::Inserted { position, text } => {
                self.send_change(doc, position, 0, &text);
            }
            DocumentEvent::BeforeDelete { position, length } => {
                self.send_change(doc, position, length, "");
            }
            DocumentEvent::StyleChanged { position, length } => {
                self.note_style_change(doc, position, length);
            }
            DocumentEvent::UiUpdated { content_changed } => {
                if content_changed {
                    let style = self.disabled_line_style;
                    if let Some(state) = self.registry.get_mut(doc) {
                        apply_highlight(doc, state, style);
                    }
                }
            }
        }
    }

    /// One `didChange` replacing `length` bytes at `position` with `text`.
    /// The version moves only if the notification went out.
    fn send_change(&mut self, doc: &DocumentHandle, position: usize, length: usize, text: &str) {
        let Some(state) = self.registry.get_mut(doc) else {
            return;
        };
        if !state.open {
            tracing::trace!(uri = %state.uri, "Change for unopened document not sent");
            return;
        }
        let range = position::range(doc.document(), position, length);
        let version = state.version + 1;
        let params = protocol::did_change_params(&state.uri, version, range, text);
        if notify(&mut self.dispatcher, "textDocument/didChange", Some(params)) {
            state.version = version;
        } else {
            tracing::debug!(uri = %state.uri, "didChange not sent");
        }
    }

    fn note_style_change(&mut self, doc: &DocumentHandle, position: usize, length: usize) {
        let Some(state) = self.registry.get_mut(doc) else {
            return;
        };
        if !state.open || state.applying_highlight {
            return;
        }
        let document = doc.document();
        let span = LineSpan::new(
            document.line_from_position(position) as u32,
            document.line_from_position(position + length) as u32,
        );
        state.pending_highlight = Some(match state.pending_highlight {
            Some(pending) => pending.union(span),
            None => span,
        });
    }

    /// Handle transport events that are already waiting, up to `budget`.
    ///
    /// Non-blocking. Returns how many were handled.
    pub fn poll_events(&mut self, budget: usize) -> usize {
        let mut count = 0;
        while count < budget {
            let Some(event) = self.dispatcher.try_next_event() else {
                break;
            };
            self.handle_event(event);
            count += 1;
        }
        count
    }

    /// Wait for one transport event and handle it. Returns `false` once the
    /// transport has nothing more to deliver.
    pub async fn pump(&mut self) -> bool {
        match self.dispatcher.next_event().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Started => {
                tracing::info!("LSP server started");
                if self.state == ServerState::Starting {
                    self.state = ServerState::Running;
                }
            }
            TransportEvent::Frame(bytes) => {
                if let Some(inbound) = self.dispatcher.on_frame(&bytes) {
                    self.handle_inbound(inbound);
                }
            }
            TransportEvent::Exited { code } => self.on_exited(code),
        }
    }

    fn on_exited(&mut self, code: Option<i32>) {
        match code {
            Some(0) => tracing::info!("LSP server exited"),
            Some(code) => tracing::warn!(code, "LSP server exited"),
            None => tracing::warn!("LSP server terminated"),
        }
        self.dispatcher.on_process_exited();
        self.registry.mark_all_closed();
        // Still inside the transport's own event; release it later.
        self.dispatcher.mark_for_delete();
        self.state = ServerState::Stopped;
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Response { request, outcome } => self.on_response(request, outcome),
            Inbound::Notification { kind, params } => self.on_notification(kind, params),
        }
    }

    fn on_response(&mut self, request: PendingRequest, outcome: Result<Value, ResponseError>) {
        let PendingRequest {
            id,
            kind,
            document,
            raw_request,
        } = request;

        let result = match outcome {
            Ok(result) => result,
            Err(error) => {
                tracing::warn!(%id, ?kind, "LSP request failed: {error}");
                tracing::debug!(
                    %id,
                    request = %String::from_utf8_lossy(&raw_request),
                    "Failed request"
                );
                match kind {
                    RequestKind::Initialize => {
                        if self.state == ServerState::Initializing {
                            self.state = ServerState::Running;
                        }
                    }
                    RequestKind::Shutdown => {}
                    _ => {
                        self.notifier
                            .deliver_response(id, ClientEvent::RequestFailed { id, error });
                    }
                }
                return;
            }
        };

        let event = match kind {
            RequestKind::Initialize => {
                self.on_initialized(&result);
                return;
            }
            RequestKind::Shutdown => {
                tracing::info!("LSP server acknowledged shutdown");
                notify(&mut self.dispatcher, "exit", None);
                return;
            }
            RequestKind::DocumentSymbols => {
                let uri = document
                    .as_ref()
                    .and_then(|doc| self.registry.get(doc))
                    .map(|state| state.uri.clone())
                    .unwrap_or_default();
                ClientEvent::DocumentSymbols {
                    id,
                    symbols: SymbolInformation::list_from_result(&uri, result),
                }
            }
            RequestKind::Hover => ClientEvent::Hover {
                id,
                hover: Hover::from_result(result),
            },
            RequestKind::Completion => ClientEvent::Completion {
                id,
                list: CompletionList::from_result(result),
            },
            RequestKind::SignatureHelp => ClientEvent::SignatureHelp {
                id,
                help: SignatureHelp::from_result(result),
            },
        };
        self.notifier.deliver_response(id, event);
    }

    fn on_initialized(&mut self, result: &Value) {
        self.capabilities = ServerCapabilities::from_initialize_result(result);
        self.state = ServerState::Ready;
        tracing::info!("LSP server initialized");
        notify(
            &mut self.dispatcher,
            "initialized",
            Some(serde_json::json!({})),
        );
        for doc in self.registry.unopened() {
            self.open_document(&doc);
        }
    }

    fn on_notification(&mut self, kind: NotificationKind, params: Value) {
        match kind {
            NotificationKind::PublishDiagnostics => {
                let params: PublishDiagnosticsParams = match serde_json::from_value(params) {
                    Ok(params) => params,
                    Err(e) => {
                        tracing::warn!("Failed to parse publishDiagnostics: {e}");
                        return;
                    }
                };
                let Some((doc, _)) = self.registry.find_by_uri(&params.uri) else {
                    tracing::debug!(uri = %params.uri, "Diagnostics for unknown document");
                    return;
                };
                tracing::debug!(
                    uri = %params.uri,
                    count = params.diagnostics.len(),
                    "Diagnostics updated"
                );
                self.notifier.deliver_push(
                    &doc,
                    &ClientEvent::Diagnostics {
                        uri: params.uri,
                        diagnostics: params.diagnostics,
                    },
                );
            }
            NotificationKind::FileStatus => {
                let status: FileStatus = match serde_json::from_value(params) {
                    Ok(status) => status,
                    Err(e) => {
                        tracing::warn!("Failed to parse fileStatus: {e}");
                        return;
                    }
                };
                let Some((doc, _)) = self.registry.find_by_uri(&status.uri) else {
                    tracing::debug!(uri = %status.uri, "File status for unknown document");
                    return;
                };
                self.notifier
                    .deliver_push(&doc, &ClientEvent::FileStatus(status));
            }
            NotificationKind::SemanticHighlighting => self.on_semantic_highlighting(params),
            NotificationKind::LogMessage | NotificationKind::ShowMessage => {
                log_server_message(params);
            }
        }
    }

    fn on_semantic_highlighting(&mut self, params: Value) {
        let mut update = match SemanticHighlightingParams::from_value(params) {
            Ok(update) => update,
            Err(e) => {
                tracing::warn!("Failed to parse semanticHighlighting: {e}");
                return;
            }
        };
        let style = self.disabled_line_style;
        let Some((doc, state)) = self.registry.find_by_uri(&update.uri) else {
            tracing::debug!(uri = %update.uri, "Highlighting for unknown document");
            return;
        };
        highlighting::merge(&mut state.highlighting, &mut update.lines);

        let document = doc.document();
        let last_line = document.line_from_position(document.length()) as u32;
        state.pending_highlight = Some(LineSpan::new(0, last_line));
        apply_highlight(&doc, state, style);
    }

    #[cfg(test)]
    fn detached() -> (Self, crate::transport::DetachedPeer) {
        let (transport, peer) = Transport::detached();
        let mut session = Self::default();
        session.attach(transport);
        (session, peer)
    }
}

/// Send a notification. `false` when it could not be sent.
fn notify(dispatcher: &mut Dispatcher, method: &'static str, params: Option<Value>) -> bool {
    match protocol::to_body(&Notification::new(method, params)) {
        Ok(body) => dispatcher.send_notification(body),
        Err(e) => {
            tracing::warn!("{e:#}");
            false
        }
    }
}

/// Style the pending span of `doc` from its cache, then clear the span.
fn apply_highlight(doc: &DocumentHandle, state: &mut DocumentState, disabled_style: u8) {
    if state.applying_highlight {
        return;
    }
    let Some(span) = state.pending_highlight.take() else {
        return;
    };
    state.applying_highlight = true;
    highlighting::apply(doc.document(), &state.highlighting, span, disabled_style);
    state.applying_highlight = false;
}

fn log_server_message(params: Value) {
    let params: MessageParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(e) => {
            tracing::trace!("Malformed server message: {e}");
            return;
        }
    };
    let message = params.message;
    match params.level {
        1 => tracing::error!("LSP server: {message}"),
        2 => tracing::warn!("LSP server: {message}"),
        3 => tracing::info!("LSP server: {message}"),
        _ => tracing::debug!("LSP server: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use base64::Engine;
    use tokio::sync::mpsc;

    use super::*;
    use crate::buffer::TextBuffer;
    use crate::position::{Position, TextDocument};
    use crate::transport::DetachedPeer;

    fn buffer(text: &str) -> (Rc<TextBuffer>, DocumentHandle) {
        let buffer = Rc::new(TextBuffer::new(text));
        let doc = DocumentHandle::from(buffer.clone());
        (buffer, doc)
    }

    fn methods(messages: &[Value]) -> Vec<&str> {
        messages
            .iter()
            .map(|m| m["method"].as_str().unwrap_or("<response>"))
            .collect()
    }

    fn respond(peer: &DetachedPeer, id: RequestId, result: Value) {
        peer.push_json(&serde_json::json!({"jsonrpc": "2.0", "id": id.value(), "result": result}));
    }

    /// Session past the initialize handshake, with the outgoing queue drained.
    fn ready() -> (Session, DetachedPeer) {
        let (mut session, mut peer) = Session::detached();
        peer.push(TransportEvent::Started);
        session.poll_events(8);
        assert!(session.initialize(&ClientConfig::default()));
        let init = peer.drain_json();
        let id = RequestId::new(init[0]["id"].as_u64().unwrap()).unwrap();
        respond(
            &peer,
            id,
            serde_json::json!({
                "capabilities": {
                    "hoverProvider": true,
                    "completionProvider": { "triggerCharacters": ["."] },
                    "signatureHelpProvider": { "triggerCharacters": ["("] }
                }
            }),
        );
        session.poll_events(8);
        assert_eq!(session.state(), ServerState::Ready);
        peer.drain_json();
        (session, peer)
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[test]
    fn test_start_server_unknown_executable() {
        let mut session = Session::default();
        assert!(!session.start_server("quill-no-such-language-server", "--stdio"));
        assert_eq!(session.state(), ServerState::NotStarted);
    }

    #[cfg(unix)]
    #[test]
    fn test_start_server_bad_argument_string() {
        let mut session = Session::default();
        assert!(!session.start_server("cat", "-c 'unterminated"));
        assert_eq!(session.state(), ServerState::NotStarted);
    }

    #[test]
    fn test_initialize_handshake() {
        let (mut session, mut peer) = Session::detached();
        assert_eq!(session.state(), ServerState::Starting);
        peer.push(TransportEvent::Started);
        assert_eq!(session.poll_events(8), 1);
        assert_eq!(session.state(), ServerState::Running);

        let config = ClientConfig {
            root_uri: Some("file:///src".into()),
            ..ClientConfig::default()
        };
        assert!(session.initialize(&config));
        assert_eq!(session.state(), ServerState::Initializing);
        assert!(!session.initialize(&config), "only once per process");

        let sent = peer.drain_json();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["method"], "initialize");
        assert_eq!(sent[0]["params"]["rootUri"], "file:///src");
        assert!(sent[0]["params"]["processId"].is_number());

        let id = RequestId::new(sent[0]["id"].as_u64().unwrap()).unwrap();
        respond(
            &peer,
            id,
            serde_json::json!({"capabilities": {"hoverProvider": true}}),
        );
        session.poll_events(8);

        assert_eq!(session.state(), ServerState::Ready);
        assert!(session.capabilities().hover_provider);
        assert_eq!(methods(&peer.drain_json()), vec!["initialized"]);
    }

    #[test]
    fn test_initialize_error_returns_to_running() {
        let (mut session, mut peer) = Session::detached();
        assert!(session.initialize(&ClientConfig::default()));
        let id = peer.drain_json()[0]["id"].as_u64().unwrap();
        peer.push_json(&serde_json::json!({
            "jsonrpc": "2.0", "id": id, "error": {"code": -32002, "message": "not yet"}
        }));
        session.poll_events(8);
        assert_eq!(session.state(), ServerState::Running);
        assert!(peer.drain_json().is_empty());
    }

    #[test]
    fn test_documents_added_before_handshake_open_after() {
        let (mut session, mut peer) = Session::detached();
        let (_buf, doc) = buffer("int main(void) { return 0; }\n");
        session.add_document(&doc, "file:///a.c", "c");
        assert!(!session.document(&doc).unwrap().is_open());

        assert!(session.initialize(&ClientConfig::default()));
        let sent = peer.drain_json();
        assert_eq!(methods(&sent), vec!["initialize"]);

        let id = RequestId::new(sent[0]["id"].as_u64().unwrap()).unwrap();
        respond(&peer, id, serde_json::json!({"capabilities": {}}));
        session.poll_events(8);

        let sent = peer.drain_json();
        assert_eq!(methods(&sent), vec!["initialized", "textDocument/didOpen"]);
        let item = &sent[1]["params"]["textDocument"];
        assert_eq!(item["uri"], "file:///a.c");
        assert_eq!(item["languageId"], "c");
        assert_eq!(item["text"], "int main(void) { return 0; }\n");
        assert!(session.document(&doc).unwrap().is_open());
    }

    #[test]
    fn test_two_views_close_on_last_remove() {
        let (mut session, mut peer) = ready();
        let (_buf, doc) = buffer("int x;\n");
        session.add_document(&doc, "file:///a.c", "c");
        session.add_document(&doc, "file:///a.c", "c");
        assert_eq!(methods(&peer.drain_json()), vec!["textDocument/didOpen"]);

        assert!(!session.remove_document(&doc));
        assert!(session.document(&doc).unwrap().is_open());
        assert!(peer.drain_json().is_empty(), "no close while a view remains");

        assert!(session.remove_document(&doc));
        let sent = peer.drain_json();
        assert_eq!(methods(&sent), vec!["textDocument/didClose"]);
        assert_eq!(sent[0]["params"]["textDocument"]["uri"], "file:///a.c");
        assert!(session.document(&doc).is_none());
        assert_eq!(session.document_count(), 0);
    }

    #[test]
    fn test_remove_unregistered_document() {
        let (mut session, mut peer) = ready();
        let (_buf, doc) = buffer("");
        assert!(session.remove_document(&doc));
        assert!(peer.drain_json().is_empty());
    }

    #[test]
    fn test_second_language_id_is_ignored() {
        let (mut session, _peer) = ready();
        let (_buf, doc) = buffer("");
        session.add_document(&doc, "file:///a.h", "c");
        session.add_document(&doc, "file:///a.h", "cpp");
        let state = session.document(&doc).unwrap();
        assert_eq!(state.language_id(), "c");
        assert_eq!(state.ref_count(), 2);
    }

    #[test]
    fn test_hover_abandoned_on_exit() {
        let (mut session, peer) = ready();
        let (_buf, doc) = buffer("int x;\n");
        session.add_document(&doc, "file:///a.c", "c");

        session.dispatcher.set_last_id(6);
        let id = session.hover_request(&doc, 4).unwrap();
        assert_eq!(id.value(), 7);
        let (sub, mut rx) = Subscriber::channel();
        session.register_request(id, &sub);

        peer.push(TransportEvent::Exited { code: Some(1) });
        session.poll_events(8);

        assert_eq!(session.state(), ServerState::Stopped);
        assert_eq!(session.pending_requests(), 0);
        assert!(!session.document(&doc).unwrap().is_open());
        assert!(drain(&mut rx).is_empty());
        assert!(session.hover_request(&doc, 4).is_none());
    }

    #[test]
    fn test_hover_response_reaches_requester() {
        let (mut session, mut peer) = ready();
        let (_buf, doc) = buffer("int x;\nint y = x;\n");
        session.add_document(&doc, "file:///a.c", "c");
        peer.drain_json();

        let id = session.hover_request(&doc, 15).unwrap();
        let sent = peer.drain_json();
        assert_eq!(sent[0]["method"], "textDocument/hover");
        assert_eq!(
            sent[0]["params"]["position"],
            serde_json::json!({"line": 1, "character": 8})
        );

        let (sub, mut rx) = Subscriber::channel();
        let (bystander, mut bystander_rx) = Subscriber::channel();
        session.register_request(id, &sub);
        session.register(&doc, &bystander);
        respond(
            &peer,
            id,
            serde_json::json!({"contents": {"kind": "plaintext", "value": "int x"}}),
        );
        session.poll_events(8);

        match drain(&mut rx).as_slice() {
            [ClientEvent::Hover { id: got, hover: Some(hover) }] => {
                assert_eq!(*got, id);
                assert_eq!(hover.contents.value, "int x");
            }
            other => panic!("expected one hover event, got {other:?}"),
        }
        assert!(drain(&mut bystander_rx).is_empty());
        assert_eq!(session.pending_requests(), 0);
    }

    #[test]
    fn test_error_response_is_request_failed() {
        let (mut session, peer) = ready();
        let (_buf, doc) = buffer("x");
        session.add_document(&doc, "file:///a.c", "c");
        let id = session.completion_request(&doc, 1).unwrap();
        let (sub, mut rx) = Subscriber::channel();
        session.register_request(id, &sub);

        peer.push_json(&serde_json::json!({
            "jsonrpc": "2.0", "id": id.value(),
            "error": {"code": -32602, "message": "bad position"}
        }));
        session.poll_events(8);

        match drain(&mut rx).as_slice() {
            [ClientEvent::RequestFailed { id: got, error }] => {
                assert_eq!(*got, id);
                assert_eq!(error.code, -32602);
            }
            other => panic!("expected RequestFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_symbols_and_signature_help_responses() {
        let (mut session, peer) = ready();
        let (_buf, doc) = buffer("int add(int a, int b);\n");
        session.add_document(&doc, "file:///a.c", "c");
        let (sub, mut rx) = Subscriber::channel();

        let symbols_id = session.document_symbol_request(&doc).unwrap();
        let help_id = session.signature_help_request(&doc, 8).unwrap();
        session.register_request(symbols_id, &sub);
        session.register_request(help_id, &sub);

        let range = serde_json::json!({
            "start": {"line": 0, "character": 0}, "end": {"line": 0, "character": 21}
        });
        respond(
            &peer,
            symbols_id,
            serde_json::json!([{"name": "add", "kind": 12, "range": range, "selectionRange": range}]),
        );
        respond(
            &peer,
            help_id,
            serde_json::json!({"signatures": [{"label": "int add(int a, int b)", "parameters": []}]}),
        );
        session.poll_events(8);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        match &events[0] {
            ClientEvent::DocumentSymbols { symbols, .. } => {
                assert_eq!(symbols[0].name, "add");
                assert_eq!(symbols[0].location.uri, "file:///a.c");
            }
            other => panic!("expected symbols, got {other:?}"),
        }
        assert!(matches!(
            &events[1],
            ClientEvent::SignatureHelp { help: Some(_), .. }
        ));
    }

    #[test]
    fn test_requests_for_unknown_document() {
        let (mut session, mut peer) = ready();
        let (_buf, doc) = buffer("x");
        assert!(session.document_symbol_request(&doc).is_none());
        assert!(session.hover_request(&doc, 0).is_none());
        assert!(session.completion_request(&doc, 0).is_none());
        assert!(session.signature_help_request(&doc, 0).is_none());
        assert!(peer.drain_json().is_empty());
    }

    #[test]
    fn test_incremental_changes() {
        let (mut session, mut peer) = ready();
        let (buf, doc) = buffer("int x;\n");
        session.add_document(&doc, "file:///a.c", "c");
        peer.drain_json();

        buf.insert(5, "y");
        session.on_document_notification(
            &doc,
            DocumentEvent::Inserted {
                position: 5,
                text: "y".into(),
            },
        );
        session.on_document_notification(
            &doc,
            DocumentEvent::BeforeDelete {
                position: 0,
                length: 4,
            },
        );
        buf.delete(0, 4);

        let sent = peer.drain_json();
        assert_eq!(sent.len(), 2);
        let insert = &sent[0]["params"];
        assert_eq!(insert["textDocument"]["version"], 1);
        assert_eq!(insert["contentChanges"][0]["text"], "y");
        assert_eq!(
            insert["contentChanges"][0]["range"],
            serde_json::json!({
                "start": {"line": 0, "character": 5}, "end": {"line": 0, "character": 5}
            })
        );
        let delete = &sent[1]["params"];
        assert_eq!(delete["textDocument"]["version"], 2);
        assert_eq!(delete["contentChanges"][0]["text"], "");
        assert_eq!(
            delete["contentChanges"][0]["range"]["end"],
            serde_json::json!({"line": 0, "character": 4})
        );
        assert_eq!(session.document(&doc).unwrap().version(), 2);
    }

    #[test]
    fn test_failed_change_send_keeps_version() {
        let (mut session, mut peer) = ready();
        let (_buf, doc) = buffer("abc");
        session.add_document(&doc, "file:///a.c", "c");
        assert_eq!(methods(&peer.drain_json()), vec!["textDocument/didOpen"]);

        let DetachedPeer { outgoing, events: _events } = peer;
        drop(outgoing);
        session.on_document_notification(
            &doc,
            DocumentEvent::Inserted {
                position: 3,
                text: "d".into(),
            },
        );
        let state = session.document(&doc).unwrap();
        assert!(state.is_open());
        assert_eq!(state.version(), 0);
    }

    #[test]
    fn test_change_to_unopened_document_not_sent() {
        let (mut session, mut peer) = Session::detached();
        let (_buf, doc) = buffer("abc");
        session.add_document(&doc, "file:///a.c", "c");
        session.on_document_notification(
            &doc,
            DocumentEvent::Inserted {
                position: 0,
                text: "z".into(),
            },
        );
        assert_eq!(session.document(&doc).unwrap().version(), 0);
        assert!(peer.drain_json().is_empty());
    }

    #[test]
    fn test_diagnostics_fan_out() {
        let (mut session, peer) = ready();
        let (_buf, doc) = buffer("int x\n");
        session.add_document(&doc, "file:///a.c", "c");
        let (first, mut first_rx) = Subscriber::channel();
        let (second, mut second_rx) = Subscriber::channel();
        session.register(&doc, &first);
        session.register(&doc, &second);

        let diagnostics = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {
                "uri": "file:///a.c",
                "diagnostics": [{
                    "range": {"start": {"line": 0, "character": 5}, "end": {"line": 0, "character": 5}},
                    "severity": 1,
                    "message": "expected ';'"
                }]
            }
        });
        peer.push_json(&diagnostics);
        let mut elsewhere = diagnostics.clone();
        elsewhere["params"]["uri"] = "file:///b.c".into();
        peer.push_json(&elsewhere);
        session.poll_events(8);

        for rx in [&mut first_rx, &mut second_rx] {
            match drain(rx).as_slice() {
                [ClientEvent::Diagnostics { uri, diagnostics }] => {
                    assert_eq!(uri, "file:///a.c");
                    assert_eq!(diagnostics[0].message, "expected ';'");
                }
                other => panic!("expected diagnostics, got {other:?}"),
            }
        }

        session.unregister(&first);
        peer.push_json(&diagnostics);
        session.poll_events(8);
        assert!(drain(&mut first_rx).is_empty());
        assert_eq!(drain(&mut second_rx).len(), 1);
    }

    #[test]
    fn test_file_status_push() {
        let (mut session, peer) = ready();
        let (_buf, doc) = buffer("");
        session.add_document(&doc, "file:///a.c", "c");
        let (sub, mut rx) = Subscriber::channel();
        session.register(&doc, &sub);
        peer.push_json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/clangd.fileStatus",
            "params": {"uri": "file:///a.c", "state": "parsing includes"}
        }));
        session.poll_events(8);
        assert_eq!(
            drain(&mut rx),
            vec![ClientEvent::FileStatus(FileStatus {
                uri: "file:///a.c".into(),
                state: "parsing includes".into(),
            })]
        );
    }

    fn highlighting_push(lines: &Value) -> Value {
        serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/semanticHighlighting",
            "params": {"textDocument": {"uri": "file:///a.c", "version": 1}, "lines": lines}
        })
    }

    fn token_blob(character: u32, length: u16, scope: u16) -> String {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&character.to_be_bytes());
        bytes.extend_from_slice(&length.to_be_bytes());
        bytes.extend_from_slice(&scope.to_be_bytes());
        base64::engine::general_purpose::STANDARD.encode(bytes)
    }

    #[test]
    fn test_semantic_highlighting_applied_and_reapplied() {
        let (mut session, peer) = ready();
        let (buf, doc) = buffer("#if 0\nfoo();\n");
        session.add_document(&doc, "file:///a.c", "c");

        peer.push_json(&highlighting_push(&serde_json::json!([
            {"line": 0, "isInactive": true, "tokens": ""},
            {"line": 1, "isInactive": false, "tokens": token_blob(0, 3, 2)}
        ])));
        session.poll_events(8);

        assert_eq!(buf.style_at(0), DEFAULT_DISABLED_LINE_STYLE);
        assert_eq!(buf.style_at(6), highlighting::FIRST_LSP_STYLE + 2);
        assert_eq!(buf.style_at(9), 0);
        let state = session.document(&doc).unwrap();
        assert_eq!(state.highlighting().len(), 2);
        assert!(state.pending_highlight.is_none());

        // The host lexer wipes line 1; the cached tokens come back on redraw.
        buf.set_style(6, 3, 0);
        session.on_document_notification(
            &doc,
            DocumentEvent::StyleChanged {
                position: 6,
                length: 3,
            },
        );
        assert_eq!(
            session.document(&doc).unwrap().pending_highlight,
            Some(LineSpan::new(1, 1))
        );
        session.on_document_notification(
            &doc,
            DocumentEvent::UiUpdated {
                content_changed: true,
            },
        );
        assert_eq!(buf.style_at(6), highlighting::FIRST_LSP_STYLE + 2);
        assert!(session.document(&doc).unwrap().pending_highlight.is_none());
    }

    #[test]
    fn test_highlighting_update_merges() {
        let (mut session, peer) = ready();
        let (_buf, doc) = buffer("a\nb\nc\n");
        session.add_document(&doc, "file:///a.c", "c");

        peer.push_json(&highlighting_push(&serde_json::json!([
            {"line": 0, "tokens": token_blob(0, 1, 0)},
            {"line": 2, "tokens": token_blob(0, 1, 0)}
        ])));
        peer.push_json(&highlighting_push(&serde_json::json!([
            {"line": 1, "tokens": token_blob(0, 1, 1)},
            {"line": 2, "tokens": ""}
        ])));
        peer.push_json(&highlighting_push(&serde_json::json!([])));
        session.poll_events(8);

        let lines: Vec<u32> = session
            .document(&doc)
            .unwrap()
            .highlighting()
            .iter()
            .map(|l| l.line)
            .collect();
        assert_eq!(lines, vec![0, 1]);
    }

    #[test]
    fn test_exit_then_restart_reopens_documents() {
        let (mut session, peer) = ready();
        let (_buf, doc) = buffer("int x;\n");
        session.add_document(&doc, "file:///a.c", "c");
        peer.push(TransportEvent::Exited { code: None });
        session.poll_events(8);
        assert_eq!(session.state(), ServerState::Stopped);
        assert!(session.capabilities().hover_provider, "capabilities left stale");

        session.dispatcher.reap();
        let (transport, mut peer) = Transport::detached();
        session.attach(transport);
        peer.push(TransportEvent::Started);
        session.poll_events(8);
        assert!(session.initialize(&ClientConfig::default()));
        let id = peer.drain_json()[0]["id"].as_u64().unwrap();
        peer.push_json(&serde_json::json!({"jsonrpc": "2.0", "id": id, "result": {"capabilities": {}}}));
        session.poll_events(8);

        assert_eq!(
            methods(&peer.drain_json()),
            vec!["initialized", "textDocument/didOpen"]
        );
        assert!(session.document(&doc).unwrap().is_open());
    }

    #[test]
    fn test_stop_server_sends_exit_after_answer() {
        let (mut session, mut peer) = ready();
        assert!(session.stop_server());
        let sent = peer.drain_json();
        assert_eq!(methods(&sent), vec!["shutdown"]);
        assert!(sent[0].get("params").is_none());

        let id = RequestId::new(sent[0]["id"].as_u64().unwrap()).unwrap();
        respond(&peer, id, Value::Null);
        session.poll_events(8);
        assert_eq!(methods(&peer.drain_json()), vec!["exit"]);
    }

    #[test]
    fn test_trigger_characters_follow_capabilities() {
        let (session, _peer) = ready();
        assert!(session.character_triggers_completion('.'));
        assert!(!session.character_triggers_completion('('));
        assert!(session.character_triggers_signature_help('('));
    }

    #[test]
    fn test_poll_budget() {
        let (mut session, peer) = ready();
        for _ in 0..3 {
            peer.push_json(&serde_json::json!({"method": "$/progress", "params": {}}));
        }
        assert_eq!(session.poll_events(2), 2);
        assert_eq!(session.poll_events(8), 1);
        assert_eq!(session.poll_events(8), 0);
    }

    #[test]
    fn test_stop_server_needs_connection() {
        let mut session = Session::default();
        assert!(!session.stop_server());

        let (mut session, mut peer) = Session::detached();
        assert!(!session.stop_server(), "process not confirmed started");
        assert!(peer.drain_json().is_empty());
    }

    #[test]
    fn test_style_change_ignored_while_closed() {
        let (mut session, _peer) = Session::detached();
        let (_buf, doc) = buffer("a\nb\n");
        session.add_document(&doc, "file:///a.c", "c");
        session.on_document_notification(
            &doc,
            DocumentEvent::StyleChanged {
                position: 0,
                length: 3,
            },
        );
        assert!(session.document(&doc).unwrap().pending_highlight.is_none());
    }

    #[test]
    fn test_push_registration_outlives_document_removal() {
        let (mut session, mut peer) = ready();
        let (_buf, doc) = buffer("int x\n");
        let (sub, mut rx) = Subscriber::channel();
        session.add_document(&doc, "file:///a.c", "c");
        session.register(&doc, &sub);

        assert!(session.remove_document(&doc));
        session.add_document(&doc, "file:///a.c", "c");
        assert_eq!(
            methods(&peer.drain_json()),
            vec!["textDocument/didClose", "textDocument/didOpen"]
        );

        peer.push_json(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": "textDocument/publishDiagnostics",
            "params": {"uri": "file:///a.c", "diagnostics": []}
        }));
        session.poll_events(8);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [ClientEvent::Diagnostics { .. }]
        ));

        drop(session);
        assert_eq!(drain(&mut rx), vec![ClientEvent::ClientGone]);
    }

    #[test]
    fn test_drop_tells_subscribers_client_gone() {
        let (mut session, _peer) = ready();
        let (_buf, doc) = buffer("");
        session.add_document(&doc, "file:///a.c", "c");
        let (sub, mut rx) = Subscriber::channel();
        session.register(&doc, &sub);
        drop(session);
        assert_eq!(drain(&mut rx), vec![ClientEvent::ClientGone]);
    }

    #[test]
    fn test_position_codec_used_for_requests() {
        let doc = TextBuffer::new("a😀b\n");
        assert_eq!(position::to_lsp(&doc, 5), Position::new(0, 3));
        assert_eq!(doc.length(), 7);
    }
}
