//! Editor-side Language Server Protocol client.
//!
//! A [`Session`] runs one language server as a child process and keeps the
//! host's documents in sync with it: `didOpen`/`didChange`/`didClose`,
//! document symbol, hover, completion and signature help requests, pushed
//! diagnostics and file status, and clangd-style semantic highlighting
//! painted back onto the host document through [`TextDocument`].
//!
//! The session is single-threaded. The host calls it from its own thread
//! and drives incoming traffic with [`Session::poll_events`] or
//! [`Session::pump`]; results arrive on [`Subscriber`] channels as
//! [`ClientEvent`]s.

pub mod buffer;
pub mod capabilities;
pub mod codec;
pub mod config;
pub mod highlighting;
pub mod position;
pub mod types;

pub(crate) mod dispatcher;
pub(crate) mod protocol;
pub(crate) mod transport;

mod notifier;
mod registry;
mod session;

pub use buffer::TextBuffer;
pub use capabilities::{ServerCapabilities, TextDocumentSyncKind};
pub use config::{ClientConfig, ConfigError, LspConfig, MarkupKind, ServerConfig};
pub use notifier::{Subscriber, SubscriberId};
pub use position::{Position, Range, TextDocument};
pub use protocol::{PathToUriError, path_to_file_uri};
pub use registry::{DocumentHandle, DocumentState};
pub use session::{DEFAULT_DISABLED_LINE_STYLE, DocumentEvent, Session};
pub use types::{
    ClientEvent, CompletionItem, CompletionList, Diagnostic, DiagnosticSeverity, FileStatus,
    Hover, Location, MarkupContent, RequestId, ResponseError, ServerState, SignatureHelp,
    SymbolInformation,
};
