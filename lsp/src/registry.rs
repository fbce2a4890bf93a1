//! Per-document synchronization state, keyed by document identity.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::highlighting::{LineSpan, LineTokens};
use crate::position::TextDocument;

/// Shared reference to a host document. Two handles are equal only when
/// they point at the same document object.
#[derive(Clone)]
pub struct DocumentHandle(Rc<dyn TextDocument>);

impl DocumentHandle {
    #[must_use]
    pub fn new(document: Rc<dyn TextDocument>) -> Self {
        Self(document)
    }

    #[must_use]
    pub fn document(&self) -> &dyn TextDocument {
        &*self.0
    }

    fn address(&self) -> *const () {
        Rc::as_ptr(&self.0).cast::<()>()
    }
}

impl<D: TextDocument + 'static> From<Rc<D>> for DocumentHandle {
    fn from(document: Rc<D>) -> Self {
        Self(document)
    }
}

impl PartialEq for DocumentHandle {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for DocumentHandle {}

impl Hash for DocumentHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl fmt::Debug for DocumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DocumentHandle").field(&self.address()).finish()
    }
}

/// What the server knows about one document.
#[derive(Debug)]
pub struct DocumentState {
    pub(crate) uri: String,
    pub(crate) language_id: String,
    pub(crate) open: bool,
    pub(crate) ref_count: usize,
    pub(crate) version: i32,
    pub(crate) highlighting: Vec<LineTokens>,
    pub(crate) pending_highlight: Option<LineSpan>,
    pub(crate) applying_highlight: bool,
}

impl DocumentState {
    fn new(uri: String, language_id: String) -> Self {
        Self {
            uri,
            language_id,
            open: false,
            ref_count: 1,
            version: 0,
            highlighting: Vec::new(),
            pending_highlight: None,
            applying_highlight: false,
        }
    }

    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    #[must_use]
    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    /// Whether the server has been sent `didOpen` for the current process.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Version of the last change sent to the server.
    #[must_use]
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Cached semantic highlighting, ordered by line.
    #[must_use]
    pub fn highlighting(&self) -> &[LineTokens] {
        &self.highlighting
    }
}

/// Outcome of dropping one reference to a document.
#[derive(Debug)]
pub(crate) enum Release {
    NotRegistered,
    /// Other views still hold the document.
    Retained,
    /// Last reference gone; the state has left the registry.
    Removed(DocumentState),
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    documents: HashMap<DocumentHandle, DocumentState>,
}

impl Registry {
    pub fn get(&self, doc: &DocumentHandle) -> Option<&DocumentState> {
        self.documents.get(doc)
    }

    pub fn get_mut(&mut self, doc: &DocumentHandle) -> Option<&mut DocumentState> {
        self.documents.get_mut(doc)
    }

    /// Register a view of `doc`. Returns `true` when the document is new.
    ///
    /// A repeat registration only bumps the reference count; the uri and
    /// language id of the first registration are kept.
    pub fn add(&mut self, doc: &DocumentHandle, uri: &str, language_id: &str) -> bool {
        if let Some(state) = self.documents.get_mut(doc) {
            state.ref_count += 1;
            if state.language_id != language_id {
                tracing::debug!(
                    uri = %state.uri,
                    kept = %state.language_id,
                    ignored = %language_id,
                    "Document re-registered under another language id"
                );
            }
            return false;
        }
        self.documents.insert(
            doc.clone(),
            DocumentState::new(uri.to_string(), language_id.to_string()),
        );
        true
    }

    pub fn release(&mut self, doc: &DocumentHandle) -> Release {
        let Some(state) = self.documents.get_mut(doc) else {
            return Release::NotRegistered;
        };
        state.ref_count -= 1;
        if state.ref_count > 0 {
            return Release::Retained;
        }
        match self.documents.remove(doc) {
            Some(state) => Release::Removed(state),
            None => Release::NotRegistered,
        }
    }

    /// Documents the server has not been told about yet.
    pub fn unopened(&self) -> Vec<DocumentHandle> {
        self.documents
            .iter()
            .filter(|(_, state)| !state.open)
            .map(|(doc, _)| doc.clone())
            .collect()
    }

    pub fn find_by_uri(&mut self, uri: &str) -> Option<(DocumentHandle, &mut DocumentState)> {
        self.documents
            .iter_mut()
            .find(|(_, state)| state.uri == uri)
            .map(|(doc, state)| (doc.clone(), state))
    }

    /// The server is gone; nothing is open any more.
    pub fn mark_all_closed(&mut self) {
        for state in self.documents.values_mut() {
            state.open = false;
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }
}
