//! Fan-out of server events to host subscribers.
//!
//! Pushes (diagnostics, file status) reach every subscriber registered on a
//! document. Responses reach the one subscriber registered for the request
//! id, once.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;

use crate::registry::DocumentHandle;
use crate::types::{ClientEvent, RequestId};

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Sending half of a subscriber's event channel.
///
/// The engine only holds clones of this; the host owns the receiver and
/// must [`unregister`](crate::Session::unregister) before dropping it.
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: SubscriberId,
    tx: mpsc::UnboundedSender<ClientEvent>,
}

impl Subscriber {
    /// A new subscriber and the receiver its events arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = SubscriberId(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed));
        (Self { id, tx }, rx)
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    fn send(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!(subscriber = self.id.0, "Subscriber receiver dropped");
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Notifier {
    by_document: HashMap<DocumentHandle, Vec<Subscriber>>,
    by_request: HashMap<RequestId, Subscriber>,
}

impl Notifier {
    pub fn register(&mut self, doc: &DocumentHandle, subscriber: &Subscriber) {
        self.by_document
            .entry(doc.clone())
            .or_default()
            .push(subscriber.clone());
    }

    /// Remove `subscriber` from every document and every outstanding
    /// request.
    pub fn unregister(&mut self, subscriber: SubscriberId) {
        self.by_document.retain(|_, subs| {
            subs.retain(|s| s.id != subscriber);
            !subs.is_empty()
        });
        self.by_request.retain(|_, s| s.id != subscriber);
    }

    pub fn register_request(&mut self, id: RequestId, subscriber: &Subscriber) {
        self.by_request.insert(id, subscriber.clone());
    }

    /// Send `event` to each subscriber of `doc`, in registration order.
    pub fn deliver_push(&self, doc: &DocumentHandle, event: &ClientEvent) {
        let Some(subscribers) = self.by_document.get(doc) else {
            return;
        };
        for subscriber in subscribers {
            subscriber.send(event.clone());
        }
    }

    /// Send `event` to the subscriber of request `id`, if any. Returns
    /// whether someone received it.
    pub fn deliver_response(&mut self, id: RequestId, event: ClientEvent) -> bool {
        match self.by_request.remove(&id) {
            Some(subscriber) => {
                subscriber.send(event);
                true
            }
            None => {
                tracing::trace!(%id, "No subscriber for response");
                false
            }
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        let mut told = HashSet::new();
        let everyone = self
            .by_document
            .values()
            .flatten()
            .chain(self.by_request.values());
        for subscriber in everyone {
            if told.insert(subscriber.id) {
                subscriber.send(ClientEvent::ClientGone);
            }
        }
        self.by_document.clear();
        self.by_request.clear();
    }
}
