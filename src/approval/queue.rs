//! Approval Queue — in-memory FIFO of pending requests, with pub/sub
//! fan-out to UI subscribers and a one-shot response channel per request.
//!
//! The queue owns request lifetimes end to end: `enqueue` assigns an id
//! and a channel, `resolve` is the only way to complete it. No other
//! component may close a response channel directly.

use crate::approval::types::{Kind, PendingRequest, Resolution};
use crate::error::GuardianError;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

/// Event published to `GET /events` subscribers.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    Added(PendingRequest),
    Removed(String),
}

struct Entry {
    request: PendingRequest,
    responder: Option<oneshot::Sender<Resolution>>,
}

pub struct ApprovalQueue {
    entries: Mutex<HashMap<String, Entry>>,
    order: Mutex<Vec<String>>,
    events: broadcast::Sender<QueueEvent>,
}

impl Default for ApprovalQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalQueue {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(256);
        Self {
            entries: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Subscribe to queue change events. Slow consumers drop events (lagged
    /// broadcast receivers) rather than block the publisher — the UI
    /// re-fetches `/pending` on reconnect to recover.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Enqueue a request, returning its id and the receiving half of its
    /// one-shot response channel.
    pub fn enqueue(
        &self,
        kind: Kind,
        project: String,
        container: String,
        target: String,
    ) -> (String, oneshot::Receiver<Resolution>) {
        let id = Uuid::new_v4().to_string();
        let request = PendingRequest {
            id: id.clone(),
            kind,
            project,
            container,
            target,
            created_at: chrono::Utc::now(),
        };
        let (tx, rx) = oneshot::channel();

        self.entries.lock().unwrap().insert(
            id.clone(),
            Entry {
                request: request.clone(),
                responder: Some(tx),
            },
        );
        self.order.lock().unwrap().push(id.clone());

        let _ = self.events.send(QueueEvent::Added(request));
        (id, rx)
    }

    /// Resolve a pending request. Only the first resolution for an id takes
    /// effect; subsequent calls return `false` (caller maps this to 404).
    /// If the waiter already hung up, the send is simply dropped.
    pub fn resolve(&self, id: &str, resolution: Resolution) -> bool {
        let entry = {
            let mut entries = self.entries.lock().unwrap();
            entries.remove(id)
        };
        let Some(mut entry) = entry else {
            return false;
        };
        self.order.lock().unwrap().retain(|x| x != id);

        if let Some(tx) = entry.responder.take() {
            let _ = tx.send(resolution);
        }
        let _ = self.events.send(QueueEvent::Removed(id.to_string()));
        true
    }

    /// Snapshot of pending requests in enqueue order, for `GET /pending`
    /// and for the initial SSE snapshot on connect.
    pub fn snapshot(&self) -> Vec<PendingRequest> {
        let order = self.order.lock().unwrap();
        let entries = self.entries.lock().unwrap();
        order
            .iter()
            .filter_map(|id| entries.get(id).map(|e| e.request.clone()))
            .collect()
    }

    /// Force-resolve every pending request as denied (Guardian shutdown).
    pub fn close(&self) {
        let ids: Vec<String> = self.order.lock().unwrap().clone();
        for id in ids {
            self.resolve(&id, Resolution::Denied {
                reason: Some(GuardianError::QueueClosed.to_string()),
                scope: None,
                wildcard: false,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_enqueue_resolve_delivers_once() {
        let queue = ApprovalQueue::new();
        let (id, rx) = queue.enqueue(Kind::Domain, "acme".into(), "c1".into(), "example.com".into());

        assert_eq!(queue.snapshot().len(), 1);
        assert!(queue.resolve(&id, Resolution::Approved {
            scope: crate::decision::Scope::Session,
            wildcard: false,
            user: None,
        }));
        // second resolution for the same id is a no-op
        assert!(!queue.resolve(&id, Resolution::TimedOut));

        let resolution = rx.await.unwrap();
        assert!(matches!(resolution, Resolution::Approved { .. }));
        assert!(queue.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_returns_false() {
        let queue = ApprovalQueue::new();
        assert!(!queue.resolve("does-not-exist", Resolution::TimedOut));
    }

    #[tokio::test]
    async fn test_dropped_waiter_discards_silently() {
        let queue = ApprovalQueue::new();
        let (id, rx) = queue.enqueue(Kind::Command, "acme".into(), "c1".into(), "git status".into());
        drop(rx);
        // resolving after the waiter hung up must not panic
        assert!(queue.resolve(&id, Resolution::Denied { reason: None, scope: None, wildcard: false }));
    }

    #[tokio::test]
    async fn test_close_denies_all_pending() {
        let queue = ApprovalQueue::new();
        let (_id1, rx1) = queue.enqueue(Kind::Domain, "acme".into(), "c1".into(), "a.com".into());
        let (_id2, rx2) = queue.enqueue(Kind::Domain, "acme".into(), "c1".into(), "b.com".into());
        queue.close();
        assert!(matches!(rx1.await.unwrap(), Resolution::Denied { .. }));
        assert!(matches!(rx2.await.unwrap(), Resolution::Denied { .. }));
    }
}
