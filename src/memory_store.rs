//! In-process document store used by the test suite.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::error::SubscriptionError;
use crate::models::Document;
use crate::store::{CollectionQuery, DocumentStore, StoreEvent, Subscription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    Opened(String),
    Closed(String),
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Map<String, Value>>>,
    listeners: Vec<(u64, String, mpsc::UnboundedSender<StoreEvent>)>,
    next_listener: u64,
    ops: Vec<StoreOp>,
    refuse: Option<String>,
}

impl Inner {
    fn snapshot(&self, path: &str) -> Vec<Document> {
        let mut docs: Vec<Document> = self
            .collections
            .get(path)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default();
        // Newest first, undated last.
        docs.sort_by(|a, b| b.timestamp().cmp(&a.timestamp()));
        docs
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, path: &str, id: &str, fields: Value) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .collections
            .entry(path.to_string())
            .or_default()
            .insert(id.to_string(), fields.as_object().cloned().unwrap_or_default());
        let snapshot = inner.snapshot(path);
        for (_, listener_path, tx) in &inner.listeners {
            if listener_path == path {
                let _ = tx.send(StoreEvent::Snapshot(snapshot.clone()));
            }
        }
    }

    /// Pushes a transport failure to every live listener on `path`.
    pub fn fail(&self, path: &str, message: &str) {
        let inner = self.inner.lock().unwrap();
        for (_, listener_path, tx) in &inner.listeners {
            if listener_path == path {
                let _ = tx.send(StoreEvent::Error(SubscriptionError::Transport(
                    message.to_string(),
                )));
            }
        }
    }

    /// Makes the next `subscribe` calls fail until cleared.
    pub fn refuse_subscriptions(&self, reason: Option<&str>) {
        self.inner.lock().unwrap().refuse = reason.map(str::to_string);
    }

    pub fn open_listeners(&self) -> usize {
        self.inner.lock().unwrap().listeners.len()
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.inner.lock().unwrap().ops.clone()
    }
}

impl DocumentStore for MemoryStore {
    fn subscribe(&self, query: CollectionQuery) -> Result<Subscription, SubscriptionError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(reason) = inner.refuse.clone() {
            return Err(SubscriptionError::PermissionDenied(reason));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(StoreEvent::Snapshot(inner.snapshot(&query.path)));

        let listener = inner.next_listener;
        inner.next_listener += 1;
        inner.listeners.push((listener, query.path.clone(), tx));
        inner.ops.push(StoreOp::Opened(query.path.clone()));

        let shared = Arc::clone(&self.inner);
        let path = query.path.clone();
        Ok(Subscription::new(query.path, rx, move || {
            let mut inner = shared.lock().unwrap();
            inner.listeners.retain(|(id, _, _)| *id != listener);
            inner.ops.push(StoreOp::Closed(path));
        }))
    }
}
