use tokio::sync::mpsc;

use crate::error::SubscriptionError;
use crate::models::Document;

pub fn collection_path(app_id: &str, principal: &str) -> String {
    format!("artifacts/{app_id}/users/{principal}/cattle_data")
}

/// A live query over one collection, newest `timestamp` first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionQuery {
    pub path: String,
}

impl CollectionQuery {
    pub fn for_principal(app_id: &str, principal: &str) -> Self {
        Self {
            path: collection_path(app_id, principal),
        }
    }
}

#[derive(Debug)]
pub enum StoreEvent {
    /// Every document currently matching the query, in query order.
    Snapshot(Vec<Document>),
    Error(SubscriptionError),
}

pub trait DocumentStore {
    fn subscribe(&self, query: CollectionQuery) -> Result<Subscription, SubscriptionError>;
}

/// Handle to an open subscription. Closing or dropping it releases the
/// store-side listener; no event is yielded afterwards.
pub struct Subscription {
    path: String,
    events: mpsc::UnboundedReceiver<StoreEvent>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        path: String,
        events: mpsc::UnboundedReceiver<StoreEvent>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            path,
            events,
            release: Some(Box::new(release)),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Next event in delivery order; `None` once the store stops delivering.
    pub async fn next(&mut self) -> Option<StoreEvent> {
        self.events.recv().await
    }

    pub fn close(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        self.events.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("released", &self.release.is_none())
            .finish()
    }
}
