use crate::error::SubscriptionError;
use crate::reconcile;
use crate::state::FeedWriter;
use crate::store::{CollectionQuery, DocumentStore, StoreEvent, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// An event from the subscription that was open when it was received, tagged
/// with that subscription's generation.
#[derive(Debug)]
pub struct Delivery {
    pub generation: u64,
    pub event: StoreEvent,
}

#[derive(Debug)]
struct Active {
    generation: u64,
    principal: String,
    subscription: Subscription,
}

/// Keeps at most one live subscription, following the principal in effect.
/// Sole owner of `records`, `alerts` and `loading` in the dashboard state.
pub struct SubscriptionManager<S> {
    store: S,
    app_id: String,
    feed: FeedWriter,
    link: LinkState,
    generation: u64,
    active: Option<Active>,
}

impl<S: DocumentStore> SubscriptionManager<S> {
    pub fn new(store: S, app_id: impl Into<String>, feed: FeedWriter) -> Self {
        Self {
            store,
            app_id: app_id.into(),
            feed,
            link: LinkState::Closed,
            generation: 0,
            active: None,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.link
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn principal(&self) -> Option<&str> {
        self.active.as_ref().map(|active| active.principal.as_str())
    }

    /// Closes whatever is open, then follows the new principal. The previous
    /// subscription is released even when opening the next one fails.
    pub fn on_principal_change(&mut self, principal: Option<&str>) -> Result<(), SubscriptionError> {
        self.close();

        let Some(principal) = principal else {
            tracing::info!("no principal; clearing records and alerts");
            self.feed.clear();
            return Ok(());
        };

        self.link = LinkState::Opening;
        self.generation += 1;
        self.feed.begin_loading();

        let query = CollectionQuery::for_principal(&self.app_id, principal);
        tracing::info!(
            path = %query.path,
            generation = self.generation,
            "opening collection subscription"
        );

        match self.store.subscribe(query) {
            Ok(subscription) => {
                self.active = Some(Active {
                    generation: self.generation,
                    principal: principal.to_string(),
                    subscription,
                });
                self.link = LinkState::Open;
                Ok(())
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to open collection subscription");
                self.link = LinkState::Closed;
                self.feed.fail(format!("Failed to load data: {err}"));
                Err(err)
            }
        }
    }

    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            self.link = LinkState::Closing;
            tracing::info!(
                path = active.subscription.path(),
                generation = active.generation,
                "closing collection subscription"
            );
            active.subscription.close();
        }
        self.link = LinkState::Closed;
    }

    /// Waits for the open subscription's next event. Pends forever while
    /// closed, which lets callers `select!` on it unconditionally.
    pub async fn next_delivery(&mut self) -> Delivery {
        loop {
            let Some(active) = self.active.as_mut() else {
                return std::future::pending().await;
            };

            match active.subscription.next().await {
                Some(event) => {
                    return Delivery {
                        generation: active.generation,
                        event,
                    }
                }
                None => {
                    tracing::warn!(
                        path = active.subscription.path(),
                        "store ended the subscription"
                    );
                    self.close();
                }
            }
        }
    }

    /// Applies a delivery to the dashboard state. Deliveries from a superseded
    /// subscription are dropped; returns whether the state changed.
    pub fn apply(&mut self, delivery: Delivery) -> bool {
        let current = self
            .active
            .as_ref()
            .map(|active| active.generation)
            .filter(|generation| *generation == delivery.generation);
        if current.is_none() {
            tracing::debug!(
                generation = delivery.generation,
                "dropping delivery from a closed subscription"
            );
            return false;
        }

        match delivery.event {
            StoreEvent::Snapshot(documents) => {
                self.feed.replace(reconcile::reconcile(&documents));
            }
            StoreEvent::Error(err) => {
                tracing::error!(error = %err, "collection subscription failed");
                self.feed.fail(format!("Failed to load data: {err}"));
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::{MemoryStore, StoreOp};
    use crate::state::{self, StateReader};
    use crate::store::collection_path;
    use serde_json::json;

    const APP: &str = "test-app";

    fn manager() -> (SubscriptionManager<MemoryStore>, MemoryStore, StateReader) {
        let store = MemoryStore::new();
        let (_session, feed, reader) = state::channel();
        (
            SubscriptionManager::new(store.clone(), APP, feed),
            store,
            reader,
        )
    }

    async fn pump(manager: &mut SubscriptionManager<MemoryStore>) {
        let delivery = manager.next_delivery().await;
        assert!(manager.apply(delivery));
    }

    fn record_ids(reader: &StateReader) -> Vec<String> {
        reader.current().records.into_iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn records_mirror_latest_snapshot() {
        let (mut manager, store, reader) = manager();
        let path = collection_path(APP, "alice");
        store.put(&path, "cow-1", json!({"timestamp": 10}));

        manager.on_principal_change(Some("alice")).unwrap();
        assert!(reader.current().loading);
        assert_eq!(manager.link_state(), LinkState::Open);
        pump(&mut manager).await;
        assert_eq!(record_ids(&reader), vec!["cow-1"]);
        assert!(!reader.current().loading);

        store.put(&path, "cow-2", json!({"timestamp": 20}));
        pump(&mut manager).await;
        assert_eq!(record_ids(&reader), vec!["cow-2", "cow-1"]);
    }

    #[tokio::test]
    async fn error_after_load_keeps_data() {
        let (mut manager, store, reader) = manager();
        let path = collection_path(APP, "alice");
        store.put(
            &path,
            "cow-1",
            json!({"timestamp": 10, "alerts": [{"severity": "High", "message": "m1"}]}),
        );
        manager.on_principal_change(Some("alice")).unwrap();
        pump(&mut manager).await;
        let before = reader.current();

        store.fail(&path, "permission revoked");
        pump(&mut manager).await;

        let after = reader.current();
        assert_eq!(
            after.error.as_deref(),
            Some("Failed to load data: transport error: permission revoked")
        );
        assert!(!after.loading);
        assert_eq!(after.records, before.records);
        assert_eq!(after.alerts, before.alerts);
    }

    #[tokio::test]
    async fn switching_principal_closes_before_opening() {
        let (mut manager, store, reader) = manager();
        let path_a = collection_path(APP, "alice");
        let path_b = collection_path(APP, "bob");
        store.put(&path_a, "a-cow", json!({"timestamp": 10}));
        store.put(&path_b, "b-cow", json!({"timestamp": 10}));

        manager.on_principal_change(Some("alice")).unwrap();
        pump(&mut manager).await;
        store.put(&path_a, "late-cow", json!({"timestamp": 99}));
        let stale = manager.next_delivery().await;

        manager.on_principal_change(Some("bob")).unwrap();
        assert_eq!(
            store.ops(),
            vec![
                StoreOp::Opened(path_a.clone()),
                StoreOp::Closed(path_a.clone()),
                StoreOp::Opened(path_b.clone()),
            ]
        );
        assert_eq!(store.open_listeners(), 1);

        assert!(!manager.apply(stale));
        pump(&mut manager).await;
        assert_eq!(record_ids(&reader), vec!["b-cow"]);
        assert_eq!(manager.principal(), Some("bob"));
    }

    #[tokio::test]
    async fn logout_clears_state_and_subscription() {
        let (mut manager, store, reader) = manager();
        let path = collection_path(APP, "alice");
        for n in 0..25 {
            store.put(
                &path,
                &format!("cow-{n}"),
                json!({"timestamp": n, "alerts": [{"severity": "Low", "message": "x"}]}),
            );
        }
        manager.on_principal_change(Some("alice")).unwrap();
        pump(&mut manager).await;
        assert_eq!(reader.current().records.len(), 25);

        manager.on_principal_change(None).unwrap();
        let current = reader.current();
        assert!(current.records.is_empty());
        assert!(current.alerts.is_empty());
        assert!(!current.loading);
        assert_eq!(store.open_listeners(), 0);
        assert_eq!(manager.link_state(), LinkState::Closed);
    }

    #[tokio::test]
    async fn failed_open_still_releases_previous() {
        let (mut manager, store, reader) = manager();
        manager.on_principal_change(Some("alice")).unwrap();
        pump(&mut manager).await;

        store.refuse_subscriptions(Some("no access"));
        let err = manager.on_principal_change(Some("bob")).unwrap_err();
        assert!(matches!(err, SubscriptionError::PermissionDenied(_)));
        assert_eq!(store.open_listeners(), 0);
        assert_eq!(manager.link_state(), LinkState::Closed);
        let current = reader.current();
        assert!(!current.loading);
        assert_eq!(
            current.error.as_deref(),
            Some("Failed to load data: permission denied: no access")
        );
    }

    #[tokio::test]
    async fn generations_increase_per_open() {
        let (mut manager, _store, _reader) = manager();
        manager.on_principal_change(Some("alice")).unwrap();
        manager.on_principal_change(Some("alice")).unwrap();
        assert_eq!(manager.generation(), 2);
    }
}
