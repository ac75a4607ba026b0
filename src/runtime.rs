use std::future::Future;

use tokio::sync::mpsc;

use crate::session::{IdentityEvent, SessionGate};
use crate::state::{self, StateReader};
use crate::store::DocumentStore;
use crate::subscription::SubscriptionManager;

/// Wires the session gate to the subscription manager. All handlers run on the
/// task that drives [`Dashboard::run`], one at a time.
pub struct Dashboard<S> {
    gate: SessionGate,
    subscriptions: SubscriptionManager<S>,
}

impl<S: DocumentStore> Dashboard<S> {
    pub fn new(store: S, app_id: impl Into<String>) -> (Self, StateReader) {
        let (session, feed, reader) = state::channel();
        (
            Self {
                gate: SessionGate::new(session),
                subscriptions: SubscriptionManager::new(store, app_id, feed),
            },
            reader,
        )
    }

    pub fn handle_identity(&mut self, event: IdentityEvent) {
        match event {
            IdentityEvent::Changed(principal) => {
                if self.gate.on_identity_change(principal) {
                    // Open failures are already published to the dashboard state.
                    let _ = self.subscriptions.on_principal_change(self.gate.principal());
                }
            }
            IdentityEvent::Failed(err) => self.gate.on_auth_failure(&err),
        }
    }

    /// Runs until `shutdown` resolves or the identity provider goes away, then
    /// releases the live subscription.
    pub async fn run(
        mut self,
        mut identity: mpsc::UnboundedReceiver<IdentityEvent>,
        shutdown: impl Future<Output = ()>,
    ) {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::info!("dashboard shutting down");
                    break;
                }
                event = identity.recv() => match event {
                    Some(event) => self.handle_identity(event),
                    None => {
                        tracing::info!("identity provider closed");
                        break;
                    }
                },
                delivery = self.subscriptions.next_delivery() => {
                    self.subscriptions.apply(delivery);
                }
            }
        }

        self.subscriptions.close();
    }
}
