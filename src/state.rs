//! Dashboard state and the capabilities that may change it.
//!
//! There is exactly one [`DashboardState`] per process. [`channel`] hands out a
//! [`SessionWriter`] (principal, identity readiness), a [`FeedWriter`] (records,
//! alert feed, loading) and a cloneable [`StateReader`]. Both writers may set
//! the shared `error` message; the last write wins. Every mutation is published
//! as a single update, so readers never see records and alerts from different
//! snapshots.

use std::sync::Arc;

use tokio::sync::watch;

use crate::models::{DerivedAlert, HealthRecord};
use crate::reconcile::Reconciled;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DashboardState {
    pub principal: Option<String>,
    pub identity_resolved: bool,
    pub records: Vec<HealthRecord>,
    pub alerts: Vec<DerivedAlert>,
    pub loading: bool,
    pub error: Option<String>,
}

pub fn channel() -> (SessionWriter, FeedWriter, StateReader) {
    let (tx, rx) = watch::channel(DashboardState::default());
    let tx = Arc::new(tx);
    (
        SessionWriter { tx: Arc::clone(&tx) },
        FeedWriter { tx },
        StateReader { rx },
    )
}

#[derive(Debug)]
pub struct SessionWriter {
    tx: Arc<watch::Sender<DashboardState>>,
}

impl SessionWriter {
    pub fn resolve(&self, principal: Option<String>) {
        self.tx.send_modify(|state| {
            state.principal = principal;
            state.identity_resolved = true;
        });
    }

    /// Identity failed: show the message and let the dashboard proceed degraded.
    pub fn fail(&self, message: String) {
        self.tx.send_modify(|state| {
            state.error = Some(message);
            state.identity_resolved = true;
        });
    }
}

#[derive(Debug)]
pub struct FeedWriter {
    tx: Arc<watch::Sender<DashboardState>>,
}

impl FeedWriter {
    pub fn begin_loading(&self) {
        self.tx.send_modify(|state| {
            state.loading = true;
            state.error = None;
        });
    }

    pub fn replace(&self, reconciled: Reconciled) {
        self.tx.send_modify(|state| {
            state.records = reconciled.records;
            state.alerts = reconciled.alerts;
            state.loading = false;
        });
    }

    /// Keeps the last reconciled records and alerts.
    pub fn fail(&self, message: String) {
        self.tx.send_modify(|state| {
            state.error = Some(message);
            state.loading = false;
        });
    }

    pub fn clear(&self) {
        self.tx.send_modify(|state| {
            state.records = Vec::new();
            state.alerts = Vec::new();
            state.loading = false;
            state.error = None;
        });
    }
}

/// Read-only view for presentation code.
#[derive(Debug, Clone)]
pub struct StateReader {
    rx: watch::Receiver<DashboardState>,
}

impl StateReader {
    pub fn current(&self) -> DashboardState {
        self.rx.borrow().clone()
    }

    /// Waits for the next published change. Returns `false` once every writer is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Like [`StateReader::current`], and marks the value as seen.
    pub fn latest(&mut self) -> DashboardState {
        self.rx.borrow_and_update().clone()
    }
}
