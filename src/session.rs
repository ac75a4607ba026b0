use std::sync::Mutex;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::AuthError;
use crate::state::SessionWriter;

/// What the identity provider reports to the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityEvent {
    Changed(Option<String>),
    Failed(AuthError),
}

/// Local identity provider. Anonymous sign-in mints a fresh principal; token
/// sign-in adopts the given one. Every outcome is also reported as an
/// [`IdentityEvent`], starting with an initial "nobody signed in".
#[derive(Debug)]
pub struct LocalIdentity {
    events: mpsc::UnboundedSender<IdentityEvent>,
    current: Mutex<Option<String>>,
}

impl LocalIdentity {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<IdentityEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let _ = events.send(IdentityEvent::Changed(None));
        (
            Self {
                events,
                current: Mutex::new(None),
            },
            rx,
        )
    }

    pub fn sign_in_anonymous(&self) -> Result<String, AuthError> {
        let principal = format!("anon-{}", Uuid::new_v4().simple());
        self.adopt(principal.clone())?;
        Ok(principal)
    }

    pub fn sign_in_with_token(&self, token: &str) -> Result<String, AuthError> {
        let token = token.trim();
        if token.is_empty() || token.contains('/') {
            return Err(self.fail(AuthError::SignIn(format!("invalid sign-in token {token:?}"))));
        }
        self.adopt(token.to_string())?;
        Ok(token.to_string())
    }

    pub fn sign_out(&self) -> Result<(), AuthError> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| self.fail(AuthError::SignOut("identity state poisoned".to_string())))?;
        *current = None;
        tracing::info!("signed out");
        self.emit(IdentityEvent::Changed(None))
            .map_err(|_| AuthError::SignOut("dashboard is no longer listening".to_string()))
    }

    pub fn current(&self) -> Option<String> {
        self.current.lock().ok().and_then(|current| current.clone())
    }

    fn adopt(&self, principal: String) -> Result<(), AuthError> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| self.fail(AuthError::SignIn("identity state poisoned".to_string())))?;
        *current = Some(principal.clone());
        tracing::info!(%principal, "signed in");
        self.emit(IdentityEvent::Changed(Some(principal)))
            .map_err(|_| AuthError::SignIn("dashboard is no longer listening".to_string()))
    }

    /// Reports the failure to the dashboard and hands it back to the caller.
    fn fail(&self, err: AuthError) -> AuthError {
        tracing::warn!(error = %err, "identity operation failed");
        let _ = self.events.send(IdentityEvent::Failed(err.clone()));
        err
    }

    fn emit(&self, event: IdentityEvent) -> Result<(), mpsc::error::SendError<IdentityEvent>> {
        self.events.send(event)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GatePhase {
    Unresolved,
    Resolved(Option<String>),
}

/// Sole owner of `principal` and `identity_resolved` in the dashboard state.
#[derive(Debug)]
pub struct SessionGate {
    phase: GatePhase,
    writer: SessionWriter,
}

impl SessionGate {
    pub fn new(writer: SessionWriter) -> Self {
        Self {
            phase: GatePhase::Unresolved,
            writer,
        }
    }

    pub fn principal(&self) -> Option<&str> {
        match &self.phase {
            GatePhase::Resolved(principal) => principal.as_deref(),
            GatePhase::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.phase, GatePhase::Resolved(_))
    }

    /// Applies a provider report. Returns `true` when the principal in effect
    /// changed, meaning the subscription has to follow.
    pub fn on_identity_change(&mut self, principal: Option<String>) -> bool {
        let next = GatePhase::Resolved(principal.clone());
        if self.phase == next {
            return false;
        }

        tracing::info!(
            from = ?self.phase,
            to = ?next,
            "identity transition"
        );
        self.phase = next;
        self.writer.resolve(principal);
        true
    }

    /// The principal stays as it was; the dashboard proceeds degraded.
    pub fn on_auth_failure(&mut self, err: &AuthError) {
        tracing::error!(error = %err, "identity resolution failed");
        if self.phase == GatePhase::Unresolved {
            self.phase = GatePhase::Resolved(None);
        }
        self.writer.fail(err.to_string());
    }
}
