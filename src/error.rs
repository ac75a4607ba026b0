use thiserror::Error;

/// Identity resolution failures. The rendered message is what the dashboard shows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Authentication error: {0}")]
    SignIn(String),
    #[error("Logout failed: {0}")]
    SignOut(String),
}

/// Failures opening or delivering on a live collection subscription.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Failures of a single prediction request. Never written to shared state.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("invalid feature vector (missing: {missing:?}, unexpected: {unexpected:?})")]
    Validation {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("prediction backend unreachable: {0}")]
    Network(#[source] reqwest::Error),
    #[error("prediction rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("prediction backend failed ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("could not decode prediction response: {0}")]
    Decode(#[source] reqwest::Error),
}
