//! Runtime configuration, resolved once at startup and passed into components.

use anyhow::Context;

pub const DEFAULT_APP_ID: &str = "default_app_id_for_local";
pub const DEFAULT_PREDICT_URL: &str = "http://localhost:5000/predict";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub app_id: String,
    pub predict_url: String,
    database_url: Option<String>,
}

impl AppConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            app_id: non_empty("HERD_APP_ID").unwrap_or_else(|| DEFAULT_APP_ID.to_string()),
            predict_url: non_empty("HERD_PREDICT_URL")
                .unwrap_or_else(|| DEFAULT_PREDICT_URL.to_string()),
            database_url: non_empty("DATABASE_URL"),
        }
    }

    pub fn database_url(&self) -> anyhow::Result<&str> {
        self.database_url
            .as_deref()
            .context("DATABASE_URL must be set to the herd document store (Postgres)")
    }
}
