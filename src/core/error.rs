use thiserror::Error;

pub type MonitorResult<T> = std::result::Result<T, MonitorError>;

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Missing eBay credentials")]
    MissingCredentials,

    #[error("Failed to get eBay access token: {0}")]
    Token(String),

    #[error("eBay API request failed: {status} - {body}")]
    Api { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Snapshot was modified by another cycle (expected version {expected})")]
    VersionConflict { expected: i64 },

    #[error("Notification failed: {0}")]
    Notification(String),

    #[error("No hot products found")]
    NoHotProducts,
}

impl MonitorError {
    /// Errors raised before any stored state is touched.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            MonitorError::MissingCredentials
                | MonitorError::Token(_)
                | MonitorError::Api { .. }
                | MonitorError::Http(_)
        )
    }
}
