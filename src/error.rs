//! Error types for the digest's external collaborators.
//!
//! None of these escape the run loop: the orchestrator turns each failure into
//! a degraded unit (empty topic, default citation counts) and a log line.

/// Errors from the paper source, citation source and newsletter clients.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// Transport error (connection, DNS, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// Malformed Atom feed.
    #[error("Failed to parse feed: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Malformed JSON payload.
    #[error("Failed to parse response: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    #[must_use]
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status { status, body: body.into() }
    }
}

/// Errors reading or writing the seen-papers ledger.
#[derive(thiserror::Error, Debug)]
pub enum LedgerError {
    #[error("Ledger I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ledger is not a JSON array of fingerprints: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors writing the static site or feed.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Render I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feed serialization error: {0}")]
    Xml(#[from] quick_xml::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
