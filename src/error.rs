//! Error types for pnl_dashboard
//!
//! Fetch errors never reach the rendering layer: they are logged at the fetch
//! boundary and turned into an absent result. Validation errors come from
//! terminal input and are shown to the user.

use thiserror::Error;

/// Everything that can go wrong while talking to the analytics backend.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid API base URL '{url}': {message}")]
    InvalidBaseUrl { url: String, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Backend reported status {status}: {message}")]
    Backend { status: i64, message: String },
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(e: serde_json::Error) -> Self {
        FetchError::Decode(e.to_string())
    }
}

/// Validation errors for user input in the TUI.
#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Date is required")]
    DateRequired,

    #[error("Invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("Unknown P/L type: {0}")]
    UnknownPnlType(String),
}
