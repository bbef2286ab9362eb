//! Error taxonomy.
//!
//! Transient venue errors are retried locally with backoff and never
//! surface past the loop that hit them. Venue rejections terminate the
//! affected order only. Signer failures and non-transient venue errors
//! unwind to the orchestrator, which maps them to an exit code.

use thiserror::Error;

/// Errors returned by the venue REST/WebSocket boundary.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("venue transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("venue upstream error (status {status})")]
    Upstream { status: u16 },

    #[error("venue rejected request (status {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("malformed venue payload: {0}")]
    Malformed(String),
}

impl VenueError {
    /// Whether a retry with backoff is appropriate.
    ///
    /// 5xx, timeouts and connection failures are transient; a malformed
    /// payload is treated the same way (a glitched frame, not a reason
    /// to stop quoting). 4xx rejections are permanent.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            VenueError::Transport(_) | VenueError::Upstream { .. } | VenueError::Malformed(_)
        )
    }
}

/// Errors from the order signer.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("signing failed: {0}")]
    Signing(String),
}

/// Startup configuration errors (exit code 1).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Fatal error carried out of the trading loop to the orchestrator.
#[derive(Debug, Error)]
pub enum MakerError {
    #[error(transparent)]
    Venue(#[from] VenueError),

    #[error(transparent)]
    Signer(#[from] SignerError),
}

impl MakerError {
    pub fn is_transient(&self) -> bool {
        match self {
            MakerError::Venue(e) => e.is_transient(),
            MakerError::Signer(_) => false,
        }
    }
}
