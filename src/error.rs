//! # Update Errors
//!
//! Failure taxonomy for a single wallpaper update attempt. Every variant is
//! caught by the orchestrator and turned into an error status, so nothing
//! here ever reaches the scheduler.

use thiserror::Error;

/// Errors raised while fetching, downloading, or caching an image.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Transport failure or non-success HTTP status on either request.
    #[error("network error: {0}")]
    Network(String),

    /// The image archive response could not be decoded.
    #[error("malformed response: {0}")]
    Parse(String),

    /// Directory or file create/write/delete failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UpdateError>;
