use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum PodsyncError {
    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Version conflict on stream {stream_id}")]
    VersionConflict { stream_id: String },

    #[error("Stream {stream_id} is quarantined")]
    StreamPoisoned { stream_id: String },

    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    #[error("Command timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Service unavailable: {service}")]
    ServiceUnavailable { service: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

pub type Result<T> = std::result::Result<T, PodsyncError>;
