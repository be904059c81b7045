//! Error types for the glue layer.
//!
//! Transport faults are normally reported as connection state on the wire
//! (`ComWire::connected`) rather than as errors. The variants here cover the
//! places where a caller does get a `Result`: spawning, answering requests,
//! decoding payloads and proxy bookkeeping.

use thiserror::Error;

/// Main error type for the glue layer.
#[derive(Debug, Error)]
pub enum GlueError {
    // Wire errors
    #[error("Wire disconnected: {ident}")]
    Disconnected { ident: String },

    #[error("Framing error on {ident}: {message}")]
    Framing { ident: String, message: String },

    #[error("Unknown request id {request} on {ident}")]
    UnknownRequest { ident: String, request: u32 },

    #[error("Message too large: {len} bytes (limit {limit})")]
    MessageTooLarge { len: usize, limit: usize },

    // Codec errors
    #[error("Codec error: {message}")]
    Codec { message: String },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Process errors
    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    // Glue errors
    #[error("Invalid proxy: {0}")]
    InvalidProxy(u64),

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // System errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("System call failed: {0}")]
    Nix(#[from] nix::errno::Errno),
}

/// Result type alias using GlueError.
pub type Result<T> = std::result::Result<T, GlueError>;

impl From<std::io::Error> for GlueError {
    fn from(err: std::io::Error) -> Self {
        GlueError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for GlueError {
    fn from(err: serde_json::Error) -> Self {
        GlueError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl GlueError {
    /// Create a codec error from any displayable message.
    pub fn codec(message: impl Into<String>) -> Self {
        GlueError::Codec {
            message: message.into(),
        }
    }

    /// Whether the error originates from the byte transport rather than
    /// from the content of a message.
    pub fn is_transport(&self) -> bool {
        match self {
            GlueError::Disconnected { .. }
            | GlueError::Framing { .. }
            | GlueError::MessageTooLarge { .. }
            | GlueError::Io { .. } => true,
            GlueError::Nix(_) => true,
            _ => false,
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            GlueError::Io {
                source: Some(err), ..
            } => matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            GlueError::Nix(errno) => {
                matches!(errno, nix::errno::Errno::EINTR | nix::errno::Errno::EAGAIN)
            }
            _ => false,
        }
    }
}
