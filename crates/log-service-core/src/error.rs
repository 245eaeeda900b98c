//! Error types for the log service.
//!
//! One enum covers store, facade and RPC call failures. Each variant maps to a
//! JSON-RPC error code so a failing call can be reported to its own caller.

use std::time::Duration;
use thiserror::Error;

/// Main error type for the log service core.
#[derive(Debug, Error)]
pub enum LogServiceError {
    // Store errors
    #[error("Store unavailable at {location}: {message}")]
    StoreUnavailable { location: String, message: String },

    #[error("Store authentication failed for principal {principal}")]
    StoreAuth { principal: String },

    #[error("Store connection has been released")]
    StoreDisconnected,

    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Data errors
    #[error("Log entry not found: {id}")]
    EntryNotFound { id: String },

    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Transport errors
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    #[error("Frame of {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    // Call errors
    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Method already registered: {method}")]
    DuplicateMethod { method: String },

    #[error("Invalid params: {message}")]
    InvalidParams { message: String },

    #[error("Remote error {code}: {message}")]
    Remote { code: i32, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for log service operations.
pub type Result<T> = std::result::Result<T, LogServiceError>;

impl From<std::io::Error> for LogServiceError {
    fn from(err: std::io::Error) -> Self {
        LogServiceError::Io {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LogServiceError {
    fn from(err: serde_json::Error) -> Self {
        LogServiceError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for LogServiceError {
    fn from(err: rusqlite::Error) -> Self {
        LogServiceError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl LogServiceError {
    /// A stored record whose body no longer decodes.
    pub fn corrupt_record(id: &str, err: impl std::fmt::Display) -> Self {
        LogServiceError::Database {
            message: format!("Stored record {} is corrupt: {}", id, err),
            source: None,
        }
    }

    /// Convert to a JSON-RPC error code.
    ///
    /// Malformed calls (-32700, -32600) are answered by the server before
    /// dispatch, so a `Json` error here is an internal encoding failure.
    ///
    /// Standard codes:
    /// - -32601: Method not found
    /// - -32602: Invalid params
    /// - -32603: Internal error
    ///
    /// Application codes:
    /// - -32000: Store unavailable or released
    /// - -32002: Log entry not found
    /// - -32005: Validation error
    pub fn to_rpc_error_code(&self) -> i32 {
        match self {
            LogServiceError::MethodNotFound { .. } => -32601,
            LogServiceError::InvalidParams { .. } => -32602,

            LogServiceError::StoreUnavailable { .. }
            | LogServiceError::StoreDisconnected
            | LogServiceError::Timeout(_) => -32000,

            LogServiceError::EntryNotFound { .. } => -32002,

            LogServiceError::Validation { .. } | LogServiceError::FrameTooLarge { .. } => -32005,

            LogServiceError::Remote { code, .. } => *code,

            _ => -32603,
        }
    }

    /// Whether the store behind this error is unreachable rather than the call being bad.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            LogServiceError::StoreUnavailable { .. }
                | LogServiceError::StoreDisconnected
                | LogServiceError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LogServiceError::EntryNotFound { id: "abc".into() };
        assert_eq!(err.to_string(), "Log entry not found: abc");
    }

    #[test]
    fn test_rpc_error_codes() {
        assert_eq!(
            LogServiceError::MethodNotFound {
                method: "nope".into()
            }
            .to_rpc_error_code(),
            -32601
        );
        assert_eq!(LogServiceError::StoreDisconnected.to_rpc_error_code(), -32000);
        assert_eq!(
            LogServiceError::Other("boom".into()).to_rpc_error_code(),
            -32603
        );
        assert_eq!(
            LogServiceError::corrupt_record("bad", "missing field `name`").to_rpc_error_code(),
            -32603
        );
        let encode = serde_json::from_str::<u8>("x").unwrap_err();
        assert_eq!(LogServiceError::from(encode).to_rpc_error_code(), -32603);
        assert_eq!(
            LogServiceError::Remote {
                code: -32002,
                message: "gone".into()
            }
            .to_rpc_error_code(),
            -32002
        );
    }

    #[test]
    fn test_unavailable_errors() {
        assert!(LogServiceError::StoreDisconnected.is_unavailable());
        assert!(LogServiceError::Timeout(Duration::from_secs(1)).is_unavailable());
        assert!(!LogServiceError::EntryNotFound { id: "x".into() }.is_unavailable());
    }
}
