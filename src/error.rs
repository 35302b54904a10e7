//! Error types for the node fleet operator
//!
//! Provides structured error types for all operator components including
//! the node lifecycle, load balancing, stats ingestion, and async consumers.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation failed for {entity}: {}", .errors.join("; "))]
    Validation { entity: String, errors: Vec<String> },

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    #[error("{system} call failed during {operation}: {reason}")]
    TransientInfra {
        system: String,
        operation: String,
        reason: String,
    },

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Timed out waiting for {operation} after {}s", .elapsed.as_secs())]
    Timeout { operation: String, elapsed: Duration },

    // =========================================================================
    // P2P Provider Errors
    // =========================================================================
    #[error("{operation} is not implemented for client {client}")]
    Unsupported { client: String, operation: String },

    #[error("No peer URL present in log stream for node {node_id}")]
    PeerUrlUnresolved { node_id: String },

    // =========================================================================
    // Messaging Errors
    // =========================================================================
    #[error("Undeliverable message on {subject}: {reason}")]
    MessageDelivery { subject: String, reason: String },

    #[error("Stats source does not support {mode} mode for chain {chain}")]
    SourceModeUnsupported { chain: String, mode: String },

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action a message consumer takes when a handler returns an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Negative-acknowledge; redeliver after the subject's deadline
    Nack,
    /// Negative-acknowledge with an explicit redelivery delay
    NackAfter(Duration),
    /// Acknowledge and drop; redelivery cannot succeed
    Drop,
}

impl Error {
    /// Determine how a consumer should dispose of the message that
    /// produced this error.
    pub fn action(&self) -> ErrorAction {
        match self {
            // Undecodable or structurally broken messages never recover
            Error::MessageDelivery { .. } | Error::JsonParse(_) => ErrorAction::Drop,

            // Fatal configuration and capability gaps never recover either
            Error::Configuration(_) | Error::Validation { .. } | Error::Unsupported { .. } => {
                ErrorAction::Drop
            }

            // Everything else, per-attempt deadline misses included, is
            // worth another delivery; handlers mark the entity failed
            // themselves once a deadline is terminal for it
            _ => ErrorAction::Nack,
        }
    }

    /// Check if this error should be retried by redelivery
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::Drop)
    }

    /// Check if this error is an explicit unimplemented-capability result
    pub fn is_unsupported(&self) -> bool {
        matches!(
            self,
            Error::Unsupported { .. } | Error::SourceModeUnsupported { .. }
        )
    }

    /// Shorthand for a transient infrastructure failure
    pub fn transient(system: &str, operation: &str, reason: impl Into<String>) -> Self {
        Error::TransientInfra {
            system: system.to_string(),
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an unimplemented P2P capability
    pub fn unsupported(client: &str, operation: &str) -> Self {
        Error::Unsupported {
            client: client.to_string(),
            operation: operation.to_string(),
        }
    }
}

/// Result type alias for the operator
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_actions() {
        let err = Error::transient("cloud", "create_target_group", "throttled");
        assert_eq!(err.action(), ErrorAction::Nack);
        assert!(err.is_retryable());

        let err = Error::Configuration("missing engine_id".into());
        assert_eq!(err.action(), ErrorAction::Drop);
        assert!(!err.is_retryable());

        // A missed per-attempt deadline is redelivered; the handler decides
        // when the entity itself is past saving
        let err = Error::Timeout {
            operation: "peer url resolution".into(),
            elapsed: Duration::from_secs(30),
        };
        assert_eq!(err.action(), ErrorAction::Nack);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_unsupported_detection() {
        let err = Error::unsupported("hedera", "add_peer");
        assert!(err.is_unsupported());
        assert!(!err.is_retryable());

        let err = Error::SourceModeUnsupported {
            chain: "ethereum".into(),
            mode: "stream".into(),
        };
        assert!(err.is_unsupported());

        let err = Error::Internal("boom".into());
        assert!(!err.is_unsupported());
    }

    #[test]
    fn test_validation_message_joins_errors() {
        let err = Error::Validation {
            entity: "network".into(),
            errors: vec!["chain required".into(), "engine_id required".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("chain required"));
        assert!(msg.contains("engine_id required"));
    }
}
