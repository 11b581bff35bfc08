use bridge_traits::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Source error: {0}")]
    Source(#[from] BridgeError),

    #[error("Invalid object key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Controller cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(#[from] core_runtime::Error),
}

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Failure reported by a reconcile function.
///
/// Always treated as transient: the key is requeued with backoff until the
/// retry budget runs out.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ReconcileError {
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ReconcileError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an underlying error, keeping it reachable through
    /// `std::error::Error::source`.
    pub fn with_source<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<BridgeError> for ReconcileError {
    fn from(err: BridgeError) -> Self {
        Self::with_source("source call failed", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_reconcile_error_keeps_source() {
        let err = ReconcileError::from(BridgeError::Disconnected("reset".to_string()));
        assert_eq!(err.to_string(), "source call failed");
        assert!(err.source().unwrap().to_string().contains("reset"));
    }

    #[test]
    fn test_controller_error_from_bridge() {
        let err: ControllerError = BridgeError::NotAvailable("watch".to_string()).into();
        assert!(matches!(err, ControllerError::Source(_)));
    }
}
