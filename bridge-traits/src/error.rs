use thiserror::Error;

use crate::resource::ResourceVersion;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The source no longer retains history back to `requested`; the caller
    /// has to relist.
    #[error("Resource version {requested} is too old (oldest retained: {oldest})")]
    Expired {
        requested: ResourceVersion,
        oldest: ResourceVersion,
    },

    #[error("Watch disconnected: {0}")]
    Disconnected(String),
}

impl BridgeError {
    /// Whether a watch failing with this error must be recovered by a relist.
    pub fn requires_relist(&self) -> bool {
        matches!(self, Self::Expired { .. })
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
