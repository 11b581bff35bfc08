use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Core initialization failed: {0}")]
    InitializationFailed(String),

    #[error("Capability missing: {capability} - {message}")]
    CapabilityMissing { capability: String, message: String },

    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),

    #[error("Controller error: {0}")]
    Controller(#[from] core_controller::ControllerError),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
