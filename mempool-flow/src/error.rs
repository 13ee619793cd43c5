use thiserror::Error;

/// Main error type for the mempool-flow library.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Insufficient data for fee estimation.
    #[error("Insufficient data for estimation: {0}")]
    InsufficientData(String),

    /// Invalid input parameter.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Type alias for Results in this library.
pub type Result<T> = std::result::Result<T, FlowError>;

impl FlowError {
    /// Creates an InvalidConfig error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates an InsufficientData error.
    pub fn insufficient_data(msg: impl Into<String>) -> Self {
        Self::InsufficientData(msg.into())
    }

    /// Creates an InvalidParameter error.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }
}
