use thiserror::Error;

/// Errors that can occur while configuring or driving a transport
#[derive(Error, Debug)]
pub enum Error {
    /// Backend I/O or connectivity failure
    #[error("transport error: {0}")]
    Transport(String),

    /// A required configuration value was not provided
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    /// Two configuration values contradict each other
    #[error("configuration conflict: {0}")]
    ConfigConflict(String),

    /// A configuration value is present but unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Envelope or frame bytes could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// A length-prefixed field does not fit in 16 bits
    #[error("payload of {0} bytes exceeds the 65535 byte limit")]
    PayloadTooLarge(usize),

    /// The operation requires a started transport
    #[error("transport not started")]
    NotStarted,

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for messenger operations
pub type Result<T> = std::result::Result<T, Error>;
