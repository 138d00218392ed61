//! Extension-side error types.

use crate::envelope::{fields, Envelope};

/// Error raised by extension code or by the SDK glue around it.
#[derive(Debug, thiserror::Error)]
pub enum ExtensionError {
    /// The host sent a command the extension does not implement.
    #[error("Unsupported command: {command}")]
    UnsupportedCommand { command: String },

    /// A request field was missing or had the wrong shape.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The command ran but failed.
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// No native state exists for the given handle id.
    #[error("Unknown handle: {0}")]
    UnknownHandle(u64),

    /// The extension could not be instantiated.
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Envelope could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload was valid JSON but not an envelope.
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl From<String> for ExtensionError {
    fn from(msg: String) -> Self {
        Self::Other(msg)
    }
}

impl From<&str> for ExtensionError {
    fn from(msg: &str) -> Self {
        Self::Other(msg.to_string())
    }
}

impl ExtensionError {
    /// Machine readable code sent in the `code` field of failed replies.
    pub fn code(&self) -> &'static str {
        match self {
            ExtensionError::UnsupportedCommand { .. } => "UnsupportedCommand",
            ExtensionError::InvalidArguments(_) => "InvalidArguments",
            ExtensionError::ExecutionFailed(_) => "ExecutionFailed",
            ExtensionError::UnknownHandle(_) => "UnknownHandle",
            ExtensionError::InitializationFailed(_) => "InitializationFailed",
            ExtensionError::Json(_) | ExtensionError::MalformedEnvelope(_) => "MalformedEnvelope",
            ExtensionError::Other(_) => "Error",
        }
    }

    /// Build the FAIL reply answering `request`.
    pub fn to_reply(&self, request: &Envelope) -> Envelope {
        Envelope::fail(self.to_string())
            .with(fields::CODE, self.code())
            .correlated_with(request)
    }
}

/// Result alias used throughout the SDK.
pub type ExtensionResult<T> = Result<T, ExtensionError>;
