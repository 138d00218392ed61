//! Error types for the bridge.

use std::path::PathBuf;

use crate::args::ArgumentError;

/// Result type alias for bridge operations.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge error.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Extension '{name}' not found (searched {} location(s))", searched.len())]
    NotFound { name: String, searched: Vec<PathBuf> },

    #[error("Load failed for {path}: {reason}")]
    LoadFailed { path: PathBuf, reason: String },

    #[error("Symbol not found in {path}: {symbol}")]
    SymbolNotFound { path: PathBuf, symbol: String },

    #[error("Incompatible ABI version: expected {expected}, got {got}")]
    IncompatibleAbi { expected: u32, got: u32 },

    #[error("Install failed for '{extension_id}': {reason}")]
    InstallFailed { extension_id: String, reason: String },

    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error("Call '{command}' failed: {reason}")]
    CallFailed {
        command: String,
        reason: String,
        code: Option<String>,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Call timed out")]
    Timeout,

    #[error("Call cancelled")]
    Cancelled,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Command '{command}' is declared as {declared}, not {requested}")]
    WrongCallMode {
        command: String,
        declared: &'static str,
        requested: &'static str,
    },

    #[error("Handle {0} is already registered")]
    DuplicateHandle(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BridgeError {
    /// True for failures reported by, or while talking to, the extension
    /// after a request was issued.
    pub fn is_call_error(&self) -> bool {
        matches!(
            self,
            BridgeError::CallFailed { .. } | BridgeError::Protocol(_)
        )
    }

    /// True for resolution and load failures.
    pub fn is_load_error(&self) -> bool {
        matches!(
            self,
            BridgeError::NotFound { .. }
                | BridgeError::LoadFailed { .. }
                | BridgeError::SymbolNotFound { .. }
                | BridgeError::IncompatibleAbi { .. }
                | BridgeError::InstallFailed { .. }
        )
    }

    pub(crate) fn load_failed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        BridgeError::LoadFailed {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Errors reported by the extension itself map onto a failed call.
impl From<nativebridge_extension_sdk::ExtensionError> for BridgeError {
    fn from(e: nativebridge_extension_sdk::ExtensionError) -> Self {
        match e {
            nativebridge_extension_sdk::ExtensionError::Json(e) => BridgeError::Json(e),
            other => BridgeError::Protocol(other.to_string()),
        }
    }
}
