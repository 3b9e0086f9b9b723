//! Error types for Flick
//!
//! Every fallible operation reports one of a closed set of error kinds. Foreign
//! errors are mapped to exactly one kind at the module that first sees them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur in Flick
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FlickError {
    /// A shared resource was left unusable by a panicking writer
    #[error("internal lock was poisoned")]
    PoisonedLock,

    /// Downloaded bytes did not hash to the advertised digest
    #[error("checksum verification failed (expected {expected}, got {actual})")]
    Checksum { expected: String, actual: String },

    /// The artifact descriptor has no asset for the running platform
    #[error("no assets found for platform '{0}'")]
    NoAssets(String),

    #[error("file system error: {0}")]
    FileSystem(String),

    #[error("library loading error: {0}")]
    LibLoading(String),

    /// Invalid reference or value (unknown id, bad shortcut, bad version)
    #[error("conversion error: {0}")]
    Conversion(String),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(String),

    #[error("network request error: {0}")]
    NetworkRequest(String),

    #[error("global shortcut error: {0}")]
    ShortcutRegistration(String),

    #[error("autostart configuration error: {0}")]
    AutostartConfig(String),

    /// Failures of the async runtime or the request/response bridge
    #[error("runtime bridge error: {0}")]
    RuntimeBridge(String),
}

/// Fieldless mirror of [`FlickError`], used on the wire and in assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    PoisonedLock,
    Checksum,
    NoAssets,
    FileSystem,
    LibLoading,
    Conversion,
    Json,
    NetworkRequest,
    ShortcutRegistration,
    AutostartConfig,
    RuntimeBridge,
}

impl FlickError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FlickError::PoisonedLock => ErrorKind::PoisonedLock,
            FlickError::Checksum { .. } => ErrorKind::Checksum,
            FlickError::NoAssets(_) => ErrorKind::NoAssets,
            FlickError::FileSystem(_) => ErrorKind::FileSystem,
            FlickError::LibLoading(_) => ErrorKind::LibLoading,
            FlickError::Conversion(_) => ErrorKind::Conversion,
            FlickError::Json(_) => ErrorKind::Json,
            FlickError::NetworkRequest(_) => ErrorKind::NetworkRequest,
            FlickError::ShortcutRegistration(_) => ErrorKind::ShortcutRegistration,
            FlickError::AutostartConfig(_) => ErrorKind::AutostartConfig,
            FlickError::RuntimeBridge(_) => ErrorKind::RuntimeBridge,
        }
    }
}

/// Error as it crosses the request/response bridge.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("{message}")]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&FlickError> for WireError {
    fn from(err: &FlickError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result type alias for Flick operations
pub type FlickResult<T> = Result<T, FlickError>;

impl From<std::io::Error> for FlickError {
    fn from(err: std::io::Error) -> Self {
        FlickError::FileSystem(err.to_string())
    }
}

impl From<serde_json::Error> for FlickError {
    fn from(err: serde_json::Error) -> Self {
        FlickError::Json(err.to_string())
    }
}

impl From<toml::de::Error> for FlickError {
    fn from(err: toml::de::Error) -> Self {
        FlickError::Conversion(err.to_string())
    }
}

impl From<reqwest::Error> for FlickError {
    fn from(err: reqwest::Error) -> Self {
        FlickError::NetworkRequest(err.to_string())
    }
}

impl From<libloading::Error> for FlickError {
    fn from(err: libloading::Error) -> Self {
        FlickError::LibLoading(err.to_string())
    }
}

impl From<semver::Error> for FlickError {
    fn from(err: semver::Error) -> Self {
        FlickError::Conversion(err.to_string())
    }
}

impl From<global_hotkey::Error> for FlickError {
    fn from(err: global_hotkey::Error) -> Self {
        FlickError::ShortcutRegistration(err.to_string())
    }
}

impl From<global_hotkey::hotkey::HotKeyParseError> for FlickError {
    fn from(err: global_hotkey::hotkey::HotKeyParseError) -> Self {
        FlickError::ShortcutRegistration(err.to_string())
    }
}

impl From<tokio::task::JoinError> for FlickError {
    fn from(err: tokio::task::JoinError) -> Self {
        FlickError::RuntimeBridge(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_file_system() {
        let err: FlickError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert_eq!(err.kind(), ErrorKind::FileSystem);
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_json_error_maps_to_json() {
        let err: FlickError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.kind(), ErrorKind::Json);
    }

    #[test]
    fn test_wire_error_keeps_diagnostic() {
        let err = FlickError::Checksum {
            expected: "aa".into(),
            actual: "bb".into(),
        };
        let wire = WireError::from(&err);
        assert_eq!(wire.kind, ErrorKind::Checksum);
        assert!(wire.message.contains("aa"));
        assert!(wire.message.contains("bb"));

        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains("\"Checksum\""));
    }
}
